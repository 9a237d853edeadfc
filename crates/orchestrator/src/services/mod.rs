//! Adapters for the outside world: agents, files, processes, and the human.

pub mod agent_client;
pub mod file_store;
pub mod interaction;
pub mod process_runner;

pub use agent_client::{
    AgentChatClient, ChatMessage, ChatOptions, ChatResponse, ChatRole, HttpAgentClient,
    RecordedRequest, ScriptedAgentClient,
};
pub use file_store::{read_json, write_json, FileStore, LocalFileStore, MemoryFileStore};
pub use interaction::{HeadlessInteraction, InteractionHandler, ScriptedInteraction};
pub use process_runner::{CommandOutput, ProcessRunner, ShellProcessRunner, DEFAULT_COMMAND_TIMEOUT};
