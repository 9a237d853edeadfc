use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid action status transition for {id} from {from} to {to}")]
    InvalidActionTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Unknown session state: {0}")]
    UnknownState(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
