//! Progress reporting seam between the session and the host UI.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Presentation hints attached to a progress message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressOptions {
    pub cancellable: bool,
    pub show_in_status_bar: bool,
}

impl ProgressOptions {
    pub fn status_bar() -> Self {
        Self {
            cancellable: false,
            show_in_status_bar: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increment_pct: Option<f64>,
    pub cancellable: bool,
    pub show_in_status_bar: bool,
}

impl ProgressUpdate {
    pub fn new(message: impl Into<String>, increment_pct: Option<f64>, options: ProgressOptions) -> Self {
        Self {
            message: message.into(),
            increment_pct,
            cancellable: options.cancellable,
            show_in_status_bar: options.show_in_status_bar,
        }
    }
}

/// Receives every progress update, unthrottled.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Writes progress to the tracing log. Used when the host has no UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, update: ProgressUpdate) {
        info!(
            increment = ?update.increment_pct,
            status_bar = update.show_in_status_bar,
            "{}",
            update.message
        );
    }
}

/// Keeps every update in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryProgressSink {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl MemoryProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.updates
            .lock()
            .iter()
            .map(|update| update.message.clone())
            .collect()
    }
}

impl ProgressSink for MemoryProgressSink {
    fn report(&self, update: ProgressUpdate) {
        self.updates.lock().push(update);
    }
}
