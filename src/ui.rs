//! Operator-facing output.
//!
//! The step reports progress through a [`Ui`]. Messages are fire-and-forget;
//! nothing the UI does can fail the step.

use parking_lot::Mutex;

/// Sink for operator-facing messages.
pub trait Ui: Send + Sync {
    /// Report progress.
    fn say(&self, message: &str);

    /// Report a failure.
    fn error(&self, message: &str);
}

/// UI that prints to the terminal.
///
/// `say` goes to stdout and is mirrored to tracing. `error` goes to stderr
/// only; callers that fail log the error themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleUi;

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        tracing::info!("{}", message);
        println!("==> {}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("==> {}", message);
    }
}

/// A message recorded by [`MemoryUi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    /// Sent through [`Ui::say`].
    Say(String),
    /// Sent through [`Ui::error`].
    Error(String),
}

impl UiMessage {
    /// The message text.
    pub fn text(&self) -> &str {
        match self {
            UiMessage::Say(s) | UiMessage::Error(s) => s,
        }
    }
}

/// UI that records every message in order.
#[derive(Debug, Default)]
pub struct MemoryUi {
    messages: Mutex<Vec<UiMessage>>,
}

impl MemoryUi {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded messages.
    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages.lock().clone()
    }

    /// Text of all `say` messages.
    pub fn said(&self) -> Vec<String> {
        self.collect(|m| matches!(m, UiMessage::Say(_)))
    }

    /// Text of all `error` messages.
    pub fn errors(&self) -> Vec<String> {
        self.collect(|m| matches!(m, UiMessage::Error(_)))
    }

    fn collect(&self, keep: impl Fn(&UiMessage) -> bool) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| keep(m))
            .map(|m| m.text().to_string())
            .collect()
    }
}

impl Ui for MemoryUi {
    fn say(&self, message: &str) {
        self.messages.lock().push(UiMessage::Say(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages
            .lock()
            .push(UiMessage::Error(message.to_string()));
    }
}
