use async_trait::async_trait;
use tracing::info;

/// Best-effort outbound message channel.
///
/// Implementations must never fail loudly: a delivery problem is reported
/// through the returned `bool` and a log line, and trading carries on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> bool;
}

/// Writes notifications to the log. Used when no chat channel is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    pub label: String,
}

impl LogNotifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> bool {
        info!(target: "notify", label = %self.label, "{message}");
        true
    }
}
