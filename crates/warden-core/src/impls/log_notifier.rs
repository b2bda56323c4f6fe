//! Notifier that only logs. Used when no messaging gateway is wired in.

use async_trait::async_trait;
use tracing::info;

use crate::ports::{NotifyError, Notifier};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        info!(target: "warden::notify", chat_id, "{text}");
        Ok(())
    }
}
