use async_trait::async_trait;
use tracing::{debug, info};

/// Out-of-band delivery of reset codes.
#[async_trait]
pub trait ResetCodeSender: Send + Sync {
    /// Returns `false` when delivery failed; the stored code is kept either way.
    async fn send_reset_code(&self, email: &str, code: &str) -> bool;
}

/// Writes the code to the log instead of sending mail.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl ResetCodeSender for LogMailer {
    async fn send_reset_code(&self, email: &str, code: &str) -> bool {
        info!(%email, "password reset code issued");
        debug!(%email, %code, "password reset code");
        true
    }
}
