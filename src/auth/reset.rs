//! Password-reset codes: generation and the decision taken when a code is
//! presented. Stores apply the decision atomically together with the
//! password update.

use rand::{rngs::OsRng, Rng};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::repo_types::ResetRequest;

pub const CODE_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("no pending password reset for this email")]
    NotFound,
    #[error("reset code expired")]
    Expired,
    #[error("reset code does not match")]
    CodeMismatch,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Outcome of presenting a code against a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Request must be dropped.
    Expired,
    /// `exhausted` means the attempt budget is spent and the request must be
    /// dropped; otherwise its counter is bumped.
    Mismatch { exhausted: bool },
}

/// Fixed-length numeric code from the OS CSPRNG.
pub fn generate_code() -> String {
    let n: u32 = OsRng.gen_range(0..10u32.pow(CODE_LEN as u32));
    format!("{:0width$}", n, width = CODE_LEN)
}

impl ResetRequest {
    pub fn new(email: &str, user_id: Uuid, code: String, now: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            email: email.to_string(),
            code,
            user_id,
            expires_at: now + ttl,
            attempts: 0,
        }
    }

    pub fn judge(&self, code: &str, now: OffsetDateTime, max_attempts: i32) -> Verdict {
        if now > self.expires_at {
            return Verdict::Expired;
        }
        if bool::from(self.code.as_bytes().ct_eq(code.as_bytes())) {
            return Verdict::Accept;
        }
        Verdict::Mismatch {
            exhausted: self.attempts + 1 >= max_attempts,
        }
    }
}
