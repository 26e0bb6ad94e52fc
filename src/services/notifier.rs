//! Password-reset delivery
//!
//! The gateway mints reset tokens but never delivers them itself. Whatever sits
//! behind [`ResetNotifier`] (a mailer, a queue) receives the raw token exactly once.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::utils::{AppError, AppResult};

#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset(&self, user_id: Uuid, email: &str, token: &str) -> AppResult<()>;
}

/// Records that a reset was issued; the token itself is never written out
#[derive(Debug, Default)]
pub struct LogResetNotifier;

#[async_trait]
impl ResetNotifier for LogResetNotifier {
    async fn send_reset(&self, user_id: Uuid, _email: &str, _token: &str) -> AppResult<()> {
        info!(user_id = %user_id, "Password reset issued; no delivery channel configured");
        Ok(())
    }
}

/// A reset handed to a [`RecordingResetNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredReset {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

/// Keeps every delivered reset in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingResetNotifier {
    delivered: Arc<Mutex<Vec<DeliveredReset>>>,
}

impl RecordingResetNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<DeliveredReset> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }

    /// Token of the most recent reset sent to `email`
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.delivered()
            .into_iter()
            .rev()
            .find(|reset| reset.email == email)
            .map(|reset| reset.token)
    }
}

#[async_trait]
impl ResetNotifier for RecordingResetNotifier {
    async fn send_reset(&self, user_id: Uuid, email: &str, token: &str) -> AppResult<()> {
        self.delivered
            .lock()
            .map_err(|_| AppError::Internal("reset notifier poisoned".to_string()))?
            .push(DeliveredReset {
                user_id,
                email: email.to_string(),
                token: token.to_string(),
            });
        Ok(())
    }
}
