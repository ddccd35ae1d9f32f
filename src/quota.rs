//! Per-user analysis quota accounting.
//!
//! A submission charges one unit of quota eagerly, before the job
//! reaches a terminal state; any failure path refunds it. Refunds are
//! best-effort: a refund that cannot be persisted is logged and
//! swallowed, and the job's terminal status is recorded regardless.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::models::UserRecord;
use crate::db::user_repository::UserStore;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("User not found")]
    UserNotFound,

    #[error("Analysis quota exceeded. You have used {used} of {allowed} analyses.")]
    Exceeded { used: i32, allowed: i32 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Tracks allowed/bonus/used analysis counts per user.
///
/// The charge is a single conditional atomic update at the store, so
/// concurrent submissions for the same user serialize there instead of
/// racing a read-modify-write.
#[derive(Clone)]
pub struct QuotaLedger {
    users: Arc<dyn UserStore>,
}

impl QuotaLedger {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Check the user's quota and consume one unit in a single atomic
    /// step. On rejection nothing is charged.
    pub async fn check_and_charge(&self, user_id: &str) -> Result<UserRecord, QuotaError> {
        if let Some(user) = self.users.try_charge(user_id).await? {
            info!(
                "User {} quota incremented: {}/{}",
                user_id,
                user.quota_used,
                user.quota_limit + user.quota_bonus
            );
            return Ok(user);
        }

        // No row matched: either the user does not exist or the quota
        // is exhausted. Look the user up to tell the two apart.
        match self.users.find_by_id(user_id).await? {
            None => Err(QuotaError::UserNotFound),
            Some(user) => {
                let allowed = user.quota_limit + user.quota_bonus;
                warn!(
                    "User {} exceeded quota: {}/{}",
                    user_id, user.quota_used, allowed
                );
                Err(QuotaError::Exceeded {
                    used: user.quota_used,
                    allowed,
                })
            }
        }
    }

    /// Return one unit of quota. Persistence failures are logged and
    /// swallowed; the caller proceeds either way.
    pub async fn refund(&self, user_id: &str) {
        match self.users.refund(user_id).await {
            Ok(()) => info!("Refunded quota for user {}", user_id),
            Err(e) => error!("Failed to refund quota for user {}: {:?}", user_id, e),
        }
    }
}
