//! Status transition rules
//!
//! Maps remote failures to credential status changes and owns the cooldown
//! check. Only three statuses exist, and `StatusChange` is the only writer,
//! so no other value can reach the store.

use std::time::Duration;

use key_store::{Credential, CredentialStore, StatusChange};
use provider::TaskError;
use tracing::info;

use crate::error::Result;

/// Status change a failed run earns its credential, if any.
///
/// Auth and quota failures disable the key, an explicit throttle rate-limits
/// it, and transient trouble leaves the status alone.
pub fn penalty_for(err: &TaskError, now_millis: u64) -> Option<StatusChange> {
    match err {
        TaskError::Auth(_) | TaskError::Quota(_) => Some(StatusChange::Failed {
            failed_at: now_millis,
        }),
        TaskError::RateLimited(_) => Some(StatusChange::RateLimited {
            failed_at: now_millis,
        }),
        TaskError::Transient(_) => None,
    }
}

/// Status change for a probe result. Probes have no "leave alone" outcome:
/// anything other than success or an explicit throttle is `failed`.
pub fn probe_change(result: &provider::Result<()>, now_millis: u64) -> StatusChange {
    match result {
        Ok(()) => StatusChange::Recovered {
            used_at: now_millis,
        },
        Err(TaskError::RateLimited(_)) => StatusChange::RateLimited {
            failed_at: now_millis,
        },
        Err(_) => StatusChange::Failed {
            failed_at: now_millis,
        },
    }
}

/// Whether a credential has sat out its cooldown.
///
/// Credentials without a recorded failure are always eligible.
pub fn cooldown_elapsed(credential: &Credential, now_millis: u64, cooldown: Duration) -> bool {
    match credential.last_failed_at {
        None => true,
        Some(failed_at) => now_millis.saturating_sub(failed_at) > cooldown_millis(cooldown),
    }
}

/// Milliseconds until a credential's cooldown expires (0 when eligible).
pub fn cooldown_remaining_millis(credential: &Credential, now_millis: u64, cooldown: Duration) -> u64 {
    match credential.last_failed_at {
        None => 0,
        Some(failed_at) => failed_at
            .saturating_add(cooldown_millis(cooldown))
            .saturating_sub(now_millis),
    }
}

/// Cooldown in millis, clamped to `u64::MAX`.
fn cooldown_millis(cooldown: Duration) -> u64 {
    u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX)
}

/// Write a status change to the store and count it.
pub async fn record(
    store: &dyn CredentialStore,
    id: &str,
    change: StatusChange,
) -> Result<Credential> {
    let updated = store.update_status(id, change).await?;
    metrics::counter!("key_status_changes_total", "status" => updated.status.as_str())
        .increment(1);
    info!(
        credential_id = id,
        status = %updated.status,
        failure_count = updated.failure_count,
        "credential status updated"
    );
    Ok(updated)
}
