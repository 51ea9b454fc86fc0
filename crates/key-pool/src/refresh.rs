//! Status sweeps
//!
//! Operator-level probing that ignores cooldown. `ensure_minimum_active`
//! tops the pool up before a large run; `refresh_all` reclassifies every key.

use std::collections::BTreeSet;

use futures_util::future::join_all;
use key_store::{Credential, KeyStatus};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::pool::KeyPool;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub probed: usize,
    pub recovered: usize,
    pub active_after: usize,
    /// Ids of previously non-active keys the sweep brought back.
    pub recovered_ids: BTreeSet<String>,
}

impl KeyPool {
    /// Probe every non-active key when fewer than `min` keys are active.
    pub async fn ensure_minimum_active(&self, min: usize) -> Result<RefreshSummary> {
        let all = self.snapshot().await?;
        let active = all.iter().filter(|c| c.status == KeyStatus::Active).count();
        if active >= min {
            return Ok(RefreshSummary {
                active_after: active,
                ..RefreshSummary::default()
            });
        }

        let degraded: Vec<&Credential> = all
            .iter()
            .filter(|c| c.status != KeyStatus::Active)
            .collect();
        info!(
            provider = %self.scope().provider,
            active,
            min,
            degraded = degraded.len(),
            "active keys below minimum, sweeping degraded keys"
        );
        let results = self.sweep(&degraded).await;
        let recovered_ids: BTreeSet<String> = degraded
            .iter()
            .zip(&results)
            .filter(|(_, active)| **active)
            .map(|(c, _)| c.id.clone())
            .collect();
        Ok(RefreshSummary {
            probed: degraded.len(),
            recovered: recovered_ids.len(),
            active_after: active + recovered_ids.len(),
            recovered_ids,
        })
    }

    /// Probe every key regardless of status.
    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        let all = self.snapshot().await?;
        let targets: Vec<&Credential> = all.iter().collect();
        let results = self.sweep(&targets).await;
        let active_after = results.iter().filter(|r| **r).count();
        let recovered_ids: BTreeSet<String> = targets
            .iter()
            .zip(&results)
            .filter(|(c, active)| **active && c.status != KeyStatus::Active)
            .map(|(c, _)| c.id.clone())
            .collect();
        info!(
            provider = %self.scope().provider,
            probed = targets.len(),
            active_after,
            "refreshed all key statuses"
        );
        Ok(RefreshSummary {
            probed: targets.len(),
            recovered: recovered_ids.len(),
            active_after,
            recovered_ids,
        })
    }

    /// Probe concurrently; one flag per target, true when it came back active.
    async fn sweep(&self, targets: &[&Credential]) -> Vec<bool> {
        let outcomes = join_all(targets.iter().map(|c| self.probe().probe(c))).await;
        outcomes
            .into_iter()
            .zip(targets)
            .map(|(outcome, credential)| match outcome {
                Ok(outcome) => outcome.recovered(),
                Err(e) => {
                    warn!(credential_id = %credential.id, error = %e, "probe could not be recorded");
                    false
                }
            })
            .collect()
    }
}
