//! Credential pool for a single user's provider keys
//!
//! Hands out API keys for batch work and fails over between them mid-task.
//! The pool reads a snapshot from `CredentialStore` (single source of truth)
//! on every call and writes every status change back before acting on it.
//!
//! Key lifecycle:
//! 1. Key stored as `active` → selected LRU-first by `acquire`
//! 2. Run fails with auth/quota error → `failed`, cooldown starts
//! 3. Provider throttles → `rate_limited`, cooldown starts
//! 4. Pool runs thin (fewer active than the floor) → degraded keys are probed
//!    concurrently and flipped back to `active` on success
//! 5. Mid-task failover via `replace` consults known status only, never probes

pub mod error;
pub mod pool;
pub mod probe;
pub mod refresh;
pub mod transition;

pub use error::{Error, Result};
pub use pool::{Assignment, KeyPool, PoolScope};
pub use probe::{HealthProbe, ProbeOutcome};
pub use refresh::RefreshSummary;
pub use transition::{cooldown_elapsed, penalty_for};
