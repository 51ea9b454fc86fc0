//! Common types shared by the key rotation crates

mod clock;
mod error;
mod secret;
mod tuning;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use secret::Secret;
pub use tuning::Tuning;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the dyn-compatible store and client traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
