//! Managed execution of named periodic tasks.
//!
//! [`Pool`] is a process-wide registry mapping a string key to a supervised
//! loop.  Each key gets its own [`Routine`] (a circuit breaker), so one
//! misbehaving concern cannot starve the others: after `threshold`
//! consecutive failures the breaker opens and ticks are suppressed until
//! `reset_timeout` has elapsed, then a single probe decides whether to close
//! again.
//!
//! The supervised operations own no scheduling of their own; they perform one
//! unit of work per invocation and return.  That keeps them trivially
//! testable and leaves lifecycle, pacing, and failure policy entirely here.

mod breaker;
mod pool;

pub use breaker::{BreakerState, Routine};
pub use pool::Pool;
