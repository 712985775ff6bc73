//! # Microcloud Agent
//!
//! Turns incidents into proposed remediation actions.
//!
//! This crate provides the [`Decider`]: a fixed rule-to-action table with
//! per-`(rule, target)` cooldown. Every incident is persisted; at most one
//! action is proposed per incident, and none while the cooldown holds.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

mod decider;

pub use decider::{Decider, DEFAULT_COOLDOWN};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{Decider, DEFAULT_COOLDOWN};
}
