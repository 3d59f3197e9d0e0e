//! Terminal integration for the reconcile engine
//!
//! The engine lives in the `declarative` crate; this module renders change
//! sets and wires progress, confirmation and cancellation to the terminal.

pub mod differ;
pub mod executor;

pub use differ::{display_change_set, display_report};
pub use executor::{DialoguerConfirm, TerminalProgress};
