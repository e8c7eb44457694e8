//! # Concord Testkit
//!
//! Test utilities for the Concord transaction coordinator.
//!
//! This crate provides:
//! - Services over temporary directories or shared in-memory logs that
//!   can be "restarted" to exercise recovery
//! - Scripted participants that record every call in a shared journal
//! - A resolver and a recording superior for recovery and subordinate
//!   tests
//! - Property-based generators for vote scripts
//! - Protocol, crash, escalation and stress scenarios
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_testkit::prelude::*;
//!
//! #[test]
//! fn commits_both() {
//!     let env = TestService::new();
//!     let journal = CallJournal::new();
//!     let tx = env.begin().unwrap();
//!     tx.enlist(ScriptedParticipant::new("a", &journal).into_arc()).unwrap();
//!     tx.enlist(ScriptedParticipant::new("b", &journal).into_arc()).unwrap();
//!     tx.commit(true).unwrap();
//!     assert_eq!(journal.names_for(Call::Commit { one_phase: false }), ["a", "b"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod escalation;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod participants;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::escalation::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::participants::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use escalation::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use participants::*;
pub use stress::*;
