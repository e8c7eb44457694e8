//! # Concord Core
//!
//! Two-phase-commit transaction coordinator for embedding in an
//! application process.
//!
//! This crate provides:
//! - The coordinator state machine, one handler per protocol state
//! - Heuristic outcome tracking and timeout-driven escalation
//! - A durable, checksummed transaction log with crash recovery
//! - An exclusive lock on the log directory
//! - The [`TransactionService`] tying these together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use concord_core::{Config, NoopResolver, TransactionService};
//! use std::sync::Arc;
//!
//! let config = Config::new().log_dir("/var/lib/concord").max_indoubt_ticks(60);
//! let service = Arc::new(TransactionService::open(config, &NoopResolver)?);
//! let _timer = service.start_timer()?;
//!
//! let tx = service.begin()?;
//! tx.enlist(orders)?;
//! tx.enlist(billing)?;
//! tx.commit(true)?;
//! ```
//!
//! ## Outcomes
//!
//! `prepare`, `commit` and `rollback` report the aggregate outcome as a
//! [`CoreError`] variant: [`CoreError::Rollback`] for a rolled back
//! transaction, one of the four heuristic variants when participants may
//! disagree with the decision. Individual participant failures never
//! reach the caller on their own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod coordinator;
pub mod dir;
mod dispatch;
mod error;
mod listener;
pub mod log;
mod participant;
mod recovery;
mod service;
mod state;
mod timer;
mod types;

pub use config::{Config, ConfigProperties};
pub use coordinator::{Coordinator, CoordinatorSettings, CoordinatorSnapshot};
pub use dir::LogDir;
pub use error::{CoreError, CoreResult};
pub use listener::{ListenerId, StateListener};
pub use log::{HandlerPayload, LogManager, LogRecord, ParticipantEntry};
pub use participant::{
    CompositeTransaction, NoopResolver, Participant, ParticipantError, ParticipantResolver,
    ParticipantResult, ResourceTransaction, RollbackOnlyParticipant, SuperiorRecoveryCoordinator,
    TransactionalResource, UnresolvedParticipant,
};
pub use recovery::{RecoveryOrchestrator, RecoveryReport};
pub use service::TransactionService;
pub use timer::TimeoutDriver;
pub use types::{
    CoordinatorId, Decision, HeuristicOutcome, ParticipantRef, TerminationOutcome, TxState, Vote,
};
