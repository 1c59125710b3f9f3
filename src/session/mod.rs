//! Session orchestration.
//!
//! [`SessionController`] owns everything belonging to the open folder and is
//! the only thing a front end needs to talk to. Cache preparation after a
//! selection change is postponed through [`DeferredPrepare`] so that showing
//! the new selection never waits on decoding.

pub mod controller;
pub mod deferred;

pub use controller::{ExportSummary, OpenSummary, ScanSummary, SessionController, SessionError};
pub use deferred::{DeferredPrepare, PrepareRequest};
