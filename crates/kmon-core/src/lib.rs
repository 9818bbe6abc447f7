//! Kernel event model shared by the interceptors and the daemon.
//!
//! Besides the event types and the event itself, this crate defines the
//! contracts of the stateful collaborators the interceptors depend on, each one
//! with an in-memory implementation:
//!
//! - [`ps::ProcessSnapshotter`] / [`ps::ProcessTracker`]
//! - [`handle::HandleSnapshotter`] / [`handle::HandleTable`]
//! - [`handle::ObjectTypes`] / [`handle::ObjectTypeStore`]
//! - [`fs::DevMapper`] / [`fs::DriveMapper`]
//! - [`scanner::Scanner`] / [`scanner::PatternScanner`]

pub mod config;
pub mod fs;
pub mod handle;
pub mod kevent;
pub mod kparams;
pub mod ktypes;
pub mod metrics;
pub mod ps;
pub mod scanner;

pub use kevent::Kevent;
pub use kparams::{Kparam, Kparams, KparamsError};
pub use ktypes::Ktype;
pub use metrics::Metrics;
