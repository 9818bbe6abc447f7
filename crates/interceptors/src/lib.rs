//! Interceptor chain.
//!
//! Every kernel event goes through the chain before reaching the output. Each
//! interceptor can enrich the event, feed the state of the snapshotters,
//! request to stop the chain, or ask to drop the event with
//! [`InterceptError::CancelUpstream`].
//!
//! Interceptors run in a fixed order and later stages rely on the state left
//! by the earlier ones: the process interceptor attaches the process context
//! that the file system interceptor reads, so the former always comes first.

use kmon_core::{Kevent, KparamsError, ps::TrackerError, scanner::ScanError};
use thiserror::Error;

pub mod builder;
pub mod chain;
pub mod fs;
pub mod handle;
pub mod image;
pub mod net;
pub mod ps;
pub mod registry;

pub use builder::{BuildError, ChainBuilder, Collaborators};
pub use chain::{DispatchError, InterceptorChain, InterceptorFailure, InterceptorFailures};

/// Tells the chain whether the next interceptor should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    Break,
}

/// Result of a single interceptor run.
pub type Intercepted = (Next, Result<(), InterceptError>);

#[derive(Error, Debug)]
pub enum InterceptError {
    /// The event must not reach the output. This is a decision, not a failure.
    #[error("kevent cancelled upstream")]
    CancelUpstream,
    #[error(transparent)]
    Kparams(#[from] KparamsError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("unable to scan {target}: {error}")]
    Scan { target: String, error: ScanError },
    #[error("unknown object type {0}")]
    UnknownObjectType(u16),
}

impl InterceptError {
    pub fn is_cancel_upstream(&self) -> bool {
        matches!(self, InterceptError::CancelUpstream)
    }
}

/// Stage of the interceptor chain.
pub trait Intercept {
    fn name(&self) -> &'static str;

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted;
}

pub(crate) fn proceed() -> Intercepted {
    (Next::Continue, Ok(()))
}

pub(crate) fn stop() -> Intercepted {
    (Next::Break, Ok(()))
}

pub(crate) fn cancel() -> Intercepted {
    (Next::Break, Err(InterceptError::CancelUpstream))
}

pub(crate) fn fail(err: impl Into<InterceptError>) -> Intercepted {
    (Next::Continue, Err(err.into()))
}

/// The closed set of interceptors.
pub enum Interceptor {
    Process(ps::PsInterceptor),
    FileSystem(fs::FsInterceptor),
    Registry(registry::RegistryInterceptor),
    Image(image::ImageInterceptor),
    Network(net::NetInterceptor),
    Handle(handle::HandleInterceptor),
}

impl Intercept for Interceptor {
    fn name(&self) -> &'static str {
        match self {
            Interceptor::Process(i) => i.name(),
            Interceptor::FileSystem(i) => i.name(),
            Interceptor::Registry(i) => i.name(),
            Interceptor::Image(i) => i.name(),
            Interceptor::Network(i) => i.name(),
            Interceptor::Handle(i) => i.name(),
        }
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        match self {
            Interceptor::Process(i) => i.intercept(kevt),
            Interceptor::FileSystem(i) => i.intercept(kevt),
            Interceptor::Registry(i) => i.intercept(kevt),
            Interceptor::Image(i) => i.intercept(kevt),
            Interceptor::Network(i) => i.intercept(kevt),
            Interceptor::Handle(i) => i.intercept(kevt),
        }
    }
}
