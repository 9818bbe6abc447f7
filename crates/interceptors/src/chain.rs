use std::{fmt, sync::Arc};

use kmon_core::{Kevent, Metrics};
use thiserror::Error;

use crate::{Intercept, InterceptError, Interceptor, Next};

/// Error returned by [`InterceptorChain::dispatch`].
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The event was suppressed and must not be delivered downstream.
    #[error("kevent cancelled upstream by \"{interceptor}\" interceptor")]
    CancelUpstream { interceptor: &'static str },
    /// One or more interceptors failed. The event went through the whole chain.
    #[error(transparent)]
    Interceptors(InterceptorFailures),
}

impl DispatchError {
    pub fn is_cancel_upstream(&self) -> bool {
        matches!(self, DispatchError::CancelUpstream { .. })
    }
}

#[derive(Error, Debug)]
#[error("\"{interceptor}\" interceptor failed with error: {error}")]
pub struct InterceptorFailure {
    pub interceptor: &'static str,
    pub error: InterceptError,
}

/// Failures accumulated along a single dispatch, in chain order.
#[derive(Debug, Default)]
pub struct InterceptorFailures(Vec<InterceptorFailure>);

impl InterceptorFailures {
    pub fn iter(&self) -> impl Iterator<Item = &InterceptorFailure> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InterceptorFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InterceptorFailures {}

/// Ordered, immutable sequence of interceptors.
///
/// The chain holds no mutable state, so it can be shared by reference between
/// consumer threads. Synchronization lives in the collaborators.
pub struct InterceptorChain<I = Interceptor> {
    interceptors: Vec<I>,
    metrics: Arc<Metrics>,
}

impl<I: Intercept> InterceptorChain<I> {
    pub fn new(interceptors: Vec<I>, metrics: Arc<Metrics>) -> Self {
        Self {
            interceptors,
            metrics,
        }
    }

    /// Names of the interceptors in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Pushes the kernel event through the interceptors.
    ///
    /// A failing interceptor never stops the chain: its error is recorded and
    /// the next interceptor runs, whatever [`Next`] it returned. A
    /// cancel-upstream signal is not a failure and the chain stops there only
    /// if the interceptor also returned [`Next::Break`]. Failures take
    /// precedence over the cancel-upstream signal in the returned error.
    pub fn dispatch(&self, kevt: &mut Kevent) -> Result<(), DispatchError> {
        let mut failures = Vec::new();
        let mut cancelled_by = None;

        for interceptor in &self.interceptors {
            let (next, result) = interceptor.intercept(kevt);
            match result {
                Err(InterceptError::CancelUpstream) => {
                    log::trace!(
                        "{} kevent (seq={}) cancelled by {} interceptor",
                        kevt.ktype(),
                        kevt.seq,
                        interceptor.name()
                    );
                    cancelled_by = Some(interceptor.name());
                }
                Err(error) => {
                    self.metrics.inc_interceptor_failures();
                    failures.push(InterceptorFailure {
                        interceptor: interceptor.name(),
                        error,
                    });
                    continue;
                }
                Ok(()) => {}
            }
            if next == Next::Break {
                break;
            }
        }

        if !failures.is_empty() {
            return Err(DispatchError::Interceptors(InterceptorFailures(failures)));
        }
        match cancelled_by {
            Some(interceptor) => Err(DispatchError::CancelUpstream { interceptor }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use kmon_core::{KparamsError, kparams, ktypes};

    use super::*;

    #[derive(Clone, Copy)]
    enum Outcome {
        Ok,
        Fail,
        Cancel,
    }

    /// Interceptor replaying a fixed answer and recording its runs.
    struct Scripted {
        name: &'static str,
        next: Next,
        outcome: Outcome,
        calls: AtomicUsize,
        trace: Option<Arc<Mutex<Vec<&'static str>>>>,
    }

    impl Scripted {
        fn new(name: &'static str, next: Next, outcome: Outcome) -> Self {
            Self {
                name,
                next,
                outcome,
                calls: AtomicUsize::new(0),
                trace: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Intercept for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn intercept(&self, kevt: &mut Kevent) -> crate::Intercepted {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(trace) = &self.trace {
                trace.lock().unwrap().push(self.name);
            }
            kevt.kparams.insert(self.name, true);
            let result = match self.outcome {
                Outcome::Ok => Ok(()),
                Outcome::Fail => Err(InterceptError::Kparams(KparamsError::NotFound(
                    kparams::FILE_OBJECT.to_string(),
                ))),
                Outcome::Cancel => Err(InterceptError::CancelUpstream),
            };
            (self.next, result)
        }
    }

    fn chain(interceptors: Vec<Scripted>) -> (InterceptorChain<Scripted>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (
            InterceptorChain::new(interceptors, metrics.clone()),
            metrics,
        )
    }

    fn kevent() -> Kevent {
        Kevent::new(1, 4321, 4400, ktypes::CREATE_FILE)
    }

    #[test]
    fn empty_chain() {
        let (chain, metrics) = chain(Vec::new());
        let mut kevt = kevent();
        let original = kevt.clone();

        assert!(chain.dispatch(&mut kevt).is_ok());
        assert_eq!(kevt, original);
        assert!(chain.is_empty());
        assert_eq!(metrics.interceptor_failures(), 0);
    }

    #[test]
    fn runs_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let interceptors = ["a", "b", "c"]
            .into_iter()
            .map(|name| Scripted {
                trace: Some(trace.clone()),
                ..Scripted::new(name, Next::Continue, Outcome::Ok)
            })
            .collect();
        let (chain, _) = chain(interceptors);

        let mut kevt = kevent();
        assert!(chain.dispatch(&mut kevt).is_ok());
        assert_eq!(*trace.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
        for name in ["a", "b", "c"] {
            assert_eq!(kevt.kparams.get_bool(name), Ok(true));
        }
    }

    #[test]
    fn early_stop_without_error() {
        let (chain, metrics) = chain(vec![
            Scripted::new("first", Next::Continue, Outcome::Ok),
            Scripted::new("second", Next::Break, Outcome::Ok),
            Scripted::new("third", Next::Continue, Outcome::Ok),
        ]);

        let mut kevt = kevent();
        assert!(chain.dispatch(&mut kevt).is_ok());
        assert_eq!(chain.interceptors[2].calls(), 0);
        assert!(!kevt.kparams.contains("third"));
        assert_eq!(metrics.interceptor_failures(), 0);
    }

    #[test]
    fn failure_does_not_stop_the_chain() {
        let (chain, metrics) = chain(vec![
            Scripted::new("first", Next::Continue, Outcome::Ok),
            Scripted::new("second", Next::Break, Outcome::Fail),
            Scripted::new("third", Next::Continue, Outcome::Ok),
        ]);

        let mut kevt = kevent();
        let err = chain.dispatch(&mut kevt).unwrap_err();
        assert_eq!(chain.interceptors[2].calls(), 1);
        assert_eq!(metrics.interceptor_failures(), 1);

        let DispatchError::Interceptors(failures) = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(
            err.to_string(),
            "\"second\" interceptor failed with error: kparam file_object not found"
        );
    }

    #[test]
    fn cancel_upstream_honors_break() {
        let (chain, metrics) = chain(vec![
            Scripted::new("first", Next::Continue, Outcome::Ok),
            Scripted::new("second", Next::Break, Outcome::Cancel),
            Scripted::new("third", Next::Continue, Outcome::Ok),
        ]);

        let mut kevt = kevent();
        let err = chain.dispatch(&mut kevt).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::CancelUpstream {
                interceptor: "second"
            }
        ));
        assert!(err.is_cancel_upstream());
        assert_eq!(chain.interceptors[2].calls(), 0);
        assert_eq!(metrics.interceptor_failures(), 0);
    }

    #[test]
    fn cancel_upstream_honors_continue() {
        let (chain, _) = chain(vec![
            Scripted::new("first", Next::Continue, Outcome::Cancel),
            Scripted::new("second", Next::Continue, Outcome::Ok),
        ]);

        let mut kevt = kevent();
        let err = chain.dispatch(&mut kevt).unwrap_err();
        assert!(err.is_cancel_upstream());
        assert_eq!(chain.interceptors[1].calls(), 1);
    }

    #[test]
    fn most_recent_cancel_upstream_wins() {
        let (chain, _) = chain(vec![
            Scripted::new("first", Next::Continue, Outcome::Cancel),
            Scripted::new("second", Next::Break, Outcome::Cancel),
        ]);

        let err = chain.dispatch(&mut kevent()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::CancelUpstream {
                interceptor: "second"
            }
        ));
    }

    #[test]
    fn failures_take_precedence_over_cancel_upstream() {
        let (chain, metrics) = chain(vec![
            Scripted::new("first", Next::Continue, Outcome::Cancel),
            Scripted::new("second", Next::Continue, Outcome::Fail),
        ]);

        let err = chain.dispatch(&mut kevent()).unwrap_err();
        assert!(!err.is_cancel_upstream());
        assert!(err.to_string().contains("\"second\" interceptor failed"));
        assert_eq!(metrics.interceptor_failures(), 1);
    }

    #[test]
    fn failures_accumulate() {
        let (chain, metrics) = chain(vec![
            Scripted::new("first", Next::Break, Outcome::Fail),
            Scripted::new("second", Next::Continue, Outcome::Ok),
            Scripted::new("third", Next::Break, Outcome::Fail),
        ]);

        let mut kevt = kevent();
        let Err(DispatchError::Interceptors(failures)) = chain.dispatch(&mut kevt) else {
            panic!("expected interceptor failures");
        };
        let names: Vec<_> = failures.iter().map(|f| f.interceptor).collect();
        assert_eq!(names, vec!["first", "third"]);
        assert_eq!(metrics.interceptor_failures(), 2);
        assert!(kevt.kparams.contains("second"));

        // the counter keeps growing across dispatches
        let _ = chain.dispatch(&mut kevt);
        assert_eq!(metrics.interceptor_failures(), 4);
    }

    #[test]
    fn ktype_is_preserved() {
        let (chain, _) = chain(vec![Scripted::new("first", Next::Continue, Outcome::Ok)]);
        let mut kevt = kevent();
        chain.dispatch(&mut kevt).unwrap();
        assert_eq!(kevt.ktype(), ktypes::CREATE_FILE);
    }
}
