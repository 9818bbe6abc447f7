use std::sync::Arc;

use anyhow::Result;
use interceptors::{DispatchError, InterceptorChain};
use kmon_core::{Kevent, Metrics};

use super::{sink::Sink, source::KeventSource};

/// What happened to a consumed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not a known kernel event type, never dispatched.
    Unknown,
    /// An interceptor asked to keep it away from the sinks.
    Cancelled,
    /// Rundown event outside of capture mode.
    Dropped,
    Delivered,
}

/// Per-session event loop: dispatches every event through the shared chain
/// and hands the retained ones to the sink.
pub struct Consumer {
    chain: Arc<InterceptorChain>,
    sink: Arc<dyn Sink>,
    metrics: Arc<Metrics>,
    capture: bool,
}

impl Consumer {
    pub fn new(
        chain: Arc<InterceptorChain>,
        sink: Arc<dyn Sink>,
        metrics: Arc<Metrics>,
        capture: bool,
    ) -> Self {
        Self {
            chain,
            sink,
            metrics,
            capture,
        }
    }

    pub fn consume(&self, mut kevt: Kevent) -> Result<Outcome> {
        let ktype = kevt.ktype();
        if !ktype.exists() {
            log::trace!(target: "kmon::consumer", "unknown kernel event type {:?}", ktype);
            self.metrics.inc_kevents_unknown();
            return Ok(Outcome::Unknown);
        }

        match self.chain.dispatch(&mut kevt) {
            Ok(()) => {}
            Err(DispatchError::CancelUpstream { interceptor }) => {
                log::trace!(
                    target: "kmon::consumer",
                    "{} event {} cancelled by the {interceptor} interceptor",
                    kevt.name(),
                    kevt.seq
                );
                self.metrics.inc_kevents_cancelled();
                return Ok(Outcome::Cancelled);
            }
            Err(err @ DispatchError::Interceptors(_)) => {
                log::warn!("{} event {}: {err}", kevt.name(), kevt.seq);
            }
        }

        if ktype.is_output_dropped(self.capture) {
            self.metrics.inc_kevents_dropped();
            return Ok(Outcome::Dropped);
        }
        self.sink.deliver(&kevt)?;
        self.metrics.inc_kevents_processed();
        Ok(Outcome::Delivered)
    }

    /// Consumes the source until it's exhausted or stopped.
    pub fn run(&self, mut source: KeventSource) -> Result<()> {
        log::info!("consuming kernel events from {}", source.name());
        while let Some(kevt) = source.next_kevent()? {
            self.consume(kevt)?;
        }
        log::info!("{} exhausted", source.name());
        Ok(())
    }
}
