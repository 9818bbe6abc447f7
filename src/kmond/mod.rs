use std::{
    io::{self, IsTerminal},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use interceptors::{ChainBuilder, Collaborators};
use kmon_core::{
    Metrics,
    handle::{HandleTable, ObjectTypeStore},
    ps::ProcessTracker,
    scanner::{PatternScanner, Scanner},
};
use tokio::task::JoinSet;

use crate::cli::{RunOpts, report_error};

mod config;
mod consumer;
mod sink;
mod source;

pub use config::KmonConfig;
pub use consumer::{Consumer, Outcome};
pub use sink::{CaptureWriter, ConsoleSink, Sink};
pub use source::{KeventSource, STDIN};

/// How long in-flight sessions get to finish once the stop flag is set.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn kmond_run(options: &RunOpts) -> Result<()> {
    log::trace!("kmon daemon options: {:?}", options);

    let config = if let Some(custom_file) = &options.config_file {
        KmonConfig::with_custom_file(custom_file)?
    } else {
        KmonConfig::new()?
    };

    let kstream = config.kstream()?;
    let scanner_config = config.scanner()?;
    let kcap = match &options.kcap {
        Some(kcap) => Some(kcap.clone()),
        None => config.kcap_file()?,
    };

    let metrics = Arc::new(Metrics::new());
    let collaborators = Collaborators {
        psnap: Arc::new(ProcessTracker::new()),
        hsnap: Some(Arc::new(HandleTable::new())),
        devmapper: Arc::new(config.devices()),
        object_types: Some(Arc::new(ObjectTypeStore::default())),
        metrics: metrics.clone(),
    };
    let mut builder = ChainBuilder::new(&kstream, collaborators);
    if scanner_config.enabled {
        builder = builder.with_scanner(|| {
            let scanner = PatternScanner::new(&scanner_config)?;
            Ok(Arc::new(scanner) as Arc<dyn Scanner>)
        });
    }
    let chain = builder
        .build()
        .context("Error building the interceptor chain")?;
    let chain = Arc::new(chain);
    log::info!("interceptor chain: {}", chain.names().join(" -> "));

    let sink: Arc<dyn Sink> = match &kcap {
        Some(path) => Arc::new(CaptureWriter::create(path)?),
        None => Arc::new(
            ConsoleSink::new(config.output_format()?).with_colors(io::stdout().is_terminal()),
        ),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let sources = if options.sources.is_empty() {
        vec![STDIN.to_string()]
    } else {
        options.sources.clone()
    };

    let mut sessions = JoinSet::new();
    for path in sources {
        let source = KeventSource::open(&path, stop.clone())?;
        let consumer = Consumer::new(chain.clone(), sink.clone(), metrics.clone(), kcap.is_some());
        sessions.spawn_blocking(move || {
            consumer
                .run(source)
                .with_context(|| format!("Error consuming kernel events from {path}"))
        });
    }

    let interrupted = tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("Error waiting for the interrupt signal")?;
            true
        }
        _ = join_sessions(&mut sessions) => false,
    };

    if interrupted {
        log::info!("Terminating kmon...");
        stop.store(true, Ordering::Relaxed);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_sessions(&mut sessions))
            .await
            .is_err()
        {
            log::warn!("Some sessions didn't stop in time, forcing shutdown");
        }
    } else {
        log::debug!("all sources exhausted");
    }

    if let Err(err) = sink.flush() {
        report_error(&err);
    }
    log::info!("{}", metrics.snapshot());

    Ok(())
}

async fn join_sessions(sessions: &mut JoinSet<Result<()>>) {
    while let Some(session) = sessions.join_next().await {
        match session {
            Ok(Ok(())) => {}
            Ok(Err(err)) => report_error(&err),
            Err(err) => log::error!("session thread failed: {err}"),
        }
    }
}
