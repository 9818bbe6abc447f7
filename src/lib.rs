//! kmon is a kernel event monitor. It consumes the decoded kernel event
//! streams of one or more tracing sessions and pushes every event through
//! the interceptor chain before delivering it to the console or to a
//! capture file.
//!
//! The moving parts live in separate crates:
//!
//! - [`kmon_core`]: the kernel event types registry, the event model and the
//!   in-memory collaborators (process and handle snapshotters, device mapper,
//!   scan engine)
//! - [`interceptors`]: the interceptor chain and its builder
//!
//! This crate glues them together in the [daemon](crate::kmond) and the
//! [cli](crate::cli).
//!
//! ```sh
//! # Consume events from stdin
//! kmon run
//!
//! # Consume two sessions and write a capture
//! kmon run --source kernel.jsonl --source rundown.jsonl --kcap out.kcap
//!
//! # List the known kernel event types
//! kmon ktypes
//! ```

pub mod cli;
pub mod kmond;
pub mod term_print;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder()
            .filter_level(level_filter)
            .format_timestamp(None)
            .format_module_path(false)
            .init();
    }
}
