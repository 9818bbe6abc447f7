use std::{env, ffi::OsString, path::PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};

pub const NAME: &str = "kmon";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Kernel event monitor")]
#[clap(version = crate::metadata::VERSION)]
#[clap(disable_help_subcommand = true)]
pub struct KmonOpts {
    #[command(subcommand)]
    pub command: Command,

    /// Pass many times for a more verbose output. Passing `-v` adds debug logs, `-vv` enables trace logging
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl KmonOpts {
    pub fn log_level(&self) -> log::LevelFilter {
        log_level_from_verbosity_flag_count(self.verbose)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Consume kernel event streams through the interceptor chain
    Run(RunOpts),
    /// List the known kernel event types
    Ktypes,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunOpts {
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// JSON lines file with decoded kernel events, `-` for stdin. Every source
    /// is consumed by its own session thread.
    #[arg(long = "source", value_name = "PATH")]
    pub sources: Vec<String>,

    /// Write retained events to this capture file instead of the console.
    #[arg(long, value_name = "PATH")]
    pub kcap: Option<PathBuf>,
}

pub fn parse_from_args() -> KmonOpts {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> KmonOpts
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    try_parse_from(args).unwrap_or_else(|e| e.exit())
}

pub fn try_parse_from<I, T>(args: I) -> Result<KmonOpts, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    KmonOpts::try_parse_from(args)
}

fn log_level_from_verbosity_flag_count(num: u8) -> log::LevelFilter {
    match num {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u8::MAX => log::LevelFilter::Trace,
    }
}

fn show_backtrace() -> bool {
    if log::max_level() >= log::LevelFilter::Debug {
        return true;
    }

    if let Ok(true) = env::var("RUST_BACKTRACE").map(|s| s == "1") {
        return true;
    }

    false
}

pub fn report_error(e: &anyhow::Error) {
    // Alternate form prints the whole context chain on one line, the debug
    // form adds the backtrace when one was captured.
    if show_backtrace() {
        log::error!("{:?}", e);
    } else {
        log::error!("{:#}", e);
    }
}
