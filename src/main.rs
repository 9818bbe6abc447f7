use anyhow::Result;
use kmon::{
    cli::{self, Command},
    kmond,
    term_print::TermPrintable,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse cli and handle clap errors
    let options = cli::parse_from_args();

    // Override the default log_level if there is a greater verbosity flag
    kmon::init_logger(Some(options.log_level()));

    let result = match &options.command {
        Command::Run(run_opts) => kmond::kmond_run(run_opts).await,
        Command::Ktypes => kmon::term_print::ktypes_table().term_print().map(|_| ()),
    };

    match result {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            cli::report_error(&e);
            std::process::exit(1);
        }
    }
}
