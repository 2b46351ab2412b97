use anyhow::{Context, Result};
use gitlab_access_report::{
    audit,
    cli::{global::Command, CommandLineArgs, GlobalArgs},
};
use tokio::runtime::Builder;
use tracing::error;
use tracing_core::metadata::LevelFilter;
use tracing_subscriber::{
    self, fmt, prelude::__tracing_subscriber_SubscriberExt, registry, util::SubscriberInitExt,
};

/// Exit status when the run failed before a report could be written.
const EXIT_FAILURE: i32 = 1;
/// Exit status when the report was written but some projects could not be read.
const EXIT_PARTIAL: i32 = 2;

fn main() -> Result<()> {
    color_backtrace::install();
    let args = CommandLineArgs::parse_args();

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;
    let exit_code = runtime.block_on(async_main(args));
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn setup_logging(global_args: &GlobalArgs) {
    let level = global_args.log_level();
    // `-vvv` or more traces every target, not only this crate
    let filter = if global_args.verbose > 2 && !global_args.quiet {
        tracing_subscriber::filter::Targets::new().with_default(LevelFilter::TRACE)
    } else {
        tracing_subscriber::filter::Targets::new()
            .with_default(LevelFilter::ERROR)
            .with_target("gitlab_access_report", level)
    };
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .without_time();
    registry().with(fmt_layer).with(filter).init();
}

async fn async_main(args: CommandLineArgs) -> i32 {
    setup_logging(&args.global_args);
    match args.command {
        Command::Audit(audit_args) => {
            let aggregation = match audit::run(&args.global_args, &audit_args).await {
                Ok(aggregation) => aggregation,
                Err(err) => {
                    error!("{err:#}");
                    return EXIT_FAILURE;
                }
            };
            if aggregation.is_complete() {
                return 0;
            }
            error!(
                "Membership of {} of {} projects could not be retrieved; the report is incomplete",
                aggregation.failures.len(),
                aggregation.total
            );
            EXIT_PARTIAL
        }
    }
}
