// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use sincetail::bounded_channel::{self, BoundedReceiver};
use sincetail::init::args::TailArgs;
use sincetail::init::wait;
use sincetail::ledger::ProcessSalt;
use sincetail::{EnrichedRecord, LifecycleController, TailConfig};

const SENDING_QUEUE_SIZE: usize = 1_000;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "sincetail")]
#[command(bin_name = "sincetail")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "SINCETAIL_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    tail: TailArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let config = match opt.tail.build_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration.");
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Failed to run.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(config: TailConfig) -> Result<(), BoxError> {
    let (records_tx, records_rx) = bounded_channel::bounded(SENDING_QUEUE_SIZE);
    let controller = Arc::new(LifecycleController::new(
        config,
        ProcessSalt::generate(),
        records_tx,
    ));

    {
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || controller.register()).await??;
    }

    let mut join_set = JoinSet::new();
    let cancel_token = CancellationToken::new();

    // Ends once the tailer thread drops the last sender
    join_set.spawn(write_records(records_rx));
    controller.start(&mut join_set, &cancel_token)?;

    let result = select! {
        res = signal_wait() => {
            info!("Shutdown signal received.");
            res
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            match e {
                Ok(()) => {
                    warn!("Unexpected early exit of task.");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        },
    };

    cancel_token.cancel();
    wait::wait_for_tasks_with_timeout(&mut join_set, SHUTDOWN_TIMEOUT).await?;

    result
}

/// Write each record as one JSON line on stdout.
async fn write_records(mut records: BoundedReceiver<EnrichedRecord>) -> Result<(), BoxError> {
    let mut stdout = BufWriter::new(tokio::io::stdout());

    while let Some(record) = records.next().await {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;

        if records.is_empty() {
            stdout.flush().await?;
        }
    }

    stdout.flush().await?;
    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

// Logs go to stderr, stdout carries records
fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("opentelemetry=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

async fn signal_wait() -> Result<(), BoxError> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
