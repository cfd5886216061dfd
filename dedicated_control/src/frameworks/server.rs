// Framework bootstrap and host loop for the dedicated control runtime.

use crate::domain::{Command, ControlError, RandomSource, RoundPhase, Signal};
use crate::frameworks::config;
use crate::interface_adapters::protocol::{decode_signal, encode_command};
use crate::interface_adapters::utils::rng::EntropyRandom;
use crate::use_cases::Controller;

use std::fs::{File, OpenOptions};
use std::io::{self, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("failed to open {}: {e}", path.display())))
}

fn init_runtime(log_file: &Path, error_file: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries host commands, so the console goes to stderr.
    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    let console = if json {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .json()
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
            .boxed()
    };

    let log = fmt::layer()
        .with_writer(Mutex::new(open_append(log_file)?))
        .with_ansi(false)
        .with_target(false)
        .with_filter(LevelFilter::INFO);

    let errors = fmt::layer()
        .with_writer(Mutex::new(open_append(error_file)?))
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(console.with_filter(filter))
        .with(log)
        .with(errors)
        .try_init()
        .map_err(|e| io::Error::other(format!("failed to initialize logging: {e}")))?;

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
    Ok(())
}

/// Drives the controller from line-delimited host input until it quits.
///
/// With `tick_interval` set, an internal heartbeat feeds `Tick` signals
/// carrying the measured time between beats; otherwise only host ticks
/// advance time.
pub async fn run<I, O, R>(
    input: I,
    mut output: O,
    mut controller: Controller<R>,
    tick_interval: Option<Duration>,
) -> Result<()>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
    R: RandomSource,
{
    let mut lines = input.lines();
    let mut heartbeat = tokio::time::interval(tick_interval.unwrap_or(Duration::from_secs(3600)));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    let mut last_beat = heartbeat.tick().await;
    let mut input_closed = false;

    while controller.phase() != RoundPhase::Quit && !input_closed {
        let (signal, elapsed) = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match decode_signal(line) {
                        Ok(decoded) => decoded,
                        Err(error) => {
                            warn!(%error, "host signal skipped");
                            continue;
                        }
                    }
                }
                Ok(None) => {
                    info!("host input closed");
                    input_closed = true;
                    (Signal::Shutdown, Duration::ZERO)
                }
                Err(error) => {
                    error!(%error, "host input failed");
                    input_closed = true;
                    (Signal::Shutdown, Duration::ZERO)
                }
            },
            now = heartbeat.tick(), if tick_interval.is_some() => {
                let elapsed = now.duration_since(last_beat);
                last_beat = now;
                (Signal::Tick, elapsed)
            }
        };

        let commands = dispatch(&mut controller, signal, elapsed);
        write_commands(&mut output, commands).await;
    }

    info!(phase = %controller.phase(), "host loop finished");
    Ok(())
}

// A panic inside the control logic drops that signal only.
fn dispatch<R: RandomSource>(
    controller: &mut Controller<R>,
    signal: Signal,
    elapsed: Duration,
) -> Vec<Command> {
    debug!(?signal, ?elapsed, "signal");
    match catch_unwind(AssertUnwindSafe(|| controller.handle_signal(signal, elapsed))) {
        Ok(commands) => commands,
        Err(_) => {
            error!("control logic failed; signal dropped");
            Vec::new()
        }
    }
}

async fn write_commands<O: AsyncWrite + Unpin>(output: &mut O, commands: Vec<Command>) {
    for command in commands {
        let line = match encode_command(command) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to serialize command");
                continue;
            }
        };
        // Commands are fire-and-forget; core state is never rolled back.
        if let Err(e) = write_line(output, &line).await {
            let error = ControlError::HostCommandFailed(e.to_string());
            error!(%error, "failed to send command to host");
        }
    }
}

async fn write_line<O: AsyncWrite + Unpin>(output: &mut O, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

pub async fn run_with_config() -> Result<()> {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_runtime(&config::log_file(), &config::error_file())?;

    let path = config::config_path();
    let server_config = config::load_server_config(&path).inspect_err(|e| {
        tracing::error!(error = %e, "startup failed");
    })?;

    let controller = Controller::new(Arc::new(server_config), EntropyRandom::new());
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    run(input, tokio::io::stdout(), controller, config::tick_interval()).await
}
