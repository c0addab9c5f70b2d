//! Run a recording session, controlled from stdin.

use std::sync::Arc;
use std::time::Duration;

use ducktrack_capture_engine::{ControlReport, SessionCoordinator, StopReport};
use ducktrack_common::config::AppConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::Dispatch;

pub async fn run(config: AppConfig, dispatch: Dispatch) -> anyhow::Result<()> {
    println!("Starting recording session");
    println!("  Output: {}", config.recordings_dir.display());
    println!("  Video backend: {:?}", config.video.backend);
    println!("  Natural scrolling: {}", config.capture.natural_scrolling);
    println!();

    let coordinator = Arc::new(
        SessionCoordinator::from_app_config(&config)
            .dispatch(dispatch)
            .build(),
    );

    let starter = coordinator.clone();
    tokio::task::spawn_blocking(move || starter.start()).await??;

    if let Some(dir) = coordinator.session_dir() {
        println!("Recording into {}", dir.display());
    }
    println!("Commands: pause, resume, stop (or Ctrl+C)");
    println!();

    let (report, input_error) = drive(coordinator, BufReader::new(tokio::io::stdin())).await?;
    print_report(&report);

    if let Some(e) = input_error {
        return Err(anyhow::Error::from(e).context("Failed to read commands from stdin"));
    }
    if let Some(fault) = report.fault {
        anyhow::bail!("Recording aborted: {fault}");
    }
    Ok(())
}

/// Apply commands from `input` until a stop is requested, the session ends
/// on its own, or `input` fails. The session is stopped on every path.
async fn drive(
    coordinator: Arc<SessionCoordinator>,
    input: impl AsyncBufRead + Unpin,
) -> anyhow::Result<(StopReport, Option<std::io::Error>)> {
    let watcher = coordinator.clone();
    let mut stopped = tokio::task::spawn_blocking(move || {
        while !watcher.wait_until_stopped(Duration::from_millis(500)) {}
    });

    let mut lines = input.lines();
    let mut input_open = true;
    let mut input_error = None;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "pause" | "p" => print_control("pause", &coordinator.pause()),
                    "resume" | "r" => print_control("resume", &coordinator.resume()),
                    "stop" | "s" | "q" => break,
                    "" => {}
                    other => println!("Unknown command '{other}' (pause, resume, stop)"),
                },
                Ok(None) => {
                    tracing::debug!("stdin closed; waiting for Ctrl+C");
                    input_open = false;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Command input failed; stopping");
                    input_error = Some(e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            _ = &mut stopped => {
                println!("Session ended on its own");
                break;
            }
        }
    }

    let report = tokio::task::spawn_blocking(move || coordinator.stop()).await?;
    Ok((report, input_error))
}

fn print_control(command: &str, report: &ControlReport) {
    if report.transition.is_applied() {
        println!("Recording {}", report.transition.state());
    } else {
        println!(
            "Ignored {command}: session is {}",
            report.transition.state()
        );
    }
    if let Some(err) = &report.backend_error {
        println!("  [WARN] {err}");
    }
}

fn print_report(report: &StopReport) {
    println!("Recording stopped");
    if let Some(dir) = &report.session_dir {
        println!("  Session: {}", dir.display());
    }
    println!("  Events written: {}", report.events_written);
    println!(
        "  Accepted: {}  Dropped while paused: {}  Write failures: {}  Listener restarts: {}",
        report.stats.accepted,
        report.stats.gated_out,
        report.stats.write_failures,
        report.stats.listener_restarts
    );
    for (state, stamps) in report.record_state_events.iter() {
        let stamps: Vec<String> = stamps.iter().map(|t| format!("{t:.3}")).collect();
        println!("  Video {state}: {}", stamps.join(", "));
    }
    for err in [&report.backend_error, &report.metadata_error]
        .into_iter()
        .flatten()
    {
        println!("  [WARN] {err}");
    }
}
