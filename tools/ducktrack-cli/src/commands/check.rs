//! Check that a session could start on this machine.

use std::process::Command;

use ducktrack_common::config::{config_file_path, AppConfig, BackendKind};
use ducktrack_input_tracker::backends::detect_sources;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("DuckTrack System Check");
    println!("{}", "=".repeat(50));

    let mut all_ok = true;

    // Input listeners
    let sources = detect_sources(&config.capture);
    for factory in [&sources.pointer, &sources.keyboard] {
        match factory.open() {
            Ok(source) => println!("[OK] {} input: {}", factory.kind(), source.name()),
            Err(e) => {
                all_ok = false;
                println!("[FAIL] {} input: {e}", factory.kind());
            }
        }
    }

    // Video backend
    match config.video.backend {
        BackendKind::None => println!("[OK] Video backend: none (events only)"),
        BackendKind::Ffmpeg => {
            let ffmpeg = &config.video.ffmpeg_path;
            match Command::new(ffmpeg).arg("-version").output() {
                Ok(output) if output.status.success() => {
                    let version = String::from_utf8_lossy(&output.stdout);
                    let first = version.lines().next().unwrap_or("ffmpeg");
                    println!("[OK] Video backend: {first}");
                }
                Ok(output) => {
                    all_ok = false;
                    println!(
                        "[FAIL] Video backend: {} -version exited with {}",
                        ffmpeg.display(),
                        output.status
                    );
                }
                Err(e) => {
                    all_ok = false;
                    println!(
                        "[FAIL] Video backend: cannot run {}: {e}",
                        ffmpeg.display()
                    );
                }
            }
        }
    }

    println!();
    println!("Config file: {}", config_file_path().display());
    println!("Recordings: {}", config.recordings_dir.display());

    println!();
    if all_ok {
        println!("All checks passed. DuckTrack is ready to record.");
    } else {
        println!("Some checks failed. See above for fixes.");
    }

    Ok(())
}
