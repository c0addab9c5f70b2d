//! Screen recording through an `ffmpeg` child process.
//!
//! ffmpeg has no pause control, so the process is suspended with SIGSTOP
//! and continued with SIGCONT. Stopping sends `q` on stdin, which makes
//! ffmpeg finalize the container, and falls back to killing the process if
//! it does not exit within the configured grace period.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use ducktrack_common::config::VideoSettings;
use ducktrack_common::error::{DucktrackError, DucktrackResult};

use super::{RecordingBackend, StateNotifier};

/// File ffmpeg's stderr is redirected to inside the session directory.
const FFMPEG_LOG_FILE: &str = "ffmpeg.log";

/// How long ffmpeg must survive after spawn to count as started.
const STARTUP_PROBE: Duration = Duration::from_millis(300);

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Arguments for recording the whole desktop into `output`.
pub fn capture_args(settings: &VideoSettings, output: &Path) -> Vec<String> {
    let fps = settings.fps.max(1).to_string();
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];

    if cfg!(target_os = "macos") {
        let input = non_empty(&settings.display).unwrap_or_else(|| "1:none".to_string());
        args.extend(["-f", "avfoundation", "-framerate"].map(String::from));
        args.push(fps);
        args.extend(["-capture_cursor".to_string(), "1".to_string(), "-i".to_string(), input]);
    } else if cfg!(target_os = "windows") {
        let input = non_empty(&settings.display).unwrap_or_else(|| "desktop".to_string());
        args.extend(["-f", "gdigrab", "-framerate"].map(String::from));
        args.push(fps);
        args.extend(["-i".to_string(), input]);
    } else {
        let input = non_empty(&settings.display)
            .or_else(|| std::env::var("DISPLAY").ok().filter(|d| !d.is_empty()))
            .unwrap_or_else(|| ":0.0".to_string());
        args.extend(["-f", "x11grab", "-framerate"].map(String::from));
        args.push(fps);
        args.extend(["-i".to_string(), input]);
    }

    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-pix_fmt",
            "yuv420p",
            "-y",
        ]
        .map(String::from),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Drives one ffmpeg process per session.
pub struct FfmpegBackend {
    settings: VideoSettings,
    child: Option<Child>,
    notifier: Option<StateNotifier>,
    output: Option<PathBuf>,
    paused: bool,
}

impl FfmpegBackend {
    pub fn new(settings: VideoSettings) -> Self {
        Self {
            settings,
            child: None,
            notifier: None,
            output: None,
            paused: false,
        }
    }

    /// Path of the video file being written, once capture has begun.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    fn notify(&self, state: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(state);
        }
    }

    fn running_child(&mut self) -> DucktrackResult<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| DucktrackError::backend("ffmpeg is not running"))
    }

    /// Wait up to `timeout` for the child to exit on its own.
    fn wait_exit(child: &mut Child, timeout: Duration) -> DucktrackResult<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status.code().unwrap_or(-1)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(EXIT_POLL);
        }
    }
}

impl RecordingBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn begin_capture(
        &mut self,
        session_dir: &Path,
        notifier: StateNotifier,
    ) -> DucktrackResult<()> {
        if self.child.is_some() {
            return Err(DucktrackError::backend("ffmpeg is already recording"));
        }

        let output = session_dir.join(&self.settings.output_file);
        let args = capture_args(&self.settings, &output);
        let log = File::create(session_dir.join(FFMPEG_LOG_FILE))?;

        tracing::info!(
            ffmpeg = %self.settings.ffmpeg_path.display(),
            output = %output.display(),
            "Starting screen recording"
        );
        tracing::debug!(?args, "ffmpeg arguments");

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| {
                DucktrackError::backend(format!(
                    "failed to launch {}: {e}",
                    self.settings.ffmpeg_path.display()
                ))
            })?;

        // ffmpeg fails fast on a bad display or missing encoder.
        if let Some(code) = Self::wait_exit(&mut child, STARTUP_PROBE)? {
            return Err(DucktrackError::backend(format!(
                "ffmpeg exited during startup with status {code}; see {}",
                session_dir.join(FFMPEG_LOG_FILE).display()
            )));
        }

        self.child = Some(child);
        self.output = Some(output);
        self.paused = false;
        self.notifier = Some(notifier);
        self.notify("started");
        Ok(())
    }

    fn pause_capture(&mut self) -> DucktrackResult<()> {
        let child = self.running_child()?;
        signal::suspend(child.id())?;
        self.paused = true;
        self.notify("paused");
        Ok(())
    }

    fn resume_capture(&mut self) -> DucktrackResult<()> {
        let child = self.running_child()?;
        signal::resume(child.id())?;
        self.paused = false;
        self.notify("resumed");
        Ok(())
    }

    fn end_capture(&mut self) -> DucktrackResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if self.paused {
            if let Err(e) = signal::resume(child.id()) {
                tracing::warn!(error = %e, "Failed to continue suspended ffmpeg before stop");
            }
            self.paused = false;
        }

        // `q` asks ffmpeg to stop reading input and write the trailer.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").and_then(|()| stdin.flush()) {
                tracing::warn!(error = %e, "Failed to send quit to ffmpeg");
            }
        }

        let timeout = self.settings.stop_timeout();
        let result = match Self::wait_exit(&mut child, timeout)? {
            Some(0) => {
                tracing::info!("Screen recording finalized");
                Ok(())
            }
            Some(code) => {
                tracing::warn!(code, "ffmpeg exited with an error status");
                Err(DucktrackError::backend(format!(
                    "ffmpeg exited with status {code}"
                )))
            }
            None => {
                tracing::warn!(?timeout, "ffmpeg did not exit in time; killing it");
                let _ = child.kill();
                let _ = child.wait();
                Err(DucktrackError::backend(format!(
                    "ffmpeg did not finalize within {}ms and was killed; the video may be truncated",
                    timeout.as_millis()
                )))
            }
        };

        self.notify("stopped");
        self.notifier = None;
        result
    }
}

impl Drop for FfmpegBackend {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!("Killing ffmpeg left running by an unfinished session");
            if self.paused {
                let _ = signal::resume(child.id());
            }
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
mod signal {
    use ducktrack_common::error::{DucktrackError, DucktrackResult};

    pub fn suspend(pid: u32) -> DucktrackResult<()> {
        send(pid, libc::SIGSTOP, "suspend")
    }

    pub fn resume(pid: u32) -> DucktrackResult<()> {
        send(pid, libc::SIGCONT, "resume")
    }

    fn send(pid: u32, sig: libc::c_int, what: &str) -> DucktrackResult<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| DucktrackError::backend(format!("invalid ffmpeg pid {pid}")))?;
        if unsafe { libc::kill(pid, sig) } != 0 {
            let err = std::io::Error::last_os_error();
            return Err(DucktrackError::backend(format!(
                "failed to {what} ffmpeg (pid {pid}): {err}"
            )));
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod signal {
    use ducktrack_common::error::{DucktrackError, DucktrackResult};

    pub fn suspend(_pid: u32) -> DucktrackResult<()> {
        Err(DucktrackError::unsupported(
            "pausing ffmpeg is not supported on this platform",
        ))
    }

    pub fn resume(_pid: u32) -> DucktrackResult<()> {
        Err(DucktrackError::unsupported(
            "resuming ffmpeg is not supported on this platform",
        ))
    }
}
