//! Recording session coordinator.
//!
//! [`SessionCoordinator`] owns every resource a session acquires (session
//! directory, log writer thread, both listener threads, the recording
//! backend) and releases each of them exactly once, whichever way the
//! session ends: an explicit `stop()`, a listener that gave up, or the
//! coordinator being dropped.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ducktrack_common::clock::{ProcessClock, SharedClock};
use ducktrack_common::config::{AppConfig, CaptureSettings};
use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::{EventRecord, InputAction, RecordStateTimings};
use ducktrack_input_tracker::backends::{detect_sources, SourceSet};
use ducktrack_input_tracker::listener::FatalHandler;
use ducktrack_input_tracker::{
    event_queue, CaptureStats, EventLogWriter, EventSender, ListenerContext, ListenerHandle,
    ListenerKind, StatsSnapshot, WriterHandle,
};
use parking_lot::{Condvar, Mutex};
use tracing::Dispatch;

use crate::backend::{
    backend_for, state_channel, NullBackend, RecordingBackend, StateInbox, StateNotifier,
};
use crate::metadata::{JsonMetadataRecorder, MetadataRecorder};
use crate::session_dir::SessionDirectory;
use crate::state::{SessionState, StateMachine, Transition};

/// Where sessions are written and how capture is tuned.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub recordings_dir: PathBuf,
    pub capture: CaptureSettings,
}

impl SessionConfig {
    pub fn new(recordings_dir: impl Into<PathBuf>) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            capture: CaptureSettings::default(),
        }
    }

    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            recordings_dir: config.recordings_dir.clone(),
            capture: config.capture.clone(),
        }
    }
}

/// Which part of the session an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Listener,
    Backend,
    EventLog,
    Metadata,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Listener => "listener",
            FaultKind::Backend => "backend",
            FaultKind::EventLog => "event log",
            FaultKind::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// An error reported next to a transition that still happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFault {
    pub kind: FaultKind,
    pub message: String,
}

impl SessionFault {
    fn new(kind: FaultKind, err: &DucktrackError) -> Self {
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of `pause()` or `resume()`.
#[derive(Debug, Clone)]
pub struct ControlReport {
    pub transition: Transition,
    /// The backend call failed; the local transition was kept anyway.
    pub backend_error: Option<SessionFault>,
}

/// Result of `stop()`.
#[derive(Debug, Clone)]
pub struct StopReport {
    /// `Applied` only for the caller that performed the teardown.
    pub transition: Transition,
    /// Time of the accepted stop, on the session clock.
    pub stopped_at: Option<f64>,
    pub events_written: u64,
    pub stats: StatsSnapshot,
    /// Why the session ended on its own, if it did.
    pub fault: Option<SessionFault>,
    pub backend_error: Option<SessionFault>,
    pub metadata_error: Option<SessionFault>,
    pub record_state_events: RecordStateTimings,
    pub session_dir: Option<PathBuf>,
}

impl StopReport {
    fn empty(transition: Transition) -> Self {
        Self {
            transition,
            stopped_at: None,
            events_written: 0,
            stats: StatsSnapshot::default(),
            fault: None,
            backend_error: None,
            metadata_error: None,
            record_state_events: RecordStateTimings::new(),
            session_dir: None,
        }
    }

    /// True when nothing went wrong at any stage.
    pub fn is_clean(&self) -> bool {
        self.fault.is_none() && self.backend_error.is_none() && self.metadata_error.is_none()
    }
}

/// Everything `start()` acquired, in acquisition order.
struct SessionResources {
    directory: SessionDirectory,
    shutdown: Arc<AtomicBool>,
    writer: Option<WriterHandle>,
    listeners: Vec<ListenerHandle>,
    inbox: StateInbox,
    backend_started: bool,
}

/// What releasing a [`SessionResources`] produced.
struct Released {
    directory: SessionDirectory,
    inbox: StateInbox,
    events_written: u64,
    backend_error: Option<SessionFault>,
    log_error: Option<SessionFault>,
}

struct Shared {
    state: Arc<StateMachine>,
    clock: SharedClock,
    config: SessionConfig,
    sources: SourceSet,
    backend: Mutex<Box<dyn RecordingBackend>>,
    metadata: Mutex<Box<dyn MetadataRecorder>>,
    dispatch: Dispatch,
    stats: Arc<CaptureStats>,

    /// Serializes `start()` calls.
    start_guard: Mutex<()>,
    resources: Mutex<Option<SessionResources>>,
    /// Producer handle for pause/resume markers.
    markers: Mutex<Option<EventSender>>,
    timings: Mutex<RecordStateTimings>,
    fault: Mutex<Option<SessionFault>>,
    session_dir: Mutex<Option<PathBuf>>,

    /// Set once by whoever performed the teardown.
    teardown: Mutex<Option<StopReport>>,
    teardown_done: Condvar,
}

/// Builder for [`SessionCoordinator`]. Unset parts fall back to the
/// platform input sources, [`NullBackend`], [`JsonMetadataRecorder`], the
/// process clock, and the caller's current tracing dispatcher.
pub struct SessionCoordinatorBuilder {
    config: SessionConfig,
    sources: Option<SourceSet>,
    backend: Option<Box<dyn RecordingBackend>>,
    metadata: Option<Box<dyn MetadataRecorder>>,
    clock: Option<SharedClock>,
    dispatch: Option<Dispatch>,
}

impl SessionCoordinatorBuilder {
    pub fn sources(mut self, sources: SourceSet) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn backend(mut self, backend: Box<dyn RecordingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn metadata(mut self, metadata: Box<dyn MetadataRecorder>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Diagnostics sink for the session and every thread it spawns.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn build(self) -> SessionCoordinator {
        let clock = self.clock.unwrap_or_else(ProcessClock::shared);
        let sources = self
            .sources
            .unwrap_or_else(|| detect_sources(&self.config.capture));
        let metadata = self.metadata.unwrap_or_else(|| {
            Box::new(JsonMetadataRecorder::new(
                self.config.capture.natural_scrolling,
            ))
        });
        let dispatch = self
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));

        let shared = Arc::new(Shared {
            state: Arc::new(StateMachine::new(clock.clone())),
            clock,
            config: self.config,
            sources,
            backend: Mutex::new(self.backend.unwrap_or_else(|| Box::new(NullBackend::new()))),
            metadata: Mutex::new(metadata),
            dispatch,
            stats: Arc::new(CaptureStats::new()),
            start_guard: Mutex::new(()),
            resources: Mutex::new(None),
            markers: Mutex::new(None),
            timings: Mutex::new(RecordStateTimings::new()),
            fault: Mutex::new(None),
            session_dir: Mutex::new(None),
            teardown: Mutex::new(None),
            teardown_done: Condvar::new(),
        });

        SessionCoordinator { shared }
    }
}

/// Control surface for one recording session.
///
/// All methods take `&self` and may be called from any thread.
/// `start()` runs at most once successfully; `Stopped` is terminal.
///
/// Shutdown latency: after the stop transition, listeners notice the
/// shutdown flag within one `listener_idle_ms`, and the writer finishes
/// once the queue is drained, checking for closure at least every
/// `queue_poll_interval_ms`. With the defaults (5 ms and 50 ms) teardown
/// completes within 200 ms plus whatever the backend's `end_capture`
/// takes.
pub struct SessionCoordinator {
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn builder(config: SessionConfig) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            config,
            sources: None,
            backend: None,
            metadata: None,
            clock: None,
            dispatch: None,
        }
    }

    /// A coordinator wired from application config: platform input
    /// sources, the configured video backend, and JSON metadata.
    pub fn from_app_config(config: &AppConfig) -> SessionCoordinatorBuilder {
        Self::builder(SessionConfig::from_app(config)).backend(backend_for(&config.video))
    }

    /// Allocate the session directory, open the event log, register both
    /// listeners, start the backend, then enter `Recording`.
    ///
    /// A failure while acquiring resources rolls back what was acquired so
    /// far and comes back as [`DucktrackError::Startup`] with the state still
    /// `Idle`, so `start()` may be retried. A listener that gives up after
    /// registering but before `Recording` is entered also yields `Startup`,
    /// but the session has been stopped by then and its directory is kept.
    /// Returns a no-op transition if the session was already started.
    pub fn start(&self) -> DucktrackResult<Transition> {
        self.in_scope(|| self.shared.start())
    }

    pub fn pause(&self) -> ControlReport {
        self.in_scope(|| self.shared.control(true))
    }

    pub fn resume(&self) -> ControlReport {
        self.in_scope(|| self.shared.control(false))
    }

    /// Stop the session. Idempotent: one caller performs the teardown and
    /// gets an `Applied` report; concurrent callers block until it has
    /// finished and get the same report as a no-op.
    pub fn stop(&self) -> StopReport {
        self.in_scope(|| self.shared.stop())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The session directory, once `start()` has succeeded.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.shared.session_dir.lock().clone()
    }

    /// First error that ended the session on its own.
    pub fn fault(&self) -> Option<SessionFault> {
        self.shared.fault.lock().clone()
    }

    /// Backend state changes reported so far.
    pub fn record_state_events(&self) -> RecordStateTimings {
        if let Some(resources) = self.shared.resources.lock().as_ref() {
            resources.inbox.collect_into(&mut self.shared.timings.lock());
        }
        self.shared.timings.lock().clone()
    }

    /// Block until the session is `Stopped` (by anyone) or `timeout`
    /// passes. Teardown may still be running when this returns; `stop()`
    /// waits for it.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        self.shared.state.wait_until_stopped(timeout)
    }

    fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.shared.dispatch, f)
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        let report = self.stop();
        if report.transition.is_applied() {
            tracing::dispatcher::with_default(&self.shared.dispatch, || {
                tracing::warn!("Session was still running when dropped; stopped it");
            });
        }
    }
}

impl Shared {
    fn start(self: &Arc<Self>) -> DucktrackResult<Transition> {
        let _guard = self.start_guard.lock();

        let state = self.state.current();
        if state != SessionState::Idle {
            tracing::debug!(%state, "start() ignored");
            return Ok(Transition::NoOp { state });
        }
        *self.fault.lock() = None;

        let resources = self.acquire()?;
        let dir = resources.directory.path().to_path_buf();
        *self.resources.lock() = Some(resources);
        *self.session_dir.lock() = Some(dir.clone());

        let transition = self.state.start();
        tracing::info!(session = %dir.display(), "Recording started");

        // A listener that gave up while the state was still Idle could not
        // stop the session itself. Its resources are live, so this goes
        // through a full teardown and ends in Stopped.
        let startup_fault = self.fault.lock().clone();
        if let Some(fault) = startup_fault {
            self.stop();
            return Err(DucktrackError::startup(format!(
                "session aborted during startup: {fault}"
            )));
        }
        Ok(transition)
    }

    fn acquire(self: &Arc<Self>) -> DucktrackResult<SessionResources> {
        let directory = SessionDirectory::allocate(&self.config.recordings_dir)
            .map_err(DucktrackError::into_startup)?;
        let (notifier, inbox) = state_channel(self.clock.clone());

        let mut resources = SessionResources {
            directory,
            shutdown: Arc::new(AtomicBool::new(false)),
            writer: None,
            listeners: Vec::new(),
            inbox,
            backend_started: false,
        };

        match self.bring_up(&mut resources, notifier) {
            Ok(()) => Ok(resources),
            Err(e) => {
                tracing::error!(error = %e, "Session startup failed; rolling back");
                // Notifications from the aborted attempt are discarded with
                // the inbox.
                let released = self.release(resources);
                released.directory.discard_if_unused();
                Err(e.into_startup())
            }
        }
    }

    fn bring_up(
        self: &Arc<Self>,
        resources: &mut SessionResources,
        notifier: StateNotifier,
    ) -> DucktrackResult<()> {
        let writer = EventLogWriter::open(resources.directory.event_log_path())?;
        let (tx, rx) = event_queue();
        resources.writer = Some(writer.spawn(
            rx,
            self.stats.clone(),
            self.config.capture.queue_poll_interval(),
            self.dispatch.clone(),
        )?);
        *self.markers.lock() = Some(tx.clone());

        for factory in [self.sources.pointer.clone(), self.sources.keyboard.clone()] {
            let ctx = ListenerContext {
                queue: tx.clone(),
                gate: self.state.clone(),
                clock: self.clock.clone(),
                shutdown: resources.shutdown.clone(),
                stats: self.stats.clone(),
                restart_limit: self.config.capture.listener_restart_limit,
                idle_interval: self.config.capture.listener_idle(),
                dispatch: self.dispatch.clone(),
                on_fatal: self.fatal_handler(),
            };
            resources.listeners.push(ListenerHandle::spawn(factory, ctx)?);
        }
        drop(tx);

        let backend_name = {
            let mut backend = self.backend.lock();
            backend.begin_capture(resources.directory.path(), notifier)?;
            backend.name().to_string()
        };
        resources.backend_started = true;

        self.metadata
            .lock()
            .begin(&resources.directory, &backend_name)
    }

    fn fatal_handler(self: &Arc<Self>) -> FatalHandler {
        let weak: Weak<Shared> = Arc::downgrade(self);
        Arc::new(move |kind, err| {
            if let Some(shared) = weak.upgrade() {
                shared.abort(kind, err);
            }
        })
    }

    /// A listener gave up: record why and stop the session from the
    /// listener's own thread.
    fn abort(&self, kind: ListenerKind, err: DucktrackError) {
        {
            let mut fault = self.fault.lock();
            if fault.is_none() {
                *fault = Some(SessionFault::new(FaultKind::Listener, &err));
            }
        }

        let transition = self.state.stop();
        if transition.is_applied() {
            tracing::error!(listener = %kind, error = %err, "Aborting session");
            self.teardown(transition);
        }
    }

    /// The backend lock is held from the transition through the backend
    /// call, so backend calls land in the order their transitions applied
    /// and none can follow `end_capture`.
    fn control(&self, pause: bool) -> ControlReport {
        let mut backend = self.backend.lock();
        let transition = if pause {
            self.state.pause()
        } else {
            self.state.resume()
        };
        let Transition::Applied { to, at, .. } = transition else {
            tracing::debug!(state = %transition.state(), pause, "Control request ignored");
            return ControlReport {
                transition,
                backend_error: None,
            };
        };

        let marker = if pause {
            InputAction::Pause
        } else {
            InputAction::Resume
        };
        if let Some(markers) = self.markers.lock().as_ref() {
            markers.enqueue(EventRecord::new(marker, at));
        }

        let result = if pause {
            backend.pause_capture()
        } else {
            backend.resume_capture()
        };
        drop(backend);
        let backend_error = result.err().map(|e| {
            tracing::warn!(error = %e, state = %to, "Backend call failed; keeping transition");
            SessionFault::new(FaultKind::Backend, &e)
        });

        tracing::info!(state = %to, time_stamp = at, "Recording state changed");
        ControlReport {
            transition,
            backend_error,
        }
    }

    fn stop(&self) -> StopReport {
        let transition = self.state.stop();
        match transition {
            Transition::Applied { .. } => self.teardown(transition),
            Transition::NoOp {
                state: SessionState::Stopped,
            } => {
                let mut teardown = self.teardown.lock();
                loop {
                    if let Some(report) = teardown.as_ref() {
                        let mut report = report.clone();
                        report.transition = transition;
                        return report;
                    }
                    self.teardown_done.wait(&mut teardown);
                }
            }
            Transition::NoOp { .. } => {
                tracing::debug!(state = %transition.state(), "stop() ignored");
                StopReport::empty(transition)
            }
        }
    }

    /// Runs exactly once, on the thread whose stop transition applied.
    fn teardown(&self, transition: Transition) -> StopReport {
        let mut report = StopReport::empty(transition);
        report.stopped_at = transition.at();

        let resources = self.resources.lock().take();
        if let Some(resources) = resources {
            let released = self.release(resources);

            let timings = {
                let mut timings = self.timings.lock();
                released.inbox.collect_into(&mut timings);
                timings.clone()
            };
            let metadata_result = self.metadata.lock().finish(timings.clone());

            report.events_written = released.events_written;
            report.backend_error = released.backend_error;
            report.metadata_error = metadata_result.err().map(|e| {
                tracing::warn!(error = %e, "Failed to hand off session metadata");
                SessionFault::new(FaultKind::Metadata, &e)
            });
            report.record_state_events = timings;
            report.session_dir = Some(released.directory.path().to_path_buf());

            if let Some(log_fault) = released.log_error {
                self.fault.lock().get_or_insert(log_fault);
            }
        }

        report.fault = self.fault.lock().clone();
        report.stats = self.stats.snapshot();

        tracing::info!(
            events = report.events_written,
            stopped_at = report.stopped_at,
            faulted = report.fault.is_some(),
            "Recording stopped"
        );

        *self.teardown.lock() = Some(report.clone());
        self.teardown_done.notify_all();
        report
    }

    /// Release in reverse dependency order: backend, listeners, marker
    /// producer, writer. The writer only exits once every producer handle
    /// is gone, so it is joined last and drains the queue on its way out.
    fn release(&self, resources: SessionResources) -> Released {
        let SessionResources {
            directory,
            shutdown,
            writer,
            listeners,
            inbox,
            backend_started,
        } = resources;

        shutdown.store(true, Ordering::SeqCst);

        let mut backend_error = None;
        if backend_started {
            if let Err(e) = self.backend.lock().end_capture() {
                tracing::warn!(error = %e, "Backend failed to stop cleanly");
                backend_error = Some(SessionFault::new(FaultKind::Backend, &e));
            }
        }

        let current = std::thread::current().id();
        for listener in listeners {
            // A listener that is tearing the session down cannot join itself;
            // it exits as soon as this returns.
            if listener.thread_id() == current {
                continue;
            }
            let kind = listener.kind();
            let exit = listener.join();
            tracing::debug!(listener = %kind, ?exit, "Listener joined");
        }

        drop(self.markers.lock().take());

        let mut events_written = 0;
        let mut log_error = None;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(count) => events_written = count,
                Err(e) => {
                    tracing::error!(error = %e, "Event log writer failed");
                    log_error = Some(SessionFault::new(FaultKind::EventLog, &e));
                }
            }
        }

        Released {
            directory,
            inbox,
            events_written,
            backend_error,
            log_error,
        }
    }
}
