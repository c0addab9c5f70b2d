use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use ducktrack_capture_engine::{
    FaultKind, RecordingBackend, SessionConfig, SessionCoordinator, SessionState, StateNotifier,
    StopReport, Transition,
};
use ducktrack_common::clock::ManualClock;
use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::{EventLogReader, EventRecord, InputAction, MouseButton, SessionMetadata};
use ducktrack_input_tracker::backends::{SourceSet, SyntheticInput};
use ducktrack_input_tracker::ListenerKind;
use parking_lot::Mutex;
use tracing::Dispatch;

#[derive(Default)]
struct BackendScript {
    calls: Vec<&'static str>,
    fail_begin: bool,
    fail_pause: bool,
}

/// Records every call and reports the matching state change.
struct ScriptedBackend {
    script: Arc<Mutex<BackendScript>>,
    notifier: Option<StateNotifier>,
}

impl ScriptedBackend {
    fn call(&mut self, name: &'static str, state: &str, fail: bool) -> DucktrackResult<()> {
        self.script.lock().calls.push(name);
        if fail {
            return Err(DucktrackError::backend(format!("scripted {name} failure")));
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify(state);
        }
        Ok(())
    }
}

impl RecordingBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn begin_capture(&mut self, _dir: &Path, notifier: StateNotifier) -> DucktrackResult<()> {
        self.notifier = Some(notifier);
        let fail = self.script.lock().fail_begin;
        self.call("begin", "started", fail)
    }

    fn pause_capture(&mut self) -> DucktrackResult<()> {
        let fail = self.script.lock().fail_pause;
        self.call("pause", "paused", fail)
    }

    fn resume_capture(&mut self) -> DucktrackResult<()> {
        self.call("resume", "resumed", false)
    }

    fn end_capture(&mut self) -> DucktrackResult<()> {
        self.call("end", "stopped", false)
    }
}

/// Holds `begin_capture` until the coordinator has recorded a fault, so a
/// listener can fail while the session is still `Idle`.
struct StallUntilFault {
    coordinator: Arc<OnceLock<Weak<SessionCoordinator>>>,
}

impl RecordingBackend for StallUntilFault {
    fn name(&self) -> &str {
        "stall"
    }

    fn begin_capture(&mut self, _dir: &Path, _notifier: StateNotifier) -> DucktrackResult<()> {
        wait_for(|| {
            self.coordinator
                .get()
                .and_then(Weak::upgrade)
                .is_some_and(|c| c.fault().is_some())
        });
        Ok(())
    }

    fn pause_capture(&mut self) -> DucktrackResult<()> {
        Ok(())
    }

    fn resume_capture(&mut self) -> DucktrackResult<()> {
        Ok(())
    }

    fn end_capture(&mut self) -> DucktrackResult<()> {
        Ok(())
    }
}

struct Harness {
    coordinator: SessionCoordinator,
    pointer: SyntheticInput,
    keyboard: SyntheticInput,
    clock: Arc<ManualClock>,
    script: Arc<Mutex<BackendScript>>,
    root: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_clock(true)
    }

    fn with_clock(manual: bool) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let (pointer, pointer_factory) = SyntheticInput::new(ListenerKind::Pointer);
        let (keyboard, keyboard_factory) = SyntheticInput::new(ListenerKind::Keyboard);
        let clock = Arc::new(ManualClock::new(0.0));
        let script = Arc::new(Mutex::new(BackendScript::default()));

        let mut builder = SessionCoordinator::builder(SessionConfig::new(root.path()))
            .sources(SourceSet {
                pointer: Arc::new(pointer_factory),
                keyboard: Arc::new(keyboard_factory),
            })
            .backend(Box::new(ScriptedBackend {
                script: script.clone(),
                notifier: None,
            }))
            .dispatch(Dispatch::none());
        if manual {
            builder = builder.clock(clock.clone());
        }

        Self {
            coordinator: builder.build(),
            pointer,
            keyboard,
            clock,
            script,
            root,
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.script.lock().calls.clone()
    }

    fn end_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == "end").count()
    }

    fn sessions(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.root.path())
            .expect("read recordings root")
            .map(|entry| entry.expect("dir entry").path())
            .collect()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached within 2s");
}

fn read_log(dir: &Path) -> Vec<EventRecord> {
    EventLogReader::open_session(dir)
        .expect("event log should exist")
        .collect::<DucktrackResult<Vec<_>>>()
        .expect("event log should parse")
}

fn read_metadata(report: &StopReport) -> SessionMetadata {
    let dir = report.session_dir.as_ref().expect("session dir");
    let json = std::fs::read_to_string(dir.join("metadata.json")).expect("metadata.json");
    serde_json::from_str(&json).expect("metadata should parse")
}

#[test]
fn scenario_pause_resume_logs_only_live_input() {
    let h = Harness::new();
    let c = &h.coordinator;

    assert!(c.start().expect("start").is_applied());

    h.clock.set(0.01);
    h.pointer.send(InputAction::Move { x: 10.0, y: 10.0 });
    wait_for(|| c.stats().accepted == 1);

    h.clock.set(0.02);
    h.pointer.send(InputAction::Click {
        x: 10.0,
        y: 10.0,
        button: MouseButton::Left,
        pressed: true,
    });
    wait_for(|| c.stats().accepted == 2);

    h.clock.set(0.03);
    assert!(c.pause().transition.is_applied());
    assert_eq!(
        c.record_state_events().states().collect::<Vec<_>>(),
        vec!["started", "paused"]
    );
    h.pointer.send(InputAction::Move { x: 50.0, y: 50.0 });
    h.keyboard.send(InputAction::key_press("b"));
    wait_for(|| c.stats().gated_out == 2);

    h.clock.set(0.04);
    assert!(c.resume().transition.is_applied());

    h.clock.set(0.05);
    h.keyboard.send(InputAction::key_press("a"));
    wait_for(|| c.stats().accepted == 3);

    h.clock.set(0.06);
    let report = c.stop();
    assert!(report.transition.is_applied());
    assert!(report.is_clean(), "unexpected faults: {report:?}");
    assert_eq!(report.stopped_at, Some(0.06));
    assert_eq!(report.events_written, 5);

    let dir = report.session_dir.clone().expect("session dir");
    assert_eq!(
        read_log(&dir),
        vec![
            EventRecord::pointer_move(0.01, 10.0, 10.0),
            EventRecord::click(0.02, 10.0, 10.0, MouseButton::Left, true),
            EventRecord::new(InputAction::Pause, 0.03),
            EventRecord::new(InputAction::Resume, 0.04),
            EventRecord::key_press(0.05, "a"),
        ]
    );

    assert_eq!(h.calls(), vec!["begin", "pause", "resume", "end"]);

    let metadata = read_metadata(&report);
    assert_eq!(metadata.backend, "scripted");
    assert!(metadata.stopped_at.is_some());
    assert_eq!(
        metadata.record_state_events.states().collect::<Vec<_>>(),
        vec!["started", "paused", "resumed", "stopped"]
    );
    assert_eq!(metadata.record_state_events.get("paused"), Some(&[0.03][..]));
}

#[test]
fn every_accepted_record_is_written_once() {
    const PER_SOURCE: usize = 100;
    let h = Harness::new();
    let c = &h.coordinator;
    c.start().expect("start");

    for i in 0..PER_SOURCE {
        h.pointer.send(InputAction::Move {
            x: i as f64,
            y: 0.0,
        });
        h.keyboard.send(InputAction::key_press(format!("k{i}")));
    }
    wait_for(|| c.stats().accepted == 2 * PER_SOURCE as u64);

    let report = c.stop();
    assert_eq!(report.events_written, 2 * PER_SOURCE as u64);
    assert_eq!(report.stats.written, 2 * PER_SOURCE as u64);

    let records = read_log(report.session_dir.as_deref().expect("session dir"));
    assert_eq!(records.len(), 2 * PER_SOURCE);

    let xs: Vec<f64> = records
        .iter()
        .filter_map(|r| match r.action {
            InputAction::Move { x, .. } => Some(x),
            _ => None,
        })
        .collect();
    let expected: Vec<f64> = (0..PER_SOURCE).map(|i| i as f64).collect();
    assert_eq!(xs, expected, "pointer records must keep their FIFO order");
}

#[test]
fn stop_twice_tears_down_once() {
    let h = Harness::new();
    let c = &h.coordinator;
    c.start().expect("start");
    h.keyboard.send(InputAction::key_press("x"));
    wait_for(|| c.stats().accepted == 1);

    let first = c.stop();
    let second = c.stop();

    assert!(first.transition.is_applied());
    assert_eq!(
        second.transition,
        Transition::NoOp {
            state: SessionState::Stopped
        }
    );
    assert_eq!(second.events_written, first.events_written);
    assert_eq!(second.session_dir, first.session_dir);
    assert_eq!(h.end_calls(), 1);
    assert_eq!(
        c.start().expect("start after stop"),
        Transition::NoOp {
            state: SessionState::Stopped
        }
    );
}

#[test]
fn concurrent_stops_have_exactly_one_winner() {
    const CALLERS: usize = 8;
    let h = Arc::new(Harness::new());
    h.coordinator.start().expect("start");
    h.pointer.send(InputAction::Move { x: 1.0, y: 2.0 });
    wait_for(|| h.coordinator.stats().accepted == 1);

    let barrier = Arc::new(Barrier::new(CALLERS));
    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                h.coordinator.stop()
            })
        })
        .collect();
    let reports: Vec<StopReport> = callers
        .into_iter()
        .map(|t| t.join().expect("stop caller panicked"))
        .collect();

    let winners = reports
        .iter()
        .filter(|r| r.transition.is_applied())
        .count();
    assert_eq!(winners, 1);
    assert!(reports.iter().all(|r| r.events_written == 1));
    assert_eq!(h.end_calls(), 1);
}

#[test]
fn concurrent_pause_resume_reach_backend_in_transition_order() {
    const CALLERS: usize = 8;
    const ROUNDS: usize = 1000;
    let h = Arc::new(Harness::new());
    h.coordinator.start().expect("start");

    let barrier = Arc::new(Barrier::new(CALLERS));
    let callers: Vec<_> = (0..CALLERS)
        .map(|i| {
            let h = h.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    if (round + i) % 2 == 0 {
                        h.coordinator.pause();
                    } else {
                        h.coordinator.resume();
                    }
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().expect("control caller panicked");
    }
    let final_state = h.coordinator.state();
    let report = h.coordinator.stop();

    let calls = h.calls();
    assert_eq!(calls.first(), Some(&"begin"));
    assert_eq!(calls.last(), Some(&"end"));
    let controls = &calls[1..calls.len() - 1];
    assert!(!controls.is_empty());
    for (i, call) in controls.iter().enumerate() {
        let expected = if i % 2 == 0 { "pause" } else { "resume" };
        assert_eq!(*call, expected, "backend call {i} out of transition order");
    }
    let expected_state = if controls.len() % 2 == 0 {
        SessionState::Recording
    } else {
        SessionState::Paused
    };
    assert_eq!(final_state, expected_state);

    // Markers are enqueued in the same critical section, so the log agrees.
    let markers = read_log(report.session_dir.as_deref().expect("session dir"));
    assert_eq!(markers.len(), controls.len());
    for (i, record) in markers.iter().enumerate() {
        let expected = if i % 2 == 0 {
            InputAction::Pause
        } else {
            InputAction::Resume
        };
        assert_eq!(record.action, expected, "marker {i} out of order");
    }
}

#[test]
fn out_of_order_requests_are_noops() {
    let h = Harness::new();
    let c = &h.coordinator;

    let paused = c.pause();
    assert_eq!(
        paused.transition,
        Transition::NoOp {
            state: SessionState::Idle
        }
    );
    assert!(paused.backend_error.is_none());
    assert_eq!(c.state(), SessionState::Idle);

    c.start().expect("start");
    let resumed = c.resume();
    assert_eq!(
        resumed.transition,
        Transition::NoOp {
            state: SessionState::Recording
        }
    );
    assert_eq!(c.state(), SessionState::Recording);
    assert_eq!(h.calls(), vec!["begin"]);

    c.stop();
    assert!(!c.pause().transition.is_applied());
    assert!(!c.resume().transition.is_applied());
    assert_eq!(c.state(), SessionState::Stopped);
}

#[test]
fn backend_start_failure_rolls_back() {
    let h = Harness::new();
    h.script.lock().fail_begin = true;

    let err = h.coordinator.start().expect_err("start should fail");
    assert!(matches!(err, DucktrackError::Startup { .. }), "{err}");
    assert!(err.to_string().contains("scripted begin failure"));
    assert_eq!(h.coordinator.state(), SessionState::Idle);
    assert!(h.coordinator.session_dir().is_none());
    assert!(h.sessions().is_empty(), "unused session dir was left behind");
    assert_eq!(h.calls(), vec!["begin"]);

    // The listeners were released, so a retry can register them again.
    h.script.lock().fail_begin = false;
    assert!(h.coordinator.start().expect("retry").is_applied());
    assert_eq!(h.pointer.opens(), 2);
    assert_eq!(h.keyboard.opens(), 2);
    h.coordinator.stop();
}

#[test]
fn listener_registration_failure_aborts_startup() {
    let h = Harness::new();
    h.keyboard.fail_open("no keyboard device");

    let err = h.coordinator.start().expect_err("start should fail");
    assert!(matches!(err, DucktrackError::Startup { .. }));
    assert!(
        err.to_string().contains("keyboard listener registration failed"),
        "{err}"
    );
    assert_eq!(h.coordinator.state(), SessionState::Idle);
    assert!(h.sessions().is_empty());
    assert!(h.calls().is_empty(), "backend must not start without listeners");
}

#[test]
fn listener_failure_before_recording_fails_start() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pointer, pointer_factory) = SyntheticInput::new(ListenerKind::Pointer);
    let (_keyboard, keyboard_factory) = SyntheticInput::new(ListenerKind::Keyboard);
    let mut config = SessionConfig::new(root.path());
    config.capture.listener_restart_limit = 0;

    let handle = Arc::new(OnceLock::new());
    let coordinator = Arc::new(
        SessionCoordinator::builder(config)
            .sources(SourceSet {
                pointer: Arc::new(pointer_factory),
                keyboard: Arc::new(keyboard_factory),
            })
            .backend(Box::new(StallUntilFault {
                coordinator: handle.clone(),
            }))
            .clock(Arc::new(ManualClock::new(0.0)))
            .dispatch(Dispatch::none())
            .build(),
    );
    handle
        .set(Arc::downgrade(&coordinator))
        .expect("handle set once");
    pointer.fail_next_poll("device unplugged during startup");

    let err = coordinator.start().expect_err("start should fail");
    assert!(matches!(err, DucktrackError::Startup { .. }), "{err}");
    assert!(
        err.to_string().contains("device unplugged during startup"),
        "{err}"
    );

    // The session was torn down, not rolled back: it cannot be restarted.
    assert_eq!(coordinator.state(), SessionState::Stopped);
    assert_eq!(
        coordinator.fault().map(|fault| fault.kind),
        Some(FaultKind::Listener)
    );
    let dir = coordinator.session_dir().expect("session dir kept");
    assert!(dir.join("metadata.json").exists());
    assert_eq!(
        coordinator.start().expect("start after abort"),
        Transition::NoOp {
            state: SessionState::Stopped
        }
    );

    let report = coordinator.stop();
    assert!(!report.transition.is_applied());
    assert_eq!(report.events_written, 0);
    assert_eq!(report.session_dir, Some(dir));
}

#[test]
fn listener_crash_restarts_once_then_aborts() {
    let h = Harness::new();
    let c = &h.coordinator;
    c.start().expect("start");

    h.pointer.fail_next_poll("device unplugged");
    wait_for(|| c.stats().listener_restarts == 1);
    assert_eq!(c.state(), SessionState::Recording);
    assert_eq!(h.pointer.opens(), 2);

    h.pointer.send(InputAction::Move { x: 3.0, y: 4.0 });
    wait_for(|| c.stats().accepted == 1);

    h.pointer.fail_next_poll("device unplugged again");
    assert!(c.wait_until_stopped(Duration::from_secs(5)));

    let report = c.stop();
    assert_eq!(
        report.transition,
        Transition::NoOp {
            state: SessionState::Stopped
        }
    );
    let fault = report.fault.clone().expect("fault should be reported");
    assert_eq!(fault.kind, FaultKind::Listener);
    assert!(fault.message.contains("pointer"), "{fault}");
    assert_eq!(c.fault(), Some(fault));
    assert_eq!(report.events_written, 1);
    assert_eq!(h.end_calls(), 1);
    assert_eq!(c.stats().listener_restarts, 1);
}

#[test]
fn failed_restart_stops_session_with_fault() {
    let h = Harness::new();
    let c = &h.coordinator;
    c.start().expect("start");

    h.keyboard.fail_open("keyboard vanished");
    h.keyboard.fail_next_poll("read error");
    assert!(c.wait_until_stopped(Duration::from_secs(5)));

    let report = c.stop();
    let fault = report.fault.clone().expect("fault should be reported");
    assert_eq!(fault.kind, FaultKind::Listener);
    assert!(fault.message.contains("could not be restarted"), "{fault}");
    assert_eq!(h.end_calls(), 1);
    assert_eq!(report.session_dir, c.session_dir());
    assert!(read_metadata(&report).stopped_at.is_some());
}

#[test]
fn no_record_is_stamped_after_stop() {
    let h = Arc::new(Harness::with_clock(false));
    h.coordinator.start().expect("start");

    let running = Arc::new(AtomicBool::new(true));
    let pump = {
        let h = h.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut i = 0u64;
            while running.load(Ordering::SeqCst) {
                h.pointer.send(InputAction::Move {
                    x: (i % 1920) as f64,
                    y: 0.0,
                });
                h.keyboard.send(InputAction::key_press("z"));
                i += 1;
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    wait_for(|| h.coordinator.stats().accepted > 20);
    let report = h.coordinator.stop();
    running.store(false, Ordering::SeqCst);
    pump.join().expect("pump panicked");

    let stopped_at = report.stopped_at.expect("stop time");
    let records = read_log(report.session_dir.as_deref().expect("session dir"));
    assert!(!records.is_empty());
    assert_eq!(records.len() as u64, report.events_written);
    for record in &records {
        assert!(
            record.time_stamp <= stopped_at,
            "record at {} after stop at {stopped_at}",
            record.time_stamp
        );
    }
}

#[test]
fn dropping_a_running_session_tears_it_down() {
    let h = Harness::new();
    h.coordinator.start().expect("start");
    h.keyboard.send(InputAction::key_press("q"));
    wait_for(|| h.coordinator.stats().accepted == 1);
    let dir = h.coordinator.session_dir().expect("session dir");

    let Harness {
        coordinator,
        script,
        root: _root,
        ..
    } = h;
    drop(coordinator);

    assert_eq!(script.lock().calls, vec!["begin", "end"]);
    assert_eq!(read_log(&dir), vec![EventRecord::key_press(0.0, "q")]);
}

#[test]
fn backend_pause_failure_keeps_local_transition() {
    let h = Harness::new();
    let c = &h.coordinator;
    c.start().expect("start");
    h.script.lock().fail_pause = true;

    let report = c.pause();
    assert!(report.transition.is_applied());
    assert_eq!(c.state(), SessionState::Paused);
    let err = report.backend_error.expect("backend error reported");
    assert_eq!(err.kind, FaultKind::Backend);

    assert!(c.resume().backend_error.is_none());
    assert_eq!(c.state(), SessionState::Recording);

    let stop = c.stop();
    assert!(stop.fault.is_none());
    assert!(stop.backend_error.is_none());
    assert_eq!(
        stop.record_state_events.states().collect::<Vec<_>>(),
        vec!["started", "resumed", "stopped"]
    );
}
