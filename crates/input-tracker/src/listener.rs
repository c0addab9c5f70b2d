//! Listener threads: poll an input source, stamp, gate, enqueue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use ducktrack_common::clock::SharedClock;
use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::EventRecord;
use tracing::Dispatch;

use crate::queue::EventSender;
use crate::stats::CaptureStats;
use crate::{CaptureGate, InputSource, InputSourceFactory, ListenerKind};

/// Called from the listener thread when it gives up. The listener has
/// already released its queue sender by the time this runs.
pub type FatalHandler = Arc<dyn Fn(ListenerKind, DucktrackError) + Send + Sync>;

/// Everything a listener thread needs from its session.
pub struct ListenerContext {
    pub queue: EventSender,
    pub gate: Arc<dyn CaptureGate>,
    pub clock: SharedClock,
    /// Level-triggered cancellation; polled once per loop iteration.
    pub shutdown: Arc<AtomicBool>,
    pub stats: Arc<CaptureStats>,
    /// Reopen attempts allowed after a mid-session failure.
    pub restart_limit: u32,
    /// Sleep between polls when the source has nothing pending.
    pub idle_interval: Duration,
    pub dispatch: Dispatch,
    pub on_fatal: FatalHandler,
}

/// How a listener thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The session asked it to stop.
    Shutdown,
    /// The source failed and could not be restarted.
    Failed,
}

/// A running listener thread.
pub struct ListenerHandle {
    kind: ListenerKind,
    join: JoinHandle<ListenerExit>,
}

impl ListenerHandle {
    /// Open the source on the calling thread, then start polling it on a
    /// dedicated thread.
    ///
    /// Registration errors are returned here as [`DucktrackError::Startup`]
    /// so the caller can abort session startup.
    pub fn spawn(
        factory: Arc<dyn InputSourceFactory>,
        ctx: ListenerContext,
    ) -> DucktrackResult<Self> {
        let kind = factory.kind();
        let source = tracing::dispatcher::with_default(&ctx.dispatch, || factory.open())
            .map_err(|e| {
                DucktrackError::startup(format!("{kind} listener registration failed: {e}"))
            })?;

        let join = thread::Builder::new()
            .name(format!("ducktrack-{kind}"))
            .spawn(move || run(factory, source, ctx))
            .map_err(|e| {
                DucktrackError::startup(format!("failed to spawn {kind} listener thread: {e}"))
            })?;

        Ok(Self { kind, join })
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Id of the listener thread.
    pub fn thread_id(&self) -> ThreadId {
        self.join.thread().id()
    }

    /// Wait for the thread to finish. A panicked listener counts as failed.
    pub fn join(self) -> ListenerExit {
        match self.join.join() {
            Ok(exit) => exit,
            Err(_) => {
                tracing::error!(listener = %self.kind, "Listener thread panicked");
                ListenerExit::Failed
            }
        }
    }
}

fn run(
    factory: Arc<dyn InputSourceFactory>,
    mut source: Box<dyn InputSource>,
    ctx: ListenerContext,
) -> ListenerExit {
    let _dispatch = tracing::dispatcher::set_default(&ctx.dispatch);
    let kind = factory.kind();
    let mut restarts = 0u32;

    tracing::info!(listener = %kind, source = %source.name(), "Listener started");

    while !ctx.shutdown.load(Ordering::SeqCst) {
        match source.poll() {
            Ok(Some(action)) => {
                // Stamp before consulting the gate so an admitted record is
                // never stamped later than the transition that closed it.
                // The check-then-enqueue is not atomic with pause(): a record
                // read just before a pause can still land after it. Holding
                // the state lock per input event would serialize both
                // listeners on every keystroke, so that window is accepted.
                let time_stamp = ctx.clock.now_secs();
                if ctx.gate.is_capturing() {
                    if ctx.queue.enqueue(EventRecord::new(action, time_stamp)) {
                        ctx.stats.record_accepted();
                    }
                } else {
                    ctx.stats.record_gated_out();
                }
            }
            Ok(None) => thread::sleep(ctx.idle_interval),
            Err(e) => {
                if ctx.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!(listener = %kind, error = %e, restarts, "Input source failed");

                if restarts >= ctx.restart_limit {
                    let err = DucktrackError::listener(format!(
                        "{kind} listener failed after {restarts} restart(s): {e}"
                    ));
                    return escalate(ctx, kind, err);
                }

                restarts += 1;
                ctx.stats.record_listener_restart();
                match factory.open() {
                    Ok(reopened) => {
                        tracing::info!(
                            listener = %kind,
                            source = %reopened.name(),
                            "Listener restarted"
                        );
                        source = reopened;
                    }
                    Err(reopen_err) => {
                        let err = DucktrackError::listener(format!(
                            "{kind} listener could not be restarted: {reopen_err}"
                        ));
                        return escalate(ctx, kind, err);
                    }
                }
            }
        }
    }

    tracing::info!(listener = %kind, "Listener stopped");
    ListenerExit::Shutdown
}

fn escalate(ctx: ListenerContext, kind: ListenerKind, err: DucktrackError) -> ListenerExit {
    let ListenerContext {
        queue, on_fatal, ..
    } = ctx;
    // The writer only exits once every sender is gone, and the fatal handler
    // may wait on the writer.
    drop(queue);
    tracing::error!(listener = %kind, error = %err, "Listener giving up");
    on_fatal(kind, err);
    ListenerExit::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SyntheticInput;
    use crate::queue::{event_queue, Dequeued};
    use ducktrack_common::clock::ManualClock;
    use ducktrack_event_model::InputAction;
    use std::sync::Mutex;

    struct Gate(AtomicBool);

    impl CaptureGate for Gate {
        fn is_capturing(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        gate: Arc<Gate>,
        shutdown: Arc<AtomicBool>,
        stats: Arc<CaptureStats>,
        fatal: Arc<Mutex<Vec<String>>>,
    }

    fn context(queue: EventSender, restart_limit: u32) -> (ListenerContext, Harness) {
        let harness = Harness {
            gate: Arc::new(Gate(AtomicBool::new(true))),
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CaptureStats::new()),
            fatal: Arc::new(Mutex::new(Vec::new())),
        };
        let fatal = harness.fatal.clone();
        let ctx = ListenerContext {
            queue,
            gate: harness.gate.clone(),
            clock: Arc::new(ManualClock::new(0.5)),
            shutdown: harness.shutdown.clone(),
            stats: harness.stats.clone(),
            restart_limit,
            idle_interval: Duration::from_millis(1),
            dispatch: Dispatch::none(),
            on_fatal: Arc::new(move |kind, err| {
                fatal.lock().unwrap().push(format!("{kind}: {err}"));
            }),
        };
        (ctx, harness)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_enqueues_stamped_records_while_gate_open() {
        let (tx, rx) = event_queue();
        let (input, factory) = SyntheticInput::new(ListenerKind::Keyboard);
        let (ctx, harness) = context(tx, 1);
        let handle = ListenerHandle::spawn(Arc::new(factory), ctx).unwrap();

        input.send(InputAction::key_press("a"));
        match rx.dequeue(Duration::from_secs(2)) {
            Dequeued::Record(record) => {
                assert_eq!(record.action, InputAction::key_press("a"));
                assert_eq!(record.time_stamp, 0.5);
            }
            other => panic!("expected a record, got {other:?}"),
        }

        harness.gate.0.store(false, Ordering::SeqCst);
        input.send(InputAction::key_release("a"));
        wait_for(|| harness.stats.snapshot().gated_out == 1);

        harness.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(handle.join(), ListenerExit::Shutdown);
        assert_eq!(rx.dequeue(Duration::from_millis(50)), Dequeued::Closed);
    }

    #[test]
    fn test_restarts_once_then_keeps_listening() {
        let (tx, rx) = event_queue();
        let (input, factory) = SyntheticInput::new(ListenerKind::Pointer);
        let (ctx, harness) = context(tx, 1);
        let handle = ListenerHandle::spawn(Arc::new(factory), ctx).unwrap();

        input.fail_next_poll("device unplugged");
        wait_for(|| harness.stats.snapshot().listener_restarts == 1);
        input.send(InputAction::Move { x: 1.0, y: 2.0 });
        assert!(matches!(
            rx.dequeue(Duration::from_secs(2)),
            Dequeued::Record(_)
        ));
        assert!(harness.fatal.lock().unwrap().is_empty());

        harness.shutdown.store(true, Ordering::SeqCst);
        assert_eq!(handle.join(), ListenerExit::Shutdown);
    }

    #[test]
    fn test_escalates_when_restart_fails() {
        let (tx, rx) = event_queue();
        let (input, factory) = SyntheticInput::new(ListenerKind::Pointer);
        let (ctx, harness) = context(tx, 1);
        let handle = ListenerHandle::spawn(Arc::new(factory), ctx).unwrap();

        input.fail_open("permission denied");
        input.fail_next_poll("device unplugged");

        assert_eq!(handle.join(), ListenerExit::Failed);
        let fatal = harness.fatal.lock().unwrap();
        assert_eq!(fatal.len(), 1);
        assert!(fatal[0].contains("could not be restarted"), "{}", fatal[0]);
        assert_eq!(rx.dequeue(Duration::from_millis(50)), Dequeued::Closed);
    }

    #[test]
    fn test_escalates_on_second_failure() {
        let (tx, _rx) = event_queue();
        let (input, factory) = SyntheticInput::new(ListenerKind::Keyboard);
        let (ctx, harness) = context(tx, 1);
        let handle = ListenerHandle::spawn(Arc::new(factory), ctx).unwrap();

        input.fail_next_poll("first");
        wait_for(|| harness.stats.snapshot().listener_restarts == 1);
        input.fail_next_poll("second");

        assert_eq!(handle.join(), ListenerExit::Failed);
        assert!(harness.fatal.lock().unwrap()[0].contains("after 1 restart(s)"));
    }

    #[test]
    fn test_registration_failure_is_a_startup_error() {
        let (tx, _rx) = event_queue();
        let (input, factory) = SyntheticInput::new(ListenerKind::Keyboard);
        input.fail_open("no keyboard");
        let (ctx, _harness) = context(tx, 1);

        let result = ListenerHandle::spawn(Arc::new(factory), ctx);
        assert!(matches!(result, Err(DucktrackError::Startup { .. })));
    }
}
