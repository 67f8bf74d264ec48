//! Playback worker contract and single-worker lifecycle bookkeeping.
//!
//! The scheduler never looks inside a worker: it sees the [`PlaybackWorker`]
//! lifecycle surface, a [`WorkerFactory`] that creates the next generation,
//! and the [`ResourceBundle`] of output resources handed from one worker
//! generation to the next instead of being torn down and recreated.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::playlist::tree::MediaItem;

/// Observable lifecycle state reported by a playback worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Decoding/rendering normally.
    Running,
    /// Hit an unrecoverable error; waiting to be told to stop.
    Error,
    /// Ran out of media; waiting to be told to stop.
    EndOfStream,
    /// Told to stop, still winding down.
    Dying,
    /// Fully finished; safe to join.
    Dead,
}

/// Lifecycle surface of the single concurrently-active playback worker.
pub trait PlaybackWorker: Send {
    /// Asks the worker to stop. Must not block.
    fn request_stop(&self);

    /// Current lifecycle state.
    fn state(&self) -> WorkerState;

    /// Drops the worker's reference to its notifier. Always called without
    /// the scheduler lock held, because notification delivery itself takes
    /// that lock. Returns false when the worker could not deregister
    /// cleanly.
    fn deregister_notifier(&self) -> bool;

    /// Blocks until the worker has fully exited, releasing it.
    fn join(self: Box<Self>);
}

/// Creates playback workers, one generation at a time.
pub trait WorkerFactory: Send {
    /// Creates a worker for `item` without blocking on readiness. The
    /// factory may reuse output resources already present in `bundle` and
    /// installs whatever it allocates back into it. The worker must call
    /// `notifier.notify()` on every state change until deregistered.
    /// Returns `None` on creation failure.
    fn create(
        &self,
        item: &Arc<MediaItem>,
        bundle: &mut ResourceBundle,
        notifier: WorkerNotifier,
    ) -> Option<Box<dyn PlaybackWorker>>;
}

/// Wakes the scheduler on worker state changes.
///
/// Delivery acquires the scheduler lock, so callers of
/// [`PlaybackWorker::deregister_notifier`] must not hold it.
#[derive(Clone)]
pub struct WorkerNotifier {
    signal: Arc<dyn Fn() + Send + Sync>,
}

impl WorkerNotifier {
    pub fn new(signal: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            signal: Arc::new(signal),
        }
    }

    pub fn notify(&self) {
        (self.signal)();
    }
}

impl fmt::Debug for WorkerNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkerNotifier")
    }
}

/// One reusable output resource (device stream, stream output, ...).
pub trait OutputResource: Send {
    fn label(&self) -> &str;

    /// Releases whatever the resource holds. Called at most once.
    fn shut_down(&mut self);
}

/// Reusable output resources owned by the active worker generation.
///
/// Detached from a dead worker and reattached to the next one; never
/// referenced by two handles at the same time.
#[derive(Default)]
pub struct ResourceBundle {
    device_output: Option<Box<dyn OutputResource>>,
    stream_output: Option<Box<dyn OutputResource>>,
}

impl ResourceBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_device_output(&self) -> bool {
        self.device_output.is_some()
    }

    pub fn has_stream_output(&self) -> bool {
        self.stream_output.is_some()
    }

    pub fn install_device_output(&mut self, resource: Box<dyn OutputResource>) {
        self.device_output = Some(resource);
    }

    pub fn install_stream_output(&mut self, resource: Box<dyn OutputResource>) {
        self.stream_output = Some(resource);
    }

    /// Shuts down the heavyweight device output, keeping the bundle itself.
    pub fn terminate_device_output(&mut self) {
        if let Some(mut resource) = self.device_output.take() {
            debug!("terminating device output '{}'", resource.label());
            resource.shut_down();
        }
    }

    /// Shuts down the stream output, keeping the bundle itself.
    pub fn terminate_stream_output(&mut self) {
        if let Some(mut resource) = self.stream_output.take() {
            debug!("terminating stream output '{}'", resource.label());
            resource.shut_down();
        }
    }

    /// Shuts down everything the bundle still holds.
    pub fn release(mut self) {
        self.terminate_device_output();
        self.terminate_stream_output();
    }
}

impl fmt::Debug for ResourceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBundle")
            .field("device_output", &self.device_output.is_some())
            .field("stream_output", &self.stream_output.is_some())
            .finish()
    }
}

/// Result of one lifecycle poll, driving the scheduler's drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The worker was just told to stop; keep waiting.
    NeedStop,
    /// The worker is fully dead; detach its bundle, deregister and join.
    ReapReady,
    /// The worker was already told to stop and is winding down; keep waiting.
    Dying,
    /// The worker is playing normally; wait for the next signal.
    Active,
}

/// Exclusive handle to the live worker generation. At most one exists.
pub struct WorkerHandle {
    worker: Box<dyn PlaybackWorker>,
    bundle: ResourceBundle,
    stop_requested: bool,
    item: Arc<MediaItem>,
}

impl WorkerHandle {
    pub fn new(worker: Box<dyn PlaybackWorker>, bundle: ResourceBundle, item: Arc<MediaItem>) -> Self {
        Self {
            worker,
            bundle,
            stop_requested: false,
            item,
        }
    }

    pub fn item(&self) -> &Arc<MediaItem> {
        &self.item
    }

    /// Classifies the worker's state for one scheduling iteration.
    ///
    /// Called with the scheduler lock held. `stop_wanted` is true when a new
    /// request is pending or shutdown is in progress.
    pub fn poll(&mut self, stop_wanted: bool) -> PollOutcome {
        // A dead worker is reaped before anything else; it will never
        // signal again, so waiting on it could stall until the next
        // external wakeup.
        if self.worker.state() == WorkerState::Dead {
            debug!("dead worker");
            return PollOutcome::ReapReady;
        }

        if stop_wanted && !self.stop_requested {
            debug!("incoming request - stopping current worker");
            self.worker.request_stop();
            self.stop_requested = true;
            return PollOutcome::NeedStop;
        }

        match self.worker.state() {
            WorkerState::Dead => PollOutcome::ReapReady,
            WorkerState::Dying => {
                debug!("dying worker");
                PollOutcome::Dying
            }
            WorkerState::Error | WorkerState::EndOfStream => {
                if !self.stop_requested {
                    debug!("finished worker");
                    self.worker.request_stop();
                    self.stop_requested = true;
                }
                PollOutcome::NeedStop
            }
            WorkerState::Running => PollOutcome::Active,
        }
    }

    /// Takes the bundle out of the handle for reuse by the next generation.
    pub fn detach_bundle(&mut self) -> ResourceBundle {
        std::mem::take(&mut self.bundle)
    }

    /// Deregisters the worker's notifier. Must be called without the
    /// scheduler lock held.
    pub fn deregister(&self) -> bool {
        self.worker.deregister_notifier()
    }

    /// Joins and releases the worker.
    pub fn join(self) {
        self.worker.join();
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("item", &self.item.id)
            .field("stop_requested", &self.stop_requested)
            .field("bundle", &self.bundle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

    struct ScriptedWorker {
        state: Arc<AtomicU8>,
        stop_requests: Arc<AtomicUsize>,
        deregistered: Arc<AtomicBool>,
    }

    fn encode(state: WorkerState) -> u8 {
        match state {
            WorkerState::Running => 0,
            WorkerState::Error => 1,
            WorkerState::EndOfStream => 2,
            WorkerState::Dying => 3,
            WorkerState::Dead => 4,
        }
    }

    fn decode(raw: u8) -> WorkerState {
        match raw {
            0 => WorkerState::Running,
            1 => WorkerState::Error,
            2 => WorkerState::EndOfStream,
            3 => WorkerState::Dying,
            _ => WorkerState::Dead,
        }
    }

    impl ScriptedWorker {
        fn new(state: WorkerState) -> (Self, Arc<AtomicU8>, Arc<AtomicUsize>) {
            let shared_state = Arc::new(AtomicU8::new(encode(state)));
            let stop_requests = Arc::new(AtomicUsize::new(0));
            let worker = Self {
                state: Arc::clone(&shared_state),
                stop_requests: Arc::clone(&stop_requests),
                deregistered: Arc::new(AtomicBool::new(false)),
            };
            (worker, shared_state, stop_requests)
        }
    }

    impl PlaybackWorker for ScriptedWorker {
        fn request_stop(&self) {
            self.stop_requests.fetch_add(1, Ordering::SeqCst);
            self.state.store(encode(WorkerState::Dying), Ordering::SeqCst);
        }

        fn state(&self) -> WorkerState {
            decode(self.state.load(Ordering::SeqCst))
        }

        fn deregister_notifier(&self) -> bool {
            self.deregistered.store(true, Ordering::SeqCst);
            true
        }

        fn join(self: Box<Self>) {}
    }

    struct CountingResource {
        name: &'static str,
        shutdowns: Arc<AtomicUsize>,
    }

    impl OutputResource for CountingResource {
        fn label(&self) -> &str {
            self.name
        }

        fn shut_down(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle_for(worker: ScriptedWorker) -> WorkerHandle {
        WorkerHandle::new(
            Box::new(worker),
            ResourceBundle::empty(),
            Arc::new(MediaItem::new("file:t", "t")),
        )
    }

    #[test]
    fn test_running_worker_polls_active() {
        let (worker, _, _) = ScriptedWorker::new(WorkerState::Running);
        let mut handle = handle_for(worker);
        assert_eq!(handle.poll(false), PollOutcome::Active);
        assert_eq!(handle.poll(false), PollOutcome::Active);
    }

    #[test]
    fn test_pending_request_stops_worker_exactly_once() {
        let (worker, _, stop_requests) = ScriptedWorker::new(WorkerState::Running);
        let mut handle = handle_for(worker);

        assert_eq!(handle.poll(true), PollOutcome::NeedStop);
        assert_eq!(stop_requests.load(Ordering::SeqCst), 1);

        // Already told to stop: further polls just report the wind-down.
        assert_eq!(handle.poll(true), PollOutcome::Dying);
        assert_eq!(stop_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_end_of_stream_triggers_stop_then_reap() {
        let (worker, state, stop_requests) = ScriptedWorker::new(WorkerState::EndOfStream);
        let mut handle = handle_for(worker);

        assert_eq!(handle.poll(false), PollOutcome::NeedStop);
        assert_eq!(stop_requests.load(Ordering::SeqCst), 1);
        assert_eq!(handle.poll(false), PollOutcome::Dying);

        state.store(encode(WorkerState::Dead), Ordering::SeqCst);
        assert_eq!(handle.poll(false), PollOutcome::ReapReady);
    }

    #[test]
    fn test_error_is_treated_like_end_of_stream() {
        let (worker, _, stop_requests) = ScriptedWorker::new(WorkerState::Error);
        let mut handle = handle_for(worker);
        assert_eq!(handle.poll(false), PollOutcome::NeedStop);
        assert_eq!(stop_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_worker_is_reaped_even_with_request_pending() {
        let (worker, state, stop_requests) = ScriptedWorker::new(WorkerState::Running);
        state.store(encode(WorkerState::Dead), Ordering::SeqCst);
        let mut handle = handle_for(worker);
        assert_eq!(handle.poll(true), PollOutcome::ReapReady);
        assert_eq!(stop_requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detached_bundle_carries_resources_without_shutdown() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let (worker, _, _) = ScriptedWorker::new(WorkerState::Running);
        let mut bundle = ResourceBundle::empty();
        bundle.install_device_output(Box::new(CountingResource {
            name: "device",
            shutdowns: Arc::clone(&shutdowns),
        }));
        bundle.install_stream_output(Box::new(CountingResource {
            name: "stream",
            shutdowns: Arc::clone(&shutdowns),
        }));
        let mut handle = WorkerHandle::new(
            Box::new(worker),
            bundle,
            Arc::new(MediaItem::new("file:t", "t")),
        );

        let mut detached = handle.detach_bundle();
        assert!(detached.has_device_output());
        assert!(detached.has_stream_output());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);

        detached.terminate_stream_output();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(detached.has_device_output());

        detached.release();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut bundle = ResourceBundle::empty();
        bundle.install_device_output(Box::new(CountingResource {
            name: "device",
            shutdowns: Arc::clone(&shutdowns),
        }));
        bundle.terminate_device_output();
        bundle.terminate_device_output();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
