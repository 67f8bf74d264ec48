//! Scheduler monitor and thread loop.
//!
//! One dedicated thread decides, one item at a time, what plays next and
//! walks the single active worker through its lifecycle. All shared state
//! lives behind one mutex; a single condvar carries two distinct waits (the
//! idle wait while fully stopped, the drain wait while a worker winds down).
//! The only wakeup sources are request submission, tree mutation, shutdown,
//! and worker state-change notifications.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast::Sender;

use crate::config::{ArtFetchPolicy, Config, PlaybackFlags};
use crate::engine::worker::{
    PollOutcome, ResourceBundle, WorkerFactory, WorkerHandle, WorkerNotifier,
};
use crate::playlist::order::PlayQueue;
use crate::playlist::selector::{self, PlaybackRequest};
use crate::playlist::tree::{MediaItem, NodeId, PlaylistTree};
use crate::protocol::{
    ArtFetchRequest, EngineMessage, FetchMessage, ItemStarted, Message, PlaybackMessage,
    PlaybackStatus,
};

/// Fatal activation failures, surfaced to the caller instead of retried.
#[derive(Debug, thiserror::Error)]
pub enum ActivateError {
    #[error("cannot spawn scheduler thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Everything the scheduler lock protects.
struct Shared {
    tree: PlaylistTree,
    queue: PlayQueue,
    flags: PlaybackFlags,
    status: PlaybackStatus,
    request: Option<PlaybackRequest>,
    worker: Option<WorkerHandle>,
    detached_bundle: Option<ResourceBundle>,
    rng: StdRng,
    alive: bool,
    last_rebuild: Option<Instant>,
    rebuild_debounce: Duration,
}

struct Monitor {
    shared: Mutex<Shared>,
    wake: Condvar,
}

impl Monitor {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }

    fn signal(&self) {
        self.wake.notify_all();
    }

    /// Idle wait: the scheduler is fully stopped with no worker. Wakes on
    /// request submission, tree mutation, or shutdown; the caller then
    /// re-evaluates the whole iteration.
    fn wait_idle<'a>(&self, shared: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.wake.wait(shared).unwrap()
    }

    /// Drain wait: a worker exists and is being waited out. Wakes on worker
    /// state-change notifications and request submission; the caller
    /// re-polls the worker. Kept separate from the idle wait so satisfying
    /// one predicate is never mistaken for satisfying the other.
    fn wait_drain<'a>(&self, shared: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        self.wake.wait(shared).unwrap()
    }
}

/// Handle to the background playback scheduler.
///
/// Created by [`Scheduler::activate`]; all methods are safe to call from any
/// thread and serialize on the scheduler lock.
pub struct Scheduler {
    monitor: Arc<Monitor>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the scheduler thread. Thread spawn failure is fatal to the
    /// playback subsystem and is returned to the activator.
    pub fn activate(
        config: &Config,
        factory: Box<dyn WorkerFactory>,
        bus: Sender<Message>,
    ) -> Result<Arc<Self>, ActivateError> {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed).expect("Failed to generate random seed");

        let tree = PlaylistTree::new();
        let queue = PlayQueue::new(tree.root());
        let monitor = Arc::new(Monitor {
            shared: Mutex::new(Shared {
                tree,
                queue,
                flags: PlaybackFlags::from(&config.playback),
                status: PlaybackStatus::Stopped,
                request: None,
                worker: None,
                detached_bundle: None,
                rng: StdRng::from_seed(seed),
                alive: true,
                last_rebuild: None,
                rebuild_debounce: Duration::from_millis(config.scheduler.rebuild_debounce_ms),
            }),
            wake: Condvar::new(),
        });

        let thread_monitor = Arc::clone(&monitor);
        let handle = thread::Builder::new()
            .name("cueflow-scheduler".to_string())
            .spawn(move || run_loop(thread_monitor, factory, bus))?;

        info!("scheduler activated");
        Ok(Arc::new(Self {
            monitor,
            thread: Mutex::new(Some(handle)),
        }))
    }

    /// Marks the scheduler not-alive and blocks until the loop has reaped
    /// any active worker and exited, then releases the remaining output
    /// resources.
    pub fn deactivate(&self) {
        debug!("deactivating scheduler");
        {
            let mut shared = self.monitor.lock();
            shared.alive = false;
            self.monitor.signal();
        }

        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }

        let mut shared = self.monitor.lock();
        assert!(
            shared.worker.is_none(),
            "worker must be reaped before deactivation completes"
        );
        if let Some(bundle) = shared.detached_bundle.take() {
            bundle.release();
        }
        shared.queue.current_item = None;
        shared.queue.current_index = None;
        info!("scheduler deactivated");
    }

    fn submit(&self, build: impl FnOnce(&Shared) -> PlaybackRequest) {
        let mut shared = self.monitor.lock();
        let request = build(&shared);
        debug!("submitting request: {:?}", request);
        shared.request = Some(request);
        self.monitor.signal();
    }

    /// Starts playback from the beginning of the active root.
    pub fn play(&self) {
        self.submit(|_| PlaybackRequest::play(None));
    }

    /// Stops playback after draining the active worker.
    pub fn stop(&self) {
        self.submit(|_| PlaybackRequest::stop());
    }

    pub fn next(&self) {
        self.skip(1);
    }

    pub fn previous(&self) {
        self.skip(-1);
    }

    /// Moves `count` entries through the order, one unit at a time,
    /// wrapping at both ends.
    pub fn skip(&self, count: i32) {
        self.submit(|shared| PlaybackRequest::skip(shared.queue.current_item, count));
    }

    /// Plays one specific leaf.
    pub fn play_item(&self, node: NodeId) {
        self.submit(|_| PlaybackRequest::play(Some(node)));
    }

    /// Makes `node` the active root and plays its first leaf.
    pub fn play_node(&self, node: NodeId) {
        self.submit(|_| PlaybackRequest::play_node(node));
    }

    /// Replaces the playback policy snapshot; the next decision point reads
    /// the new flags.
    pub fn set_flags(&self, flags: PlaybackFlags) {
        let mut shared = self.monitor.lock();
        shared.flags = flags;
        self.monitor.signal();
    }

    pub fn flags(&self) -> PlaybackFlags {
        self.monitor.lock().flags
    }

    /// Toggles shuffle. The order is marked stale so the next decision
    /// point sees a reshuffled (or re-linearized) sequence.
    pub fn set_random(&self, random: bool) {
        let mut shared = self.monitor.lock();
        if shared.flags.random != random {
            shared.flags.random = random;
            shared.queue.rebuild_required = true;
        }
        self.monitor.signal();
    }

    pub fn set_loop(&self, loop_all: bool) {
        let mut shared = self.monitor.lock();
        shared.flags.loop_all = loop_all;
        self.monitor.signal();
    }

    pub fn set_repeat(&self, repeat: bool) {
        let mut shared = self.monitor.lock();
        shared.flags.repeat = repeat;
        self.monitor.signal();
    }

    pub fn status(&self) -> PlaybackStatus {
        self.monitor.lock().status
    }

    /// Item currently playing (or last started), if any.
    pub fn current_item(&self) -> Option<Arc<MediaItem>> {
        let shared = self.monitor.lock();
        shared
            .queue
            .current_item
            .and_then(|node| shared.tree.item(node).cloned())
    }

    pub fn root(&self) -> NodeId {
        self.monitor.lock().tree.root()
    }

    /// Runs a read-only closure against a consistent tree snapshot.
    pub fn with_tree<R>(&self, read: impl FnOnce(&PlaylistTree) -> R) -> R {
        read(&self.monitor.lock().tree)
    }

    /// Appends a new leaf; marks the order stale when the parent lives
    /// under the active root.
    pub fn add_leaf(&self, parent: NodeId, item: Arc<MediaItem>) -> Option<NodeId> {
        let mut shared = self.monitor.lock();
        let state = &mut *shared;
        let id = state.tree.add_leaf(parent, item)?;
        if state.tree.is_descendant_of(parent, state.queue.current_root) {
            state.queue.rebuild_required = true;
        }
        self.monitor.signal();
        Some(id)
    }

    /// Appends a new container. An empty container adds no leaves, so the
    /// order stays valid.
    pub fn add_container(&self, parent: NodeId) -> Option<NodeId> {
        let mut shared = self.monitor.lock();
        let id = shared.tree.add_container(parent)?;
        self.monitor.signal();
        Some(id)
    }

    /// Removes a subtree, repairing the active root and current item when
    /// they fall inside it.
    pub fn remove_node(&self, node: NodeId) -> bool {
        let mut shared = self.monitor.lock();
        let state = &mut *shared;
        let root_goes = state.tree.is_descendant_of(state.queue.current_root, node);
        let under_root = state.tree.is_descendant_of(node, state.queue.current_root);
        let current_goes = state
            .queue
            .current_item
            .is_some_and(|current| state.tree.is_descendant_of(current, node));
        if !state.tree.remove(node) {
            return false;
        }
        if root_goes {
            state.queue.current_root = state.tree.root();
        }
        if current_goes {
            state.queue.current_item = None;
        }
        if root_goes || under_root {
            state.queue.rebuild_required = true;
        }
        self.monitor.signal();
        true
    }

    /// Moves a node; marks the order stale when either end of the move
    /// touches the active root's subtree.
    pub fn move_node(&self, node: NodeId, new_parent: NodeId, position: usize) -> bool {
        let mut shared = self.monitor.lock();
        let state = &mut *shared;
        let touches = state.tree.is_descendant_of(node, state.queue.current_root)
            || state
                .tree
                .is_descendant_of(new_parent, state.queue.current_root);
        if !state.tree.move_node(node, new_parent, position) {
            return false;
        }
        if touches {
            state.queue.rebuild_required = true;
        }
        self.monitor.signal();
        true
    }

    /// Sets or clears the skip-flag. Order membership is unaffected; the
    /// flag is evaluated at the next decision point.
    pub fn set_skip(&self, node: NodeId, skip: bool) -> bool {
        let mut shared = self.monitor.lock();
        let changed = shared.tree.set_skip(node, skip);
        self.monitor.signal();
        changed
    }
}

/// The scheduler thread body.
fn run_loop(monitor: Arc<Monitor>, factory: Box<dyn WorkerFactory>, bus: Sender<Message>) {
    let notifier = {
        let monitor = Arc::clone(&monitor);
        WorkerNotifier::new(move || {
            // Notification delivery takes the scheduler lock before
            // signaling, like every other wakeup source.
            let _shared = monitor.lock();
            monitor.signal();
        })
    };

    let mut shared = monitor.lock();
    while shared.alive || shared.worker.is_some() {
        // Debounced rebuild of the playback order.
        if shared.queue.rebuild_required {
            if rebuild_due(shared.last_rebuild, shared.rebuild_debounce) {
                let state = &mut *shared;
                let keep = state.queue.current_item;
                let random = state.flags.random;
                state.queue.rebuild(&state.tree, keep, random, &mut state.rng);
                shared.last_rebuild = Some(Instant::now());
            }
        }

        // Drain the active worker. This ends only when no worker remains;
        // while one is running normally the scheduler sleeps here too.
        loop {
            let stop_wanted = shared.request.is_some() || !shared.alive;
            let outcome = match shared.worker.as_mut() {
                None => break,
                Some(handle) => handle.poll(stop_wanted),
            };
            match outcome {
                PollOutcome::ReapReady => {
                    let mut handle = shared.worker.take().unwrap();
                    let mut bundle = handle.detach_bundle();
                    if !shared.flags.keep_stream_output {
                        bundle.terminate_stream_output();
                    }
                    assert!(shared.detached_bundle.is_none());
                    shared.detached_bundle = Some(bundle);
                    // Deregistration must run unlocked: delivering a worker
                    // notification takes this lock.
                    drop(shared);
                    if !handle.deregister() {
                        error!("worker notifier deregistration failed; reaping anyway");
                    }
                    shared = monitor.lock();
                    handle.join();
                    debug!("worker reaped");
                }
                PollOutcome::NeedStop | PollOutcome::Dying | PollOutcome::Active => {
                    shared = monitor.wait_drain(shared);
                }
            }
        }

        // Effective target status: the pending request's wish, else the
        // current status.
        let target_status = shared
            .request
            .as_ref()
            .and_then(|request| request.status)
            .unwrap_or(shared.status);

        if target_status == PlaybackStatus::Stopped {
            if let Some(bundle) = shared.detached_bundle.as_mut() {
                bundle.terminate_device_output();
            }
            set_stopped(&mut shared, &bus);
            if shared.alive {
                shared = monitor.wait_idle(shared);
            }
            continue;
        }

        let request = shared.request.take();
        let next = {
            let state = &mut *shared;
            selector::compute_next(&state.tree, &mut state.queue, &state.flags, &mut state.rng, request)
        };
        match next {
            Some(node) => {
                debug!("starting new item");
                start_item(&mut shared, node, &notifier, factory.as_ref(), &bus);
            }
            None => {
                debug!("nothing to play");
                set_stopped(&mut shared, &bus);
                if shared.flags.play_and_exit {
                    info!("end of playlist, exiting");
                    let _ = bus.send(Message::Engine(EngineMessage::ExitRequested));
                    shared.alive = false;
                }
            }
        }
    }
    drop(shared);
    debug!("scheduler loop exited");
}

/// A stale order is rebuilt at most once per debounce interval, so bursts
/// of tree mutations collapse into one rebuild. A never-rebuilt order is
/// always due.
fn rebuild_due(last_rebuild: Option<Instant>, debounce: Duration) -> bool {
    last_rebuild.map_or(true, |at| at.elapsed() >= debounce)
}

fn set_stopped(shared: &mut Shared, bus: &Sender<Message>) {
    if shared.status != PlaybackStatus::Stopped {
        shared.status = PlaybackStatus::Stopped;
        let _ = bus.send(Message::Playback(PlaybackMessage::Stopped));
    }
}

/// Starts the worker for one item. Requires that no worker is active.
fn start_item(
    shared: &mut Shared,
    node: NodeId,
    notifier: &WorkerNotifier,
    factory: &dyn WorkerFactory,
    bus: &Sender<Message>,
) {
    let Some(item) = shared.tree.item(node).cloned() else {
        // The leaf vanished between decision and start; the next iteration
        // rebuilds and moves on.
        debug!("item vanished before start");
        return;
    };

    debug!("creating new playback worker for {}", item.uri);
    let play_count = item.record_played();
    shared.queue.current_item = Some(node);
    shared.status = PlaybackStatus::Running;

    assert!(
        shared.worker.is_none(),
        "a playback worker is already active"
    );
    let mut bundle = shared
        .detached_bundle
        .take()
        .unwrap_or_else(ResourceBundle::empty);
    match factory.create(&item, &mut bundle, notifier.clone()) {
        Some(worker) => {
            shared.worker = Some(WorkerHandle::new(worker, bundle, Arc::clone(&item)));
        }
        None => {
            error!("cannot create playback worker for {}", item.uri);
            // Keep the bundle for the next attempt.
            shared.detached_bundle = Some(bundle);
            return;
        }
    }

    if shared.flags.art_fetch == ArtFetchPolicy::WhenPlayed
        && !item.is_internal_uri()
        && (!item.has_art() || !item.has_embedded_art())
    {
        debug!("requesting art for {}", item.title);
        let _ = bus.send(Message::Fetch(FetchMessage::ArtRequested(ArtFetchRequest {
            id: item.id.clone(),
            uri: item.uri.clone(),
            title: item.title.clone(),
        })));
    }

    let _ = bus.send(Message::Playback(PlaybackMessage::ItemStarted(ItemStarted {
        id: item.id.clone(),
        uri: item.uri.clone(),
        title: item.title.clone(),
        play_count,
    })));
}
