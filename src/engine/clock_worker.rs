//! Wall-clock playback worker for the demo binary and tests.
//!
//! Plays an item by simply letting its duration elapse on a background
//! thread, walking the full worker lifecycle along the way: `Running` until
//! the clock runs out (or an early stop arrives), then `EndOfStream`, then
//! `Dying` once stopped, then `Dead`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::engine::worker::{
    OutputResource, PlaybackWorker, ResourceBundle, WorkerFactory, WorkerNotifier, WorkerState,
};
use crate::playlist::tree::MediaItem;

const STATE_RUNNING: u8 = 0;
const STATE_END_OF_STREAM: u8 = 1;
const STATE_DYING: u8 = 2;
const STATE_DEAD: u8 = 3;

const TICK: Duration = Duration::from_millis(1);

fn decode(raw: u8) -> WorkerState {
    match raw {
        STATE_RUNNING => WorkerState::Running,
        STATE_END_OF_STREAM => WorkerState::EndOfStream,
        STATE_DYING => WorkerState::Dying,
        _ => WorkerState::Dead,
    }
}

pub struct ClockWorker {
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    notifier: Arc<Mutex<Option<WorkerNotifier>>>,
    thread: Option<JoinHandle<()>>,
}

impl ClockWorker {
    /// Spawns the clock thread for `item`. Items without a duration play
    /// for one second.
    pub fn spawn(item: &Arc<MediaItem>, notifier: WorkerNotifier) -> std::io::Result<Self> {
        let duration = Duration::from_millis(item.duration_ms.unwrap_or(1_000));
        let state = Arc::new(AtomicU8::new(STATE_RUNNING));
        let stop = Arc::new(AtomicBool::new(false));
        let notifier = Arc::new(Mutex::new(Some(notifier)));

        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);
        let thread_notifier = Arc::clone(&notifier);
        let thread = thread::Builder::new()
            .name("cueflow-clock".to_string())
            .spawn(move || {
                let advance = |state: u8| {
                    thread_state.store(state, Ordering::SeqCst);
                    if let Some(notifier) = thread_notifier.lock().unwrap().as_ref() {
                        notifier.notify();
                    }
                };

                let started = Instant::now();
                while !thread_stop.load(Ordering::SeqCst) && started.elapsed() < duration {
                    thread::sleep(TICK);
                }
                if !thread_stop.load(Ordering::SeqCst) {
                    debug!("clock ran out");
                    advance(STATE_END_OF_STREAM);
                    // Hold the end-of-stream state until told to stop.
                    while !thread_stop.load(Ordering::SeqCst) {
                        thread::sleep(TICK);
                    }
                }
                advance(STATE_DYING);
                advance(STATE_DEAD);
            })?;

        Ok(Self {
            state,
            stop,
            notifier,
            thread: Some(thread),
        })
    }
}

impl PlaybackWorker for ClockWorker {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn state(&self) -> WorkerState {
        decode(self.state.load(Ordering::SeqCst))
    }

    fn deregister_notifier(&self) -> bool {
        self.notifier.lock().unwrap().take();
        true
    }

    fn join(mut self: Box<Self>) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("clock worker thread panicked");
            }
        }
    }
}

/// Output resource standing in for a real device stream; only logs.
struct ClockOutput;

impl OutputResource for ClockOutput {
    fn label(&self) -> &str {
        "clock-output"
    }

    fn shut_down(&mut self) {
        debug!("clock output shut down");
    }
}

/// Creates [`ClockWorker`]s, installing a stand-in device output into the
/// bundle the first time around so reuse across generations is visible in
/// the logs.
pub struct ClockWorkerFactory;

impl WorkerFactory for ClockWorkerFactory {
    fn create(
        &self,
        item: &Arc<MediaItem>,
        bundle: &mut ResourceBundle,
        notifier: WorkerNotifier,
    ) -> Option<Box<dyn PlaybackWorker>> {
        if !bundle.has_device_output() {
            debug!("allocating device output");
            bundle.install_device_output(Box::new(ClockOutput));
        }
        match ClockWorker::spawn(item, notifier) {
            Ok(worker) => Some(Box::new(worker)),
            Err(error) => {
                error!("cannot spawn clock worker for {}: {error}", item.uri);
                None
            }
        }
    }
}
