//! One-shot and periodic callback timers.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

/// A restartable timer running its callback on a dedicated worker thread.
///
/// [`start`](Timer::start) schedules the callback after `period`; a periodic
/// timer reschedules itself by `period` until [`stop`](Timer::stop).
/// Restarting supersedes the previous schedule, and a callback may restart
/// or stop its own timer. `stop` is idempotent; a callback that is already
/// in flight when `stop` is called may still complete, but no further one
/// will fire. There is at most one outstanding firing per timer.
///
/// The worker thread is private to the timer, so a callback is allowed to
/// perform a bounded wait without stalling anything but its own timer.
pub struct Timer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    running: bool,
    quit: bool,
    periodic: bool,
    period: Duration,
    deadline: Instant,
    callback: Option<Callback>,
    /// Bumped on every start/stop so a worker that already decided to wait
    /// never fires a superseded schedule.
    generation: u64,
}

impl Timer {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                running: false,
                quit: false,
                periodic: false,
                period: Duration::ZERO,
                deadline: Instant::now(),
                callback: None,
                generation: 0,
            }),
            cond: Condvar::new(),
        });
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("lamina-timer".into())
                .spawn(move || Self::worker(&shared))
                .expect("failed to spawn timer thread")
        };
        Timer {
            shared,
            worker: Some(worker),
        }
    }

    /// Starts or restarts the timer. The callback fires after `period`, and
    /// again every `period` if `periodic`.
    pub fn start(
        &self,
        period: Duration,
        periodic: bool,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        let mut state = self.shared.state.lock().unwrap();
        state.generation += 1;
        state.period = period;
        state.periodic = periodic;
        state.deadline = Instant::now() + period;
        state.callback = Some(Arc::new(callback));
        state.running = true;
        self.shared.cond.notify_all();
    }

    /// Cancels any pending schedule. Idempotent.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.generation += 1;
        state.running = false;
        self.shared.cond.notify_all();
    }

    /// Whether a schedule is pending.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().running
    }

    fn worker(shared: &Shared) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.quit {
                return;
            }
            if !state.running {
                state = shared.cond.wait(state).unwrap();
                continue;
            }
            let generation = state.generation;
            let now = Instant::now();
            if now < state.deadline {
                let timeout = state.deadline - now;
                state = shared.cond.wait_timeout(state, timeout).unwrap().0;
                // Whatever happened (expiry, restart, stop, quit), the top
                // of the loop re-evaluates against the current schedule.
                continue;
            }
            if state.generation != generation {
                continue;
            }
            // Due: disarm or advance before running the callback, so the
            // callback itself may restart the timer.
            if state.periodic {
                let period = state.period;
                state.deadline += period;
            } else {
                state.running = false;
            }
            let callback = state.callback.clone();
            drop(state);
            if let Some(callback) = callback {
                callback();
            }
            state = shared.state.lock().unwrap();
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.running = false;
            state.quit = true;
            self.shared.cond.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
