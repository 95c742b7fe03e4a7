//! A binary latch for signaling between threads.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A waitable binary event.
///
/// `set` releases the current and any future `wait` until `reset` clears
/// the latch again; waiting does not consume the state. There are no
/// spurious wake-ups: the state is re-checked under the lock.
///
/// ```
/// use lamina::util::Event;
/// use std::time::Duration;
///
/// let event = Event::new();
/// event.set();
/// assert!(event.wait_for(Duration::from_millis(1)));
/// event.reset();
/// assert!(!event.wait_for(Duration::from_millis(1)));
/// ```
pub struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Sets the event, releasing any current or future waiter.
    pub fn set(&self) {
        let mut state = self.state.lock().unwrap();
        *state = true;
        self.cond.notify_all();
    }

    /// Clears the event.
    pub fn reset(&self) {
        *self.state.lock().unwrap() = false;
    }

    /// The current state of the latch.
    pub fn get(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Blocks until the event is set. Returns immediately if it already is.
    /// Does not reset the event.
    pub fn wait(&self) {
        let state = self.state.lock().unwrap();
        let _state = self.cond.wait_while(state, |set| !*set).unwrap();
    }

    /// Blocks until the event is set or `timeout` elapses. Returns `true`
    /// if the event was set within the timeout. Does not reset the event.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (_state, result) = self
            .cond
            .wait_timeout_while(state, timeout, |set| !*set)
            .unwrap();
        !result.timed_out()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn preset_event_returns_immediately() {
        let event = Event::new();
        event.set();
        let begin = Instant::now();
        event.wait();
        assert!(event.wait_for(Duration::from_secs(5)));
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert!(event.get());
    }

    #[test]
    fn wait_for_times_out_when_unset() {
        let event = Event::new();
        assert!(!event.wait_for(Duration::from_millis(20)));
        event.set();
        event.reset();
        assert!(!event.wait_for(Duration::from_millis(20)));
    }

    #[test]
    fn set_releases_waiter_on_other_thread() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait_for(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        event.set();
        assert!(waiter.join().unwrap());
    }
}
