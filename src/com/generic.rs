//! A programmable endpoint for exercising the layers above it.

use crate::layer::{Layer, OpenError, SendError, Status, UpperLink};
use crate::{Eid, Message, MessageError};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// A communicator with no wire behind it.
///
/// Frames sent down the stack are queued and can be inspected with
/// [`read`](Generic::read) / [`wait_read`](Generic::wait_read); frames can
/// be injected upward with [`write`](Generic::write), as if they had
/// arrived from hardware. Each accepted send is acknowledged with `TxDone`.
pub struct Generic {
    upper: UpperLink,
    state: Mutex<State>,
    avail: Condvar,
}

struct State {
    open: bool,
    queue: VecDeque<(Message, Eid, bool)>,
}

impl Generic {
    pub fn new() -> Arc<Self> {
        Arc::new(Generic {
            upper: UpperLink::new(),
            state: Mutex::new(State {
                open: false,
                queue: VecDeque::new(),
            }),
            avail: Condvar::new(),
        })
    }

    /// Injects a message upward, as if received from the wire.
    pub fn write(&self, data: &mut Message, id: Eid, more: bool) -> bool {
        if !self.state.lock().unwrap().open {
            return false;
        }
        self.upper.receive(data, id, more);
        true
    }

    /// Injects a byte slice upward.
    pub fn write_slice(&self, bytes: &[u8], id: Eid) -> Result<bool, MessageError> {
        let mut message = Message::from_slice(bytes)?;
        Ok(self.write(&mut message, id, false))
    }

    /// Takes the oldest frame sent down into this communicator, if any.
    pub fn read(&self) -> Option<(Message, Eid, bool)> {
        self.state.lock().unwrap().queue.pop_front()
    }

    /// Like [`read`](Self::read), but waits up to `timeout` for a frame.
    pub fn wait_read(&self, timeout: Duration) -> Option<(Message, Eid, bool)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(entry) = state.queue.pop_front() {
                return Some(entry);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.avail.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Number of frames waiting to be read.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

impl Layer for Generic {
    fn name(&self) -> &'static str {
        "com_generic"
    }

    fn attach_upper(&self, upper: Weak<dyn Layer>) {
        self.upper.set(upper);
    }

    fn open(&self, _address: &str, id: Eid) -> Result<(), OpenError> {
        if !self.upper.is_attached() {
            return Err(OpenError::NoUpper);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.open = true;
            state.queue.clear();
        }
        self.upper.indication(Status::Connected, id);
        Ok(())
    }

    fn close(&self, id: Eid) {
        self.state.lock().unwrap().open = false;
        self.upper.indication(Status::Disconnected, id);
    }

    fn send(&self, data: &mut Message, id: Eid, more: bool) -> Result<(), SendError> {
        // Queue entries outlive the caller's buffer: deep copy.
        let copy = data.try_clone()?;
        {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(SendError::NotOpen);
            }
            state.queue.push_back((copy, id, more));
            self.avail.notify_all();
        }
        self.upper.indication(Status::TxDone, id);
        Ok(())
    }

    fn receive(&self, _data: &mut Message, _id: Eid, _more: bool) {
        tracing::error!("a communicator has no lower layer to receive from");
    }

    fn indication(&self, _status: Status, _id: Eid) {
        tracing::error!("a communicator has no lower layer to indicate from");
    }
}
