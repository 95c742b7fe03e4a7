//! A pair of communicators connected back to back.

use crate::layer::{Layer, OpenError, SendError, Status, UpperLink};
use crate::{Eid, Message};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

/// One half of an in-process loopback link.
///
/// Everything sent down into one half is delivered upward out of its
/// registered peer, so two complete stacks can talk to each other without
/// hardware. Delivery happens on a worker thread owned by the sending half:
/// the layers above the peer are invoked on that thread, exactly like a
/// hardware communicator dispatching completion events.
///
/// ```no_run
/// use lamina::com::Loopback;
///
/// let left = Loopback::new();
/// let right = Loopback::new();
/// left.register_peer(&right);
/// right.register_peer(&left);
/// // stack protocols and devices on top of each half, then open the tops
/// ```
pub struct Loopback {
    upper: UpperLink,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    queue: VecDeque<(Message, Eid, bool)>,
    peer: Weak<Loopback>,
    open: bool,
    quit: bool,
}

impl Loopback {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                peer: Weak::new(),
                open: false,
                quit: false,
            }),
            cond: Condvar::new(),
        });
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("lamina-loopback".into())
                .spawn(move || Self::worker(&shared))
                .expect("failed to spawn loopback worker")
        };
        Arc::new(Loopback {
            upper: UpperLink::new(),
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Registers the other half. Both halves must be registered with each
    /// other before either is opened.
    pub fn register_peer(&self, peer: &Arc<Loopback>) {
        self.shared.state.lock().unwrap().peer = Arc::downgrade(peer);
    }

    fn worker(shared: &Shared) {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.quit {
                return;
            }
            let Some((message, id, more)) = state.queue.pop_front() else {
                state = shared.cond.wait(state).unwrap();
                continue;
            };
            let peer = state.peer.upgrade();
            drop(state);
            if let Some(peer) = peer {
                peer.deliver(message, id, more);
            }
            state = shared.state.lock().unwrap();
        }
    }

    /// Hands a frame from the other half to the layer above this one.
    fn deliver(&self, mut data: Message, id: Eid, more: bool) {
        if !self.shared.state.lock().unwrap().open {
            tracing::debug!(layer = self.name(), "dropping delivery, half is closed");
            return;
        }
        self.upper.receive(&mut data, id, more);
    }
}

impl Layer for Loopback {
    fn name(&self) -> &'static str {
        "com_loopback"
    }

    fn attach_upper(&self, upper: Weak<dyn Layer>) {
        self.upper.set(upper);
    }

    fn open(&self, _address: &str, id: Eid) -> Result<(), OpenError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !self.upper.is_attached() {
                return Err(OpenError::NoUpper);
            }
            if state.peer.upgrade().is_none() {
                tracing::error!("loopback opened without a registered peer");
                return Err(OpenError::Rejected);
            }
            state.open = true;
        }
        self.upper.indication(Status::Connected, id);
        Ok(())
    }

    fn close(&self, _id: Eid) {
        let mut state = self.shared.state.lock().unwrap();
        state.open = false;
        state.queue.clear();
    }

    fn send(&self, data: &mut Message, id: Eid, more: bool) -> Result<(), SendError> {
        // The queue entry has to outlive the caller's buffer, so it is a
        // deep copy; the peer gets a writable message of its own.
        let copy = data.try_clone()?;
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.open {
                return Err(SendError::NotOpen);
            }
            state.queue.push_back((copy, id, more));
            self.shared.cond.notify_all();
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

impl Drop for Loopback {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.quit = true;
            self.shared.cond.notify_all();
        }
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}
