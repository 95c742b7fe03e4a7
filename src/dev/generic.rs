//! The general-purpose read/write device.

use crate::layer::{Layer, OpenError, SendError, Status};
use crate::util::Event;
use crate::{Eid, Message};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

type RxCallback = Box<dyn Fn(&mut Message, Eid) + Send + Sync + 'static>;

/// A generic device: the application-facing top of a stack.
///
/// Received messages land in a buffer that [`read`](Generic::read) drains
/// with a timeout; fragmented sequences (`more` set) are reassembled before
/// they become readable. [`write`](Generic::write) sends downward and, when
/// blocking, waits on the transmit latch until the stack reports `TxDone`
/// (or a transmit error).
///
/// ```no_run
/// use lamina::{com, dev, Eid, Layer};
/// use std::time::Duration;
///
/// let bottom = com::Null::new();
/// let device = dev::Generic::new(bottom);
/// device.open("", Eid::ANY).unwrap();
/// device.write_slice(b"hello", Eid::ANY, false, true).unwrap();
/// let _answer = device.read(Duration::from_millis(100));
/// ```
pub struct Generic {
    lower: Arc<dyn Layer>,
    state: Mutex<State>,
    rx_ev: Event,
    tx_ev: Event,
    con_ev: Event,
}

struct State {
    open: bool,
    connected: bool,
    eid: Eid,
    rx: Option<Message>,
    rx_eid: Eid,
    rx_more: bool,
    tx_status: Status,
    callback: Option<RxCallback>,
}

impl Generic {
    pub fn new(lower: Arc<dyn Layer>) -> Arc<Self> {
        let this = Arc::new(Generic {
            lower: lower.clone(),
            state: Mutex::new(State {
                open: false,
                connected: false,
                eid: Eid::ANY,
                rx: None,
                rx_eid: Eid::ANY,
                rx_more: false,
                tx_status: Status::Disconnected,
                callback: None,
            }),
            rx_ev: Event::new(),
            tx_ev: Event::new(),
            con_ev: Event::new(),
        });
        // The transmit latch starts released: nothing is in flight yet.
        this.tx_ev.set();
        let weak: Weak<dyn Layer> = Arc::downgrade(&(this.clone() as Arc<dyn Layer>));
        lower.attach_upper(weak);
        this
    }

    /// Whether the device is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    /// Whether the stack below reported `Connected`, waiting up to
    /// `timeout` for it to do so.
    pub fn is_connected(&self, timeout: Duration) -> bool {
        if !self.state.lock().unwrap().connected && !timeout.is_zero() {
            self.con_ev.wait_for(timeout);
        }
        self.state.lock().unwrap().connected
    }

    /// Sends a message down the stack. With `blocking` set, waits for the
    /// transmit latch and reports the final transmit status; otherwise
    /// returns as soon as the stack accepted the message.
    pub fn write(
        &self,
        data: &mut Message,
        id: Eid,
        more: bool,
        blocking: bool,
    ) -> Result<(), SendError> {
        {
            let state = self.state.lock().unwrap();
            if !state.open {
                tracing::error!("device is not open, sending not possible");
                return Err(SendError::NotOpen);
            }
            if !state.connected {
                tracing::error!("device is not connected, sending not possible");
                return Err(SendError::NotOpen);
            }
        }
        if !self.tx_ev.get() {
            tracing::error!("transmission in progress, sending not possible");
            return Err(SendError::Busy);
        }
        self.tx_ev.reset();
        let result = self.lower.send(data, id, more);
        if result.is_err() {
            // Nothing went out, so nothing will complete: release the latch.
            self.tx_ev.set();
            return result;
        }
        if !blocking {
            return Ok(());
        }
        self.tx_ev.wait();
        match self.state.lock().unwrap().tx_status {
            Status::TxDone => Ok(()),
            Status::TxTimeout => Err(SendError::Timeout),
            _ => Err(SendError::Rejected),
        }
    }

    /// Sends a byte slice down the stack.
    pub fn write_slice(
        &self,
        bytes: &[u8],
        id: Eid,
        more: bool,
        blocking: bool,
    ) -> Result<(), SendError> {
        let mut message = Message::from_slice(bytes)?;
        self.write(&mut message, id, more, blocking)
    }

    /// Takes the next complete received message, waiting up to `timeout`.
    pub fn read(&self, timeout: Duration) -> Option<(Message, Eid)> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if !state.rx_more {
                    if let Some(message) = state.rx.take() {
                        self.rx_ev.reset();
                        return Some((message, state.rx_eid));
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if !self.rx_ev.wait_for(deadline - now) {
                return None;
            }
        }
    }

    /// Installs a callback run on every complete received message, on the
    /// thread the stack delivers it on. The message stays readable through
    /// [`read`](Self::read) afterwards.
    pub fn set_receive_callback(&self, callback: impl Fn(&mut Message, Eid) + Send + Sync + 'static) {
        self.state.lock().unwrap().callback = Some(Box::new(callback));
    }
}

impl Layer for Generic {
    fn name(&self) -> &'static str {
        "dev_generic"
    }

    fn attach_upper(&self, _upper: Weak<dyn Layer>) {
        tracing::error!("a device is the top of its stack");
    }

    fn open(&self, address: &str, id: Eid) -> Result<(), OpenError> {
        if self.state.lock().unwrap().open {
            tracing::warn!("device already open");
            return Err(OpenError::AlreadyOpen);
        }
        self.lower.open(address, id)?;
        let mut state = self.state.lock().unwrap();
        state.open = true;
        state.eid = id;
        Ok(())
    }

    fn close(&self, id: Eid) {
        {
            let mut state = self.state.lock().unwrap();
            state.open = false;
            state.rx = None;
            state.rx_more = false;
            self.rx_ev.reset();
        }
        self.lower.close(id);
    }

    fn send(&self, data: &mut Message, id: Eid, more: bool) -> Result<(), SendError> {
        self.lower.send(data, id, more)
    }

    fn receive(&self, data: &mut Message, id: Eid, more: bool) {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return;
        }
        if !state.eid.is_any() && !id.is_any() && id != state.eid {
            // not for us
            return;
        }
        if state.rx_more {
            // Mid-sequence: extend the pending buffer. The lower layer has
            // dropped its handle on the previous fragment by now, so the
            // pending chain is writable again.
            if let Some(rx) = state.rx.as_mut() {
                if let Err(e) = rx.append(data) {
                    tracing::warn!(error = %e, "dropping fragment");
                }
            }
        } else {
            state.rx = Some(data.ref_copy());
        }
        state.rx_eid = id;
        state.rx_more = more;
        if !more {
            if let (Some(callback), Some(rx)) = (state.callback.take(), state.rx.as_mut()) {
                callback(rx, id);
                state.callback = Some(callback);
            }
            self.rx_ev.set();
        }
    }

    fn indication(&self, status: Status, id: Eid) {
        let mut state = self.state.lock().unwrap();
        if !state.eid.is_any() && !id.is_any() && id != state.eid {
            return;
        }
        match status {
            Status::Connected => {
                state.connected = true;
                self.con_ev.set();
            }
            Status::Disconnected => {
                state.connected = false;
                self.con_ev.reset();
            }
            Status::TxDone | Status::TxError | Status::TxTimeout => {
                state.tx_status = status;
                self.tx_ev.set();
            }
            _ => {}
        }
    }
}
