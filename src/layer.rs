//! The five-operation contract every stack node honors.
//!
//! A stack is a chain of [`Layer`]s: data goes down through [`Layer::send`],
//! up through [`Layer::receive`], status goes up through
//! [`Layer::indication`], and the lifecycle is driven by [`Layer::open`] and
//! [`Layer::close`]. Stacks are wired bottom-up at construction time: a node
//! is handed its lower neighbor as an `Arc<dyn Layer>` and installs itself
//! as that neighbor's upper via [`Layer::attach_upper`]. The upward pointer
//! is a non-owning [`Weak`] observer; lifetime is governed by the
//! application holding the stack top-down.

use crate::{Eid, Message};
use std::sync::{Arc, RwLock, Weak};

/// Status indications flowing from lower to upper layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Connection established; the layer can be used for communication now.
    Connected,
    /// Interface, line or peer gone, or the connection ended.
    Disconnected,
    /// Data completely transmitted; the lower layer accepts the next send.
    TxDone,
    /// Unrecoverable transmission error; the transfer is aborted.
    TxError,
    /// Transmit timeout; the upper layer may resend the last data.
    TxTimeout,
    /// A received frame was malformed and has been discarded.
    RxError,
    /// Reception timed out mid-transfer; the transfer was abandoned.
    RxTimeout,
    /// Receive buffer space ran out; data was dropped to keep sync.
    RxOverrun,
}

/// Why a layer refused to open.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum OpenError {
    /// No upper layer is attached; the stack is dangling.
    #[error("no upper layer is attached")]
    NoUpper,
    /// The layer is already open.
    #[error("the layer is already open")]
    AlreadyOpen,
    /// A layer further down refused to open.
    #[error("the lower layer failed to open")]
    Lower,
    /// The layer rejected the open for its own reasons.
    #[error("the layer rejected the open")]
    Rejected,
}

/// Why a layer rejected a message. A rejected message is not queued; the
/// caller keeps ownership and may retry or drop it.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The layer is not open.
    #[error("the layer is not open")]
    NotOpen,
    /// A transfer is already in progress; wait for `TxDone`.
    #[error("a transfer is already in progress")]
    Busy,
    /// The message exceeds the protocol's maximum data length.
    #[error("the message exceeds the maximum data length")]
    TooLong,
    /// The transmission timed out; the caller may resend.
    #[error("the transmission timed out")]
    Timeout,
    /// A message operation failed underneath the send.
    #[error(transparent)]
    Message(#[from] crate::MessageError),
    /// The lower layer rejected the message.
    #[error("the lower layer rejected the message")]
    Rejected,
}

/// A node in a communication stack.
///
/// Communicators sit at the bottom (no lower neighbor), devices at the top
/// (no upper neighbor), protocols in between. All three speak this
/// interface. Messages are passed by `&mut`: a layer may transform the
/// message in place before forwarding it, and on rejection the caller still
/// owns it untouched.
///
/// Within one stack the implementations are not re-entered concurrently for
/// a single direction, but upward calls arrive on communicator worker
/// threads and may interleave with application-initiated downward calls;
/// layers with state serialize it internally.
pub trait Layer: Send + Sync + 'static {
    /// The layer's name for diagnostics.
    fn name(&self) -> &'static str;

    /// Installs the upper neighbor during stack assembly. Called by the
    /// constructor of the layer stacking itself on top of this one.
    fn attach_upper(&self, upper: Weak<dyn Layer>);

    /// Establishes downstream state. Opening cascades bottom-up: a layer
    /// asks its lower neighbor first and only then brings up its own state,
    /// so a refusal deep in the stack halts the cascade.
    fn open(&self, address: &str, id: Eid) -> Result<(), OpenError>;

    /// Tears down. Closing cascades top-down: a layer shuts its own state
    /// first, then closes its lower neighbor. Reentrant and idempotent;
    /// safe to call at any time from any layer.
    fn close(&self, id: Eid);

    /// Accepts a message from the layer above (or the application, at the
    /// top). `more` flags a fragment that will be followed by another
    /// message. `Ok` transfers ownership downward; `Err` means rejected,
    /// not queued.
    fn send(&self, data: &mut Message, id: Eid, more: bool) -> Result<(), SendError>;

    /// Accepts upward data from the layer below. Ownership transfers to
    /// this layer.
    fn receive(&self, data: &mut Message, id: Eid, more: bool);

    /// Accepts a status indication from the layer below.
    fn indication(&self, status: Status, id: Eid);
}

/// The non-owning upward link of a layer.
///
/// Wraps the `Weak` upper pointer and provides the pass-through defaults:
/// forward received data and indications to the upper neighbor unchanged,
/// dropping them when no upper is attached (a closed or half-built stack).
pub struct UpperLink {
    upper: RwLock<Weak<dyn Layer>>,
}

impl UpperLink {
    pub fn new() -> Self {
        let unattached: Weak<dyn Layer> = Weak::<Unattached>::new();
        UpperLink {
            upper: RwLock::new(unattached),
        }
    }

    /// Installs the upper neighbor.
    pub fn set(&self, upper: Weak<dyn Layer>) {
        *self.upper.write().unwrap() = upper;
    }

    /// The upper neighbor, if one is attached and still alive.
    pub fn get(&self) -> Option<Arc<dyn Layer>> {
        self.upper.read().unwrap().upgrade()
    }

    /// Whether an upper neighbor is attached. Layers refuse to open
    /// without one.
    pub fn is_attached(&self) -> bool {
        self.get().is_some()
    }

    /// Pass-through default: forward data upward, dropping it when no
    /// upper is attached.
    pub fn receive(&self, data: &mut Message, id: Eid, more: bool) {
        if let Some(upper) = self.get() {
            upper.receive(data, id, more);
        }
    }

    /// Pass-through default: forward a status indication upward.
    pub fn indication(&self, status: Status, id: Eid) {
        if let Some(upper) = self.get() {
            upper.indication(status, id);
        }
    }
}

impl Default for UpperLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder type for a not-yet-wired upper link; `Weak::new` needs a
/// sized type to start from.
struct Unattached;

impl Layer for Unattached {
    fn name(&self) -> &'static str {
        "unattached"
    }
    fn attach_upper(&self, _upper: Weak<dyn Layer>) {}
    fn open(&self, _address: &str, _id: Eid) -> Result<(), OpenError> {
        Err(OpenError::Rejected)
    }
    fn close(&self, _id: Eid) {}
    fn send(&self, _data: &mut Message, _id: Eid, _more: bool) -> Result<(), SendError> {
        Err(SendError::Rejected)
    }
    fn receive(&self, _data: &mut Message, _id: Eid, _more: bool) {}
    fn indication(&self, _status: Status, _id: Eid) {}
}
