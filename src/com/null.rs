//! A communicator that swallows everything.

use crate::layer::{Layer, OpenError, SendError, Status, UpperLink};
use crate::{Eid, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// The `/dev/null` of communicators: opens successfully, acknowledges every
/// send with `TxDone` and drops the data. Useful as a stand-in bottom layer.
pub struct Null {
    upper: UpperLink,
    open: AtomicBool,
}

impl Null {
    pub fn new() -> Arc<Self> {
        Arc::new(Null {
            upper: UpperLink::new(),
            open: AtomicBool::new(false),
        })
    }
}

impl Layer for Null {
    fn name(&self) -> &'static str {
        "com_null"
    }

    fn attach_upper(&self, upper: Weak<dyn Layer>) {
        self.upper.set(upper);
    }

    fn open(&self, _address: &str, id: Eid) -> Result<(), OpenError> {
        if !self.upper.is_attached() {
            return Err(OpenError::NoUpper);
        }
        self.open.store(true, Ordering::SeqCst);
        self.upper.indication(Status::Connected, id);
        Ok(())
    }

    fn close(&self, _id: Eid) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn send(&self, _data: &mut Message, id: Eid, _more: bool) -> Result<(), SendError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SendError::NotOpen);
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
