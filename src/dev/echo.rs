//! A device that answers every message with itself.

use crate::layer::{Layer, OpenError, SendError, Status};
use crate::{Eid, Message};
use std::sync::{Arc, Weak};

/// Echo device: whatever arrives from below is sent straight back down.
/// Handy as the far end of a link under test.
pub struct Echo {
    lower: Arc<dyn Layer>,
}

impl Echo {
    pub fn new(lower: Arc<dyn Layer>) -> Arc<Self> {
        let this = Arc::new(Echo {
            lower: lower.clone(),
        });
        let weak: Weak<dyn Layer> = Arc::downgrade(&(this.clone() as Arc<dyn Layer>));
        lower.attach_upper(weak);
        this
    }
}

impl Layer for Echo {
    fn name(&self) -> &'static str {
        "dev_echo"
    }

    fn attach_upper(&self, _upper: Weak<dyn Layer>) {
        tracing::error!("a device is the top of its stack");
    }

    fn open(&self, address: &str, id: Eid) -> Result<(), OpenError> {
        self.lower.open(address, id)
    }

    fn close(&self, id: Eid) {
        self.lower.close(id);
    }

    fn send(&self, data: &mut Message, id: Eid, more: bool) -> Result<(), SendError> {
        self.lower.send(data, id, more)
    }

    fn receive(&self, data: &mut Message, id: Eid, more: bool) {
        tracing::debug!(eid = %id, len = data.len(), "echoing message");
        if let Err(e) = self.lower.send(data, id, more) {
            tracing::warn!(error = %e, "echo send rejected");
        }
    }

    fn indication(&self, _status: Status, _id: Eid) {}
}
