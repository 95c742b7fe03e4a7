//! A transparent tap that logs everything passing through it.

use crate::layer::{Layer, OpenError, SendError, Status, UpperLink};
use crate::{Eid, Message};
use std::sync::{Arc, Weak};

/// A pass-through layer that forwards all five operations unchanged while
/// logging them through `tracing`. Insert one anywhere in a stack to watch
/// the traffic crossing that boundary.
pub struct Trace {
    lower: Arc<dyn Layer>,
    upper: UpperLink,
}

impl Trace {
    pub fn new(lower: Arc<dyn Layer>) -> Arc<Self> {
        let this = Arc::new(Trace {
            lower: lower.clone(),
            upper: UpperLink::new(),
        });
        let weak: Weak<dyn Layer> = Arc::downgrade(&(this.clone() as Arc<dyn Layer>));
        lower.attach_upper(weak);
        this
    }

    fn peer_above(&self) -> &'static str {
        self.upper.get().map(|upper| upper.name()).unwrap_or("?")
    }
}

impl Layer for Trace {
    fn name(&self) -> &'static str {
        "prot_trace"
    }

    fn attach_upper(&self, upper: Weak<dyn Layer>) {
        self.upper.set(upper);
    }

    fn open(&self, address: &str, id: Eid) -> Result<(), OpenError> {
        tracing::info!(address, eid = %id, "OPEN");
        self.lower.open(address, id)
    }

    fn close(&self, id: Eid) {
        tracing::info!(eid = %id, "CLOSE");
        self.lower.close(id);
    }

    fn send(&self, data: &mut Message, id: Eid, more: bool) -> Result<(), SendError> {
        tracing::debug!(
            from = self.peer_above(),
            to = self.lower.name(),
            eid = %id,
            more,
            len = data.len(),
            frame = %data,
            "send"
        );
        self.lower.send(data, id, more)
    }

    fn receive(&self, data: &mut Message, id: Eid, more: bool) {
        tracing::debug!(
            from = self.lower.name(),
            to = self.peer_above(),
            eid = %id,
            more,
            len = data.len(),
            frame = %data,
            "receive"
        );
        self.upper.receive(data, id, more);
    }

    fn indication(&self, status: Status, id: Eid) {
        tracing::info!(status = ?status, eid = %id, "indication");
        self.upper.indication(status, id);
    }
}
