//! SLIP framing after RFC 1055.
//!
//! SLIP moves discrete packets over a byte stream by byte stuffing: a
//! packet is terminated by `END`, and occurrences of `END`/`ESC` inside the
//! data are replaced by two-byte escape sequences. An `END` is also sent
//! ahead of each packet to flush any line noise the receiver may have
//! accumulated — back-to-back `END`s decode as empty packets and are
//! dropped, which is the protocol's natural resync behavior.

use crate::layer::{Layer, OpenError, SendError, Status, UpperLink};
use crate::{Eid, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Indicates start/end of a packet.
const END: u8 = 0xC0;
/// Indicates byte stuffing.
const ESC: u8 = 0xDB;
/// `ESC ESC_END` means an `END` data byte.
const ESC_END: u8 = 0xDC;
/// `ESC ESC_ESC` means an `ESC` data byte.
const ESC_ESC: u8 = 0xDD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Waiting for the starting `END` delimiter.
    Idle,
    /// Inside a packet.
    Data,
    /// An `ESC` was seen; the next byte picks the substitution.
    EscSeen,
}

/// The SLIP framing protocol.
///
/// Sending with `more` set accumulates the fragment into the pending frame
/// and raises `TxDone` upward so the application may stream; the frame goes
/// on the wire when the last fragment (`more == false`) arrives.
pub struct Slip {
    lower: Arc<dyn Layer>,
    upper: UpperLink,
    open: AtomicBool,
    tx: Mutex<Message>,
    rx: Mutex<Decoder>,
}

struct Decoder {
    state: RxState,
    packet: Message,
}

impl Slip {
    pub fn new(lower: Arc<dyn Layer>) -> Arc<Self> {
        let this = Arc::new(Slip {
            lower: lower.clone(),
            upper: UpperLink::new(),
            open: AtomicBool::new(false),
            tx: Mutex::new(Message::new()),
            rx: Mutex::new(Decoder {
                state: RxState::Idle,
                packet: Message::new(),
            }),
        });
        let weak: Weak<dyn Layer> = Arc::downgrade(&(this.clone() as Arc<dyn Layer>));
        lower.attach_upper(weak);
        this
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Drops the packet under construction and hunts for the next `END`.
    fn resync(decoder: &mut Decoder) {
        decoder.packet.clear();
        decoder.state = RxState::Idle;
    }
}

impl Layer for Slip {
    fn name(&self) -> &'static str {
        "prot_slip"
    }

    fn attach_upper(&self, upper: Weak<dyn Layer>) {
        self.upper.set(upper);
    }

    fn open(&self, address: &str, id: Eid) -> Result<(), OpenError> {
        if !self.upper.is_attached() {
            return Err(OpenError::NoUpper);
        }
        self.lower.open(address, id)?;
        let mut decoder = self.rx.lock().unwrap();
        Self::resync(&mut decoder);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, id: Eid) {
        self.open.store(false, Ordering::SeqCst);
        self.tx.lock().unwrap().clear();
        let mut decoder = self.rx.lock().unwrap();
        Self::resync(&mut decoder);
        drop(decoder);
        self.lower.close(id);
    }

    fn send(&self, packet: &mut Message, id: Eid, more: bool) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        let mut tx = self.tx.lock().unwrap();
        let prior = tx.len();
        let encode = |tx: &mut Message| -> Result<(), crate::MessageError> {
            if tx.is_empty() {
                // Flush initiator ahead of a fresh frame.
                tx.push_back(END)?;
            }
            for byte in packet.iter() {
                match byte {
                    END => {
                        tx.push_back(ESC)?;
                        tx.push_back(ESC_END)?;
                    }
                    ESC => {
                        tx.push_back(ESC)?;
                        tx.push_back(ESC_ESC)?;
                    }
                    _ => tx.push_back(byte)?,
                }
            }
            Ok(())
        };
        if let Err(e) = encode(&mut *tx) {
            let _ = tx.resize(prior);
            return Err(e.into());
        }
        if more {
            // Fragment accumulated; let the application push the next one.
            drop(tx);
            self.upper.indication(Status::TxDone, id);
            return Ok(());
        }
        if let Err(e) = tx.push_back(END) {
            let _ = tx.resize(prior);
            return Err(e.into());
        }
        let result = self.lower.send(&mut *tx, id, false);
        tx.clear();
        result
    }

    fn receive(&self, data: &mut Message, id: Eid, _more: bool) {
        if !self.is_open() {
            return;
        }
        let mut decoder = self.rx.lock().unwrap();
        for byte in data.iter() {
            match decoder.state {
                RxState::Idle => {
                    if byte == END {
                        decoder.state = RxState::Data;
                    }
                    // anything else is line noise
                }
                RxState::Data => match byte {
                    ESC => decoder.state = RxState::EscSeen,
                    END => {
                        if !decoder.packet.is_empty() {
                            let mut packet = std::mem::take(&mut decoder.packet);
                            self.upper.receive(&mut packet, id, false);
                        }
                        decoder.state = RxState::Idle;
                    }
                    _ => {
                        if decoder.packet.push_back(byte).is_err() {
                            tracing::warn!("packet buffer exhausted, resyncing");
                            self.upper.indication(Status::RxOverrun, id);
                            Self::resync(&mut decoder);
                        }
                    }
                },
                RxState::EscSeen => {
                    let substituted = match byte {
                        ESC_END => Some(END),
                        ESC_ESC => Some(ESC),
                        _ => None,
                    };
                    match substituted {
                        Some(value) => {
                            decoder.state = RxState::Data;
                            if decoder.packet.push_back(value).is_err() {
                                tracing::warn!("packet buffer exhausted, resyncing");
                                self.upper.indication(Status::RxOverrun, id);
                                Self::resync(&mut decoder);
                            }
                        }
                        None => {
                            tracing::error!(byte, "unexpected byte after ESC, discarding packet");
                            Self::resync(&mut decoder);
                        }
                    }
                }
            }
        }
    }

    fn indication(&self, status: Status, id: Eid) {
        self.upper.indication(status, id);
    }
}
