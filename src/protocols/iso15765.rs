//! ISO 15765-2 (CAN-TP) transport protocol.
//!
//! Segments messages of up to 4095 bytes into 8-byte CAN frames and
//! reassembles them on the far side, with receiver-driven flow control.
//! The first byte of every frame (after the optional extended-address
//! byte) carries the N_PCI nibble selecting the frame type:
//!
//! | Type              | N_PCI | carries                          |
//! |-------------------|-------|----------------------------------|
//! | Single Frame      | `0x0` | up to 7 (6 extended) data bytes  |
//! | First Frame       | `0x1` | 12-bit length + first 6 (5) bytes|
//! | Consecutive Frame | `0x2` | sequence number + next bytes     |
//! | Flow Control      | `0x3` | flow status, block size, STmin   |
//!
//! One transfer is in flight per direction at a time. The sender walks
//! `IDLE → WAIT_FC → SEND_CF… → IDLE`, paced by the receiver's STmin and
//! block size; the receiver walks `IDLE → RECEIVING → IDLE` under an N_Cr
//! supervision timer. Extended addressing prefixes every frame with a
//! target address byte and filters inbound frames against the expected
//! source address; zero padding fills every frame to 8 bytes on the wire.

use crate::layer::{Layer, OpenError, SendError, Status, UpperLink};
use crate::util::{Event, Timer};
use crate::{Eid, Message, MessageError};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

const NPCI_SINGLE_FRAME: u8 = 0x00;
const NPCI_FIRST_FRAME: u8 = 0x10;
const NPCI_CONSECUTIVE_FRAME: u8 = 0x20;
const NPCI_FLOW_CONTROL: u8 = 0x30;

/// Flow status values carried in an FC frame.
const FC_CTS: u8 = 0;
const FC_WAIT: u8 = 1;
const FC_OVERFLOW: u8 = 2;

/// Complete frame length on the wire.
const FRAME_LENGTH: usize = 8;
/// FC frame payload: flow status, BS, STmin.
const FC_DATA_LENGTH: usize = 3;

/// Largest transfer the protocol can address (12-bit data length).
const MAX_FRAME_SIZE: u16 = 4095;

/// Network layer timing parameters (ISO 15765-2 defaults).
const N_AS: Duration = Duration::from_millis(1000);
const N_BS: Duration = Duration::from_millis(1000);
const N_CR: Duration = Duration::from_millis(1000);

/// Extended addressing parameters: every outgoing frame is prefixed with
/// `target`, every incoming frame is accepted only if prefixed with
/// `source`.
#[derive(Debug, Clone, Copy)]
struct ExtAddr {
    source: u8,
    target: u8,
}

#[derive(Debug, Clone, Copy)]
struct Options {
    ext: Option<ExtAddr>,
    zero_padding: bool,
    overflow_fc: bool,
}

/// Outbound transfer state. `frame` is `Some` from the FF until the last
/// CF went out or the transfer was aborted.
struct TxTransfer {
    frame: Option<Message>,
    /// Sequence number of the next CF.
    sn: u8,
    /// Bytes of the transfer already put on the wire.
    sent: u16,
    size: u16,
    /// CFs sent since the last FC.
    bs_cnt: u8,
    id: Eid,
    /// Peer parameters from the last FC.
    fc_bs: u8,
    fc_st_min: u8,
}

/// Inbound transfer state. `frame` is `Some` while reassembling.
struct RxTransfer {
    frame: Option<Message>,
    /// Announced total data length.
    dl: u16,
    /// Next expected sequence number.
    sn: u8,
    /// CFs received since the last FC.
    bs_cnt: u8,
    id: Eid,
}

/// The ISO 15765-2 protocol layer.
///
/// `st_min` and `bs` are the local receiver's pacing parameters, announced
/// to the peer in every FC frame; `max_dl` caps the transfer size this side
/// accepts (at most 4095).
pub struct Iso15765 {
    me: Weak<Iso15765>,
    lower: Arc<dyn Layer>,
    upper: UpperLink,
    st_min: u8,
    bs: u8,
    max_dl: u16,
    opts: Mutex<Options>,
    tx: Mutex<TxTransfer>,
    rx: Mutex<RxTransfer>,
    /// Paces CF emission by STmin.
    timer_tx_cf: Timer,
    /// Supervises FC reception (N_Bs).
    timer_tx_fc: Timer,
    /// Supervises CF reception (N_Cr).
    timer_rx_cr: Timer,
    /// Latched by the lower layer's `TxDone`; each CF waits on it bounded
    /// by N_As before going on the wire.
    tx_done: Event,
}

impl Iso15765 {
    pub fn new(lower: Arc<dyn Layer>, st_min: u8, bs: u8, max_dl: u16) -> Arc<Self> {
        let this = Arc::new_cyclic(|me| Iso15765 {
            me: me.clone(),
            lower: lower.clone(),
            upper: UpperLink::new(),
            st_min,
            bs,
            max_dl: max_dl.min(MAX_FRAME_SIZE),
            opts: Mutex::new(Options {
                ext: None,
                zero_padding: false,
                overflow_fc: false,
            }),
            tx: Mutex::new(TxTransfer {
                frame: None,
                sn: 0,
                sent: 0,
                size: 0,
                bs_cnt: 0,
                id: Eid::ANY,
                fc_bs: 0,
                fc_st_min: 0,
            }),
            rx: Mutex::new(RxTransfer {
                frame: None,
                dl: 0,
                sn: 0,
                bs_cnt: 0,
                id: Eid::ANY,
            }),
            timer_tx_cf: Timer::new(),
            timer_tx_fc: Timer::new(),
            timer_rx_cr: Timer::new(),
            tx_done: Event::new(),
        });
        let weak: Weak<dyn Layer> = Arc::downgrade(&(this.clone() as Arc<dyn Layer>));
        lower.attach_upper(weak);
        this
    }

    /// Enables or disables 1-byte extended addressing. Incoming frames not
    /// prefixed with `source` are discarded silently; outgoing frames are
    /// prefixed with `target`. Payload capacity drops by one byte per
    /// frame.
    pub fn set_extended_addressing(&self, enabled: bool, source: u8, target: u8) {
        self.opts.lock().unwrap().ext = enabled.then_some(ExtAddr { source, target });
    }

    /// When enabled, frames shorter than 8 bytes are zero-padded on the
    /// wire. The receiver side ignores trailing bytes beyond the declared
    /// data length either way.
    pub fn set_zero_padding(&self, enabled: bool) {
        self.opts.lock().unwrap().zero_padding = enabled;
    }

    /// When enabled, an oversized First Frame is answered with an FC
    /// OVERFLOW frame before being discarded (uncommon on real buses).
    pub fn set_overflow_fc(&self, enabled: bool) {
        self.opts.lock().unwrap().overflow_fc = enabled;
    }

    fn sf_capacity(ext: bool) -> usize {
        if ext {
            6
        } else {
            7
        }
    }

    fn ff_capacity(ext: bool) -> usize {
        if ext {
            5
        } else {
            6
        }
    }

    fn cf_capacity(ext: bool) -> usize {
        if ext {
            6
        } else {
            7
        }
    }

    fn options(&self) -> Options {
        *self.opts.lock().unwrap()
    }

    fn reset_tx(tx: &mut TxTransfer) {
        tx.frame = None;
        tx.sn = 0;
        tx.sent = 0;
        tx.size = 0;
        tx.bs_cnt = 0;
    }

    fn reset_rx(rx: &mut RxTransfer) {
        rx.frame = None;
        rx.dl = 0;
        rx.sn = 0;
        rx.bs_cnt = 0;
    }

    // Timer arming. The callbacks hold a weak self-reference: a timer never
    // keeps a dismantled stack alive.

    fn arm_cf_timer(&self, st_min: u8) {
        let me = self.me.clone();
        self.timer_tx_cf
            .start(Duration::from_millis(st_min as u64), false, move || {
                if let Some(this) = me.upgrade() {
                    this.send_consecutive();
                }
            });
    }

    fn arm_fc_timer(&self) {
        let me = self.me.clone();
        self.timer_tx_fc.start(N_BS, false, move || {
            if let Some(this) = me.upgrade() {
                this.abort_tx(Status::RxTimeout);
            }
        });
    }

    fn arm_cr_timer(&self) {
        let me = self.me.clone();
        self.timer_rx_cr.start(N_CR, false, move || {
            if let Some(this) = me.upgrade() {
                this.abort_rx();
            }
        });
    }

    /// Abandons the outbound transfer and tells the application why.
    fn abort_tx(&self, status: Status) {
        let id = {
            let mut tx = self.tx.lock().unwrap();
            if tx.frame.is_none() {
                return;
            }
            let id = tx.id;
            Self::reset_tx(&mut tx);
            id
        };
        tracing::warn!(status = ?status, "outbound transfer aborted");
        self.upper.indication(status, id);
    }

    /// Abandons the inbound reassembly after N_Cr expired.
    fn abort_rx(&self) {
        let id = {
            let mut rx = self.rx.lock().unwrap();
            if rx.frame.is_none() {
                return;
            }
            let id = rx.id;
            Self::reset_rx(&mut rx);
            id
        };
        tracing::warn!("inbound reassembly timed out");
        self.upper.indication(Status::RxTimeout, id);
    }

    /// Emits one Consecutive Frame. Runs on the CF timer's worker thread,
    /// STmin after the previous frame.
    fn send_consecutive(&self) {
        let opts = self.options();
        let ext = opts.ext.is_some();
        let cf_len = Self::cf_capacity(ext);

        let built = {
            let tx = self.tx.lock().unwrap();
            let Some(frame) = tx.frame.as_ref() else {
                // Aborted or closed since the timer was armed.
                return;
            };
            let build = || -> Result<Message, MessageError> {
                let mut cf = Message::new();
                cf.push_back(NPCI_CONSECUTIVE_FRAME | (tx.sn & 0x0F))?;
                let from = tx.sent as usize;
                let take = cf_len.min(frame.len() - from);
                for byte in frame.iter().skip(from).take(take) {
                    cf.push_back(byte)?;
                }
                if let Some(ext) = opts.ext {
                    cf.push_front(ext.target)?;
                }
                if opts.zero_padding && cf.len() < FRAME_LENGTH {
                    cf.resize(FRAME_LENGTH)?;
                }
                Ok(cf)
            };
            match build() {
                Ok(cf) => (cf, tx.id, tx.fc_st_min),
                Err(e) => {
                    // No pages for the frame right now; try again next STmin.
                    tracing::warn!(error = %e, "deferring consecutive frame");
                    let st_min = tx.fc_st_min;
                    drop(tx);
                    self.arm_cf_timer(st_min);
                    return;
                }
            }
        };
        let (mut cf, id, st_min) = built;

        // The lower layer must have finished the previous frame first.
        if !self.tx_done.wait_for(N_AS) {
            tracing::error!("frame transmission aborted, no TxDone within N_As");
            self.abort_tx(Status::TxTimeout);
            return;
        }
        self.tx_done.reset();

        if self.lower.send(&mut cf, id, false).is_err() {
            // The bus may just be busy; retry after STmin until the
            // application gives up and closes.
            self.tx_done.set();
            self.arm_cf_timer(st_min);
            return;
        }

        let mut tx = self.tx.lock().unwrap();
        if tx.frame.is_none() {
            return;
        }
        tx.sn = (tx.sn + 1) & 0x0F;
        tx.sent += cf_len as u16;
        if tx.sent >= tx.size {
            // Transfer complete.
            Self::reset_tx(&mut tx);
            return;
        }
        let wait_for_fc = tx.fc_bs != 0 && {
            let counted = tx.bs_cnt;
            tx.bs_cnt += 1;
            counted >= tx.fc_bs
        };
        let st_min = tx.fc_st_min;
        drop(tx);
        if wait_for_fc {
            // Block complete; the receiver owes us an FC.
            self.arm_fc_timer();
        } else {
            self.arm_cf_timer(st_min);
        }
    }

    /// Emits a Flow Control frame with this side's BS and STmin.
    fn send_flow_control(&self, flow_status: u8, id: Eid, opts: Options) {
        let build = || -> Result<Message, MessageError> {
            let mut fc = Message::new();
            fc.push_back(NPCI_FLOW_CONTROL | (flow_status & 0x0F))?;
            fc.push_back(self.bs)?;
            fc.push_back(self.st_min)?;
            if let Some(ext) = opts.ext {
                fc.push_front(ext.target)?;
            }
            if opts.zero_padding && fc.len() < FRAME_LENGTH {
                fc.resize(FRAME_LENGTH)?;
            }
            Ok(fc)
        };
        match build() {
            Ok(mut fc) => {
                if let Err(e) = self.lower.send(&mut fc, id, false) {
                    tracing::warn!(error = %e, "flow control frame rejected");
                }
            }
            Err(e) => tracing::warn!(error = %e, "flow control frame not built"),
        }
    }

    fn on_single_frame(&self, data: &mut Message, id: Eid, opts: Options) {
        let ext = opts.ext.is_some();
        let sf_dl = (data.front() & 0x0F) as usize;
        if sf_dl > Self::sf_capacity(ext) || data.len() <= sf_dl {
            self.upper.indication(Status::RxError, id);
            return;
        }
        // A new frame preempts any reassembly in progress.
        Self::reset_rx(&mut self.rx.lock().unwrap());
        if data.pop_front().is_err() || data.resize(sf_dl).is_err() {
            self.upper.indication(Status::RxError, id);
            return;
        }
        self.upper.receive(data, id, false);
    }

    fn on_first_frame(&self, data: &mut Message, id: Eid, opts: Options) {
        let ext = opts.ext.is_some();
        let ff_len = Self::ff_capacity(ext);
        let dl = (((data.front() & 0x0F) as u16) << 8) | data.at(1) as u16;
        if (dl as usize) < ff_len + 2 || data.len() < ff_len + 2 {
            // Payloads this short must use a Single Frame.
            Self::reset_rx(&mut self.rx.lock().unwrap());
            self.upper.indication(Status::RxError, id);
            return;
        }
        if dl > self.max_dl {
            Self::reset_rx(&mut self.rx.lock().unwrap());
            if opts.overflow_fc {
                self.send_flow_control(FC_OVERFLOW, id, opts);
            }
            tracing::warn!(dl, max = self.max_dl, "oversized transfer rejected");
            self.upper.indication(Status::RxError, id);
            return;
        }
        if data.pop_front().is_err() || data.pop_front().is_err() || data.resize(ff_len).is_err() {
            self.upper.indication(Status::RxError, id);
            return;
        }
        {
            let mut rx = self.rx.lock().unwrap();
            rx.frame = Some(std::mem::take(data));
            rx.dl = dl;
            rx.sn = 1;
            rx.bs_cnt = 0;
            rx.id = id;
        }
        self.send_flow_control(FC_CTS, id, opts);
        self.arm_cr_timer();
    }

    fn on_consecutive_frame(&self, data: &mut Message, id: Eid, opts: Options) {
        self.timer_rx_cr.stop();
        let mut rx = self.rx.lock().unwrap();
        if rx.frame.is_none() {
            drop(rx);
            self.upper.indication(Status::RxError, id);
            return;
        }
        let sn = data.front() & 0x0F;
        if sn != rx.sn {
            tracing::warn!(got = sn, expected = rx.sn, "sequence number mismatch");
            Self::reset_rx(&mut rx);
            drop(rx);
            self.upper.indication(Status::RxError, id);
            return;
        }
        rx.sn = (rx.sn + 1) & 0x0F;
        if data.pop_front().is_err() {
            Self::reset_rx(&mut rx);
            drop(rx);
            self.upper.indication(Status::RxError, id);
            return;
        }
        let mut overrun = false;
        {
            let dl = rx.dl;
            let frame = rx.frame.as_mut().expect("reassembly is active");
            // Trim to the declared length; padding bytes fall off here.
            let remaining = (dl as usize).saturating_sub(frame.len());
            for byte in data.iter().take(remaining) {
                if frame.push_back(byte).is_err() {
                    // No buffer space; the frame stays consumed to keep the
                    // sequence in sync, the application learns data was lost.
                    overrun = true;
                    break;
                }
            }
        }
        let complete = rx.frame.as_ref().map(Message::len).unwrap_or(0) >= rx.dl as usize;
        let finished = if complete {
            let frame = rx.frame.take();
            Self::reset_rx(&mut rx);
            frame
        } else {
            None
        };
        let mut send_cts = false;
        if !complete && self.bs != 0 {
            rx.bs_cnt += 1;
            if rx.bs_cnt >= self.bs {
                rx.bs_cnt = 0;
                send_cts = true;
            }
        }
        drop(rx);

        if overrun {
            self.upper.indication(Status::RxOverrun, id);
        }
        match finished {
            Some(mut frame) => self.upper.receive(&mut frame, id, false),
            None => {
                if send_cts {
                    self.send_flow_control(FC_CTS, id, opts);
                }
                self.arm_cr_timer();
            }
        }
    }

    fn on_flow_control(&self, data: &mut Message, id: Eid) {
        self.timer_tx_fc.stop();
        if data.len() < FC_DATA_LENGTH || (data.front() & 0x0F) > FC_WAIT {
            // A broken FC leaves the sender with no usable schedule; give
            // the transfer up rather than hang.
            let active = self.tx.lock().unwrap().frame.is_some();
            if active {
                tracing::warn!("malformed flow control, aborting transfer");
                self.abort_tx(Status::RxTimeout);
            } else {
                self.upper.indication(Status::RxError, id);
            }
            return;
        }
        let flow_status = data.front() & 0x0F;
        let (bs, st_min) = (data.at(1), data.at(2));
        {
            let mut tx = self.tx.lock().unwrap();
            if tx.frame.is_none() {
                tracing::debug!("flow control with no transfer in flight");
                return;
            }
            tx.fc_bs = bs;
            tx.fc_st_min = st_min;
            tx.bs_cnt = 0;
        }
        if flow_status == FC_CTS {
            self.arm_cf_timer(st_min);
        } else {
            // WAIT: keep supervising until the receiver is ready.
            self.arm_fc_timer();
        }
    }
}

impl Layer for Iso15765 {
    fn name(&self) -> &'static str {
        "prot_iso15765"
    }

    fn attach_upper(&self, upper: Weak<dyn Layer>) {
        self.upper.set(upper);
    }

    fn open(&self, address: &str, id: Eid) -> Result<(), OpenError> {
        if !self.upper.is_attached() {
            return Err(OpenError::NoUpper);
        }
        // Bottom-up: the lower layer comes up first.
        self.lower.open(address, id)?;
        Self::reset_tx(&mut self.tx.lock().unwrap());
        Self::reset_rx(&mut self.rx.lock().unwrap());
        self.tx_done.reset();
        Ok(())
    }

    fn close(&self, id: Eid) {
        // Top-down: this layer shuts down before the one below it.
        self.timer_tx_cf.stop();
        self.timer_tx_fc.stop();
        self.timer_rx_cr.stop();
        Self::reset_tx(&mut self.tx.lock().unwrap());
        Self::reset_rx(&mut self.rx.lock().unwrap());
        self.lower.close(id);
    }

    fn send(&self, data: &mut Message, id: Eid, _more: bool) -> Result<(), SendError> {
        if data.len() > MAX_FRAME_SIZE as usize {
            tracing::error!(len = data.len(), "message too big (> 4095 bytes)");
            return Err(SendError::TooLong);
        }
        let opts = self.options();
        let ext = opts.ext.is_some();

        let mut tx = self.tx.lock().unwrap();
        if tx.frame.is_some() {
            tracing::error!("transmission already in progress");
            return Err(SendError::Busy);
        }

        if data.len() <= Self::sf_capacity(ext) {
            // Fits a Single Frame: prepend the N_PCI and pass it down.
            drop(tx);
            let dl = data.len() as u8;
            data.push_front(NPCI_SINGLE_FRAME | (dl & 0x0F))?;
            if let Some(ext) = opts.ext {
                data.push_front(ext.target)?;
            }
            if opts.zero_padding && data.len() < FRAME_LENGTH {
                data.resize(FRAME_LENGTH)?;
            }
            return self.lower.send(data, id, false);
        }
        let size = data.len() as u16;
        let ff_len = Self::ff_capacity(ext);
        let mut ff = Message::new();
        ff.push_back(NPCI_FIRST_FRAME | ((size >> 8) as u8 & 0x0F))?;
        ff.push_back(size as u8)?;
        for byte in data.iter().take(ff_len) {
            ff.push_back(byte)?;
        }
        if let Some(ext) = opts.ext {
            ff.push_front(ext.target)?;
        }
        tx.frame = Some(data.ref_copy());
        tx.sn = 1;
        tx.sent = ff_len as u16;
        tx.size = size;
        tx.bs_cnt = 0;
        tx.id = id;
        tx.fc_bs = 0;
        tx.fc_st_min = 0;
        drop(tx);

        match self.lower.send(&mut ff, id, false) {
            Ok(()) => {
                // The peer owes us a Flow Control within N_Bs.
                self.arm_fc_timer();
                Ok(())
            }
            Err(e) => {
                Self::reset_tx(&mut self.tx.lock().unwrap());
                Err(e)
            }
        }
    }

    fn receive(&self, data: &mut Message, id: Eid, _more: bool) {
        let opts = self.options();
        if let Some(ext) = opts.ext {
            if data.front() != ext.source {
                // Someone else's frame; not an error.
                return;
            }
            if data.pop_front().is_err() {
                self.upper.indication(Status::RxError, id);
                return;
            }
        }
        match data.front() & 0xF0 {
            NPCI_SINGLE_FRAME => self.on_single_frame(data, id, opts),
            NPCI_FIRST_FRAME => self.on_first_frame(data, id, opts),
            NPCI_CONSECUTIVE_FRAME => self.on_consecutive_frame(data, id, opts),
            NPCI_FLOW_CONTROL => self.on_flow_control(data, id),
            _ => {
                tracing::warn!(npci = data.front() >> 4, "unknown N_PCI type");
                self.upper.indication(Status::RxError, id);
            }
        }
    }

    fn indication(&self, status: Status, id: Eid) {
        if status == Status::TxDone {
            // Next segment may go on the wire.
            self.tx_done.set();
        }
        self.upper.indication(status, id);
    }
}
