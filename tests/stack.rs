//! Stack assembly, lifecycle and pass-through behavior.

use lamina::com::{self, Loopback};
use lamina::dev;
use lamina::layer::{Layer, OpenError, SendError};
use lamina::protocols::{Slip, Trace};
use lamina::{Eid, Message};
use std::time::Duration;

#[test]
fn a_dangling_bottom_layer_refuses_to_open() {
    let bottom = com::Generic::new();
    assert_eq!(bottom.open("", Eid::ANY), Err(OpenError::NoUpper));

    // Stacking a protocol on top does not help until the protocol itself
    // has an upper layer.
    let slip = Slip::new(bottom.clone());
    assert_eq!(slip.open("", Eid::ANY), Err(OpenError::NoUpper));

    // With a device on top the whole chain opens.
    let top = dev::Generic::new(slip.clone());
    assert!(top.open("", Eid::ANY).is_ok());
}

#[test]
fn a_device_can_sit_directly_on_a_communicator() {
    let bottom = com::Generic::new();
    let top = dev::Generic::new(bottom.clone());
    top.open("", Eid::from_port(7)).unwrap();

    // The device filters receptions by the endpoint it was opened with.
    assert!(bottom.write_slice(b"mine", Eid::from_port(7)).unwrap());
    let (message, id) = top.read(Duration::from_millis(500)).expect("delivery");
    assert!(message.iter().eq(b"mine".iter().copied()));
    assert_eq!(id, Eid::from_port(7));

    assert!(bottom.write_slice(b"not mine", Eid::from_port(8)).unwrap());
    assert!(top.read(Duration::from_millis(100)).is_none());
}

#[test]
fn trace_layer_is_transparent() {
    let bottom = com::Generic::new();
    let trace = Trace::new(bottom.clone());
    let top = dev::Generic::new(trace.clone());
    top.open("", Eid::ANY).unwrap();
    assert!(top.is_connected(Duration::from_secs(1)));

    top.write_slice(b"through", Eid::ANY, false, true).unwrap();
    let (frame, _, _) = bottom.read().expect("frame below the trace");
    assert!(frame.iter().eq(b"through".iter().copied()));

    assert!(bottom.write_slice(b"back up", Eid::ANY).unwrap());
    let (message, _) = top.read(Duration::from_millis(500)).expect("delivery");
    assert!(message.iter().eq(b"back up".iter().copied()));
}

#[test]
fn null_communicator_swallows_sends() {
    let bottom = com::Null::new();
    let top = dev::Generic::new(bottom.clone());
    top.open("", Eid::ANY).unwrap();
    assert!(top.is_connected(Duration::from_secs(1)));

    // Accepted and acknowledged, but gone.
    top.write_slice(b"into the void", Eid::ANY, false, true)
        .unwrap();
    assert!(top.read(Duration::from_millis(100)).is_none());
}

#[test]
fn fragmented_receptions_reassemble_in_the_device() {
    let bottom = com::Generic::new();
    let top = dev::Generic::new(bottom.clone());
    top.open("", Eid::ANY).unwrap();

    // A fragment flagged `more` is held back; nothing is readable yet. The
    // lower layer drops its handle after delivery, as a communicator would.
    {
        let mut first = Message::from_slice(b"frag").unwrap();
        assert!(bottom.write(&mut first, Eid::ANY, true));
    }
    assert!(top.read(Duration::from_millis(100)).is_none());

    // The closing fragment completes the sequence.
    {
        let mut second = Message::from_slice(b"ment").unwrap();
        assert!(bottom.write(&mut second, Eid::ANY, false));
    }
    let (message, _) = top.read(Duration::from_millis(500)).expect("reassembly");
    assert!(message.iter().eq(b"fragment".iter().copied()));
}

#[test]
fn close_is_idempotent_and_reopen_works() {
    let bottom = com::Generic::new();
    let top = dev::Generic::new(bottom.clone());
    top.open("", Eid::ANY).unwrap();
    assert_eq!(top.open("", Eid::ANY), Err(OpenError::AlreadyOpen));

    top.close(Eid::ANY);
    top.close(Eid::ANY);
    assert!(!top.is_open());
    assert_eq!(
        top.write_slice(b"closed", Eid::ANY, false, true),
        Err(SendError::NotOpen)
    );

    top.open("", Eid::ANY).unwrap();
    top.write_slice(b"open again", Eid::ANY, false, true).unwrap();
    assert_eq!(bottom.pending(), 1);
}

#[test]
fn echo_device_answers_over_slip_loopback() {
    let left_com = Loopback::new();
    let right_com = Loopback::new();
    left_com.register_peer(&right_com);
    right_com.register_peer(&left_com);

    let left_slip = Slip::new(left_com.clone());
    let right_slip = Slip::new(right_com.clone());
    let left = dev::Generic::new(left_slip.clone());
    let mirror = dev::Echo::new(right_slip.clone());

    left.open("", Eid::ANY).unwrap();
    mirror.open("", Eid::ANY).unwrap();
    assert!(left.is_connected(Duration::from_secs(1)));

    left.write_slice(b"are you there?", Eid::ANY, false, true)
        .unwrap();
    let (message, _) = left.read(Duration::from_secs(5)).expect("echo");
    assert!(message.iter().eq(b"are you there?".iter().copied()));
}
