//! SLIP framing against a programmable endpoint.

use lamina::com;
use lamina::dev;
use lamina::layer::Layer;
use lamina::protocols::Slip;
use lamina::{Eid, Message};
use std::sync::Arc;
use std::time::Duration;

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

fn stack() -> (Arc<com::Generic>, Arc<Slip>, Arc<dev::Generic>) {
    let bottom = com::Generic::new();
    let slip = Slip::new(bottom.clone());
    let top = dev::Generic::new(slip.clone());
    top.open("", Eid::ANY).unwrap();
    (bottom, slip, top)
}

fn wire_frame(bottom: &com::Generic) -> Vec<u8> {
    let (frame, _, _) = bottom.read().expect("a frame on the wire");
    frame.iter().collect()
}

#[test]
fn special_bytes_are_stuffed() {
    let (bottom, _slip, top) = stack();
    top.write_slice(&[END, ESC, 0x00], Eid::ANY, false, true)
        .unwrap();
    assert_eq!(
        wire_frame(&bottom),
        vec![END, ESC, ESC_END, ESC, ESC_ESC, 0x00, END]
    );
}

#[test]
fn plain_bytes_pass_through() {
    let (bottom, _slip, top) = stack();
    top.write_slice(b"abc", Eid::ANY, false, true).unwrap();
    assert_eq!(wire_frame(&bottom), vec![END, b'a', b'b', b'c', END]);
}

#[test]
fn round_trips_with_boundary_patterns() {
    let patterns: [&[u8]; 4] = [&[END], &[ESC], &[END, ESC], &[ESC, END]];
    let filler = [0x01, 0x7F, 0x00];
    for pattern in patterns {
        // The pattern at the start, in the middle, and at the end.
        let mut payloads: Vec<Vec<u8>> = Vec::new();
        let mut at_start = pattern.to_vec();
        at_start.extend_from_slice(&filler);
        payloads.push(at_start);
        let mut in_middle = filler.to_vec();
        in_middle.extend_from_slice(pattern);
        in_middle.extend_from_slice(&filler);
        payloads.push(in_middle);
        let mut at_end = filler.to_vec();
        at_end.extend_from_slice(pattern);
        payloads.push(at_end);

        for payload in payloads {
            let (bottom, _slip, top) = stack();
            top.write_slice(&payload, Eid::ANY, false, true).unwrap();
            let encoded = wire_frame(&bottom);

            // Feed the encoded frame back in as received line data.
            assert!(bottom.write_slice(&encoded, Eid::ANY).unwrap());
            let (message, _) = top.read(Duration::from_millis(500)).expect("decode");
            assert!(
                message.iter().eq(payload.iter().copied()),
                "round trip failed for {payload:02x?}"
            );
        }
    }
}

#[test]
fn decoder_resyncs_after_garbage() {
    let (bottom, _slip, top) = stack();
    // Line noise, then a normal frame; its leading END is the resync point.
    let mut line = vec![0x11, 0x22, 0x33];
    line.extend_from_slice(&[END, b'h', b'i', END]);
    assert!(bottom.write_slice(&line, Eid::ANY).unwrap());
    let (message, _) = top.read(Duration::from_millis(500)).expect("payload");
    assert!(message.iter().eq(b"hi".iter().copied()));
}

#[test]
fn empty_frames_are_dropped_silently() {
    let (bottom, _slip, top) = stack();
    assert!(bottom
        .write_slice(&[END, END, END, END], Eid::ANY)
        .unwrap());
    assert!(top.read(Duration::from_millis(100)).is_none());
}

#[test]
fn invalid_escape_discards_the_packet() {
    let (bottom, _slip, top) = stack();
    // ESC followed by a plain byte is a protocol violation; the packet in
    // progress is dropped and the decoder hunts for the next END.
    assert!(bottom
        .write_slice(&[END, b'x', ESC, 0x00, b'y'], Eid::ANY)
        .unwrap());
    assert!(top.read(Duration::from_millis(100)).is_none());

    // The next complete frame comes through untouched.
    assert!(bottom.write_slice(&[END, b'o', b'k', END], Eid::ANY).unwrap());
    let (message, _) = top.read(Duration::from_millis(500)).expect("recovery");
    assert!(message.iter().eq(b"ok".iter().copied()));
}

#[test]
fn fragments_accumulate_into_one_frame() {
    let (bottom, _slip, top) = stack();

    top.write_slice(b"frag", Eid::ANY, true, true).unwrap();
    // Nothing on the wire yet; the stack asked for the next fragment.
    assert!(bottom.read().is_none());

    top.write_slice(b"ment", Eid::ANY, false, true).unwrap();
    assert_eq!(
        wire_frame(&bottom),
        vec![END, b'f', b'r', b'a', b'g', b'm', b'e', b'n', b't', END]
    );
}

#[test]
fn bytes_arriving_one_at_a_time_still_decode() {
    let (bottom, _slip, top) = stack();
    let line = [END, b'o', b'n', b'e', END];
    for byte in line {
        let mut chunk = Message::from_slice(&[byte]).unwrap();
        assert!(bottom.write(&mut chunk, Eid::ANY, false));
    }
    let (message, _) = top.read(Duration::from_millis(500)).expect("payload");
    assert!(message.iter().eq(b"one".iter().copied()));
}
