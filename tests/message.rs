use lamina::message::PAGE_SIZE;
use lamina::{Message, MessageError};

#[test]
fn push_pop_symmetry() {
    let mut message = Message::new();
    message.put(b"base").unwrap();

    message.push_back(b'!').unwrap();
    message.pop_back().unwrap();
    assert!(message.iter().eq(b"base".iter().copied()));

    message.push_front(b'>').unwrap();
    message.pop_front().unwrap();
    assert!(message.iter().eq(b"base".iter().copied()));
}

#[test]
fn deque_operations_span_pages() {
    let mut message = Message::new();
    for i in 0..3 * PAGE_SIZE {
        message.push_back(i as u8).unwrap();
    }
    assert_eq!(message.len(), 3 * PAGE_SIZE);
    for i in 0..3 * PAGE_SIZE {
        assert_eq!(message.at(i), i as u8);
    }
    for i in 0..3 * PAGE_SIZE {
        assert_eq!(message.front(), i as u8);
        message.pop_front().unwrap();
    }
    assert!(message.is_empty());
}

#[test]
fn push_front_grows_leading_pages() {
    let mut message = Message::new();
    for i in 0..2 * PAGE_SIZE {
        message.push_front(i as u8).unwrap();
    }
    assert_eq!(message.len(), 2 * PAGE_SIZE);
    assert_eq!(message.front(), (2 * PAGE_SIZE - 1) as u8);
    assert_eq!(message.back(), 0);
}

#[test]
fn out_of_range_access_yields_sentinel() {
    let mut message = Message::new();
    assert_eq!(message.at(0), 0xCC);
    assert_eq!(message.front(), 0xCC);
    message.push_back(1).unwrap();
    assert_eq!(message.at(0), 1);
    assert_eq!(message.at(1), 0xCC);
}

#[test]
fn insert_and_erase() {
    let mut message = Message::new();
    message.put(&[1, 2, 4, 5]).unwrap();
    message.insert(2, 3).unwrap();
    assert!(message.iter().eq([1, 2, 3, 4, 5]));

    message.insert(0, 0).unwrap();
    assert!(message.iter().eq([0, 1, 2, 3, 4, 5]));

    message.insert(6, 6).unwrap();
    assert!(message.iter().eq([0, 1, 2, 3, 4, 5, 6]));

    message.erase(0).unwrap();
    assert!(message.iter().eq([1, 2, 3, 4, 5, 6]));

    message.erase_range(1, 4).unwrap();
    assert!(message.iter().eq([1, 5, 6]));
}

#[test]
fn insert_slice_in_the_middle() {
    let mut message = Message::new();
    message.put(&[1, 5]).unwrap();
    message.insert_slice(1, &[2, 3, 4]).unwrap();
    assert!(message.iter().eq([1, 2, 3, 4, 5]));
}

#[test]
fn insert_n_repeats_a_value() {
    let mut message = Message::new();
    message.put(&[7, 7]).unwrap();
    message.insert_n(1, 3, 0).unwrap();
    assert!(message.iter().eq([7, 0, 0, 0, 7]));
}

#[test]
fn resize_pads_with_zeros_and_truncates() {
    let mut message = Message::new();
    message.put(&[9, 9]).unwrap();
    message.resize(5).unwrap();
    assert!(message.iter().eq([9, 9, 0, 0, 0]));
    message.resize(1).unwrap();
    assert!(message.iter().eq([9]));
    message.resize(0).unwrap();
    assert!(message.is_empty());
}

#[test]
fn get_put_round_trip() {
    let payload: Vec<u8> = (0..500).map(|i| i as u8).collect();
    let mut message = Message::new();
    message.put(&payload).unwrap();

    let mut out = vec![0; 500];
    assert_eq!(message.get(&mut out, 0), 500);
    assert_eq!(out, payload);

    // Windowed extraction, then injection into a fresh message.
    let mut window = vec![0; 100];
    assert_eq!(message.get(&mut window, 250), 100);
    assert_eq!(&window[..], &payload[250..350]);

    let mut fresh = Message::new();
    fresh.put(&window).unwrap();
    assert_eq!(fresh.len(), 100);
    assert!(fresh.iter().eq(window.iter().copied()));
}

#[test]
fn get_clamps_to_available_bytes() {
    let mut message = Message::new();
    message.put(&[1, 2, 3]).unwrap();
    let mut out = [0; 8];
    assert_eq!(message.get(&mut out, 1), 2);
    assert_eq!(&out[..2], &[2, 3]);
    assert_eq!(message.get(&mut out, 3), 0);
}

#[test]
fn ref_copy_freezes_both_sides() {
    let mut original = Message::new();
    original.put(b"shared").unwrap();
    let mut copy = original.ref_copy();

    assert!(original.is_shared());
    assert!(copy.is_shared());
    assert_eq!(original, copy);
    assert_eq!(original.push_back(b'!'), Err(MessageError::ReadOnly));
    assert_eq!(copy.push_back(b'!'), Err(MessageError::ReadOnly));
    assert_eq!(original.pop_front(), Err(MessageError::ReadOnly));
    assert_eq!(copy.resize(2), Err(MessageError::ReadOnly));

    // Releasing one side makes the survivor writable again.
    copy.clear();
    assert!(copy.is_empty());
    assert!(!original.is_shared());
    original.push_back(b'!').unwrap();
    assert!(original.iter().eq(b"shared!".iter().copied()));
}

#[test]
fn dropping_the_copy_unfreezes_the_original() {
    let mut original = Message::new();
    original.put(b"data").unwrap();
    {
        let copy = original.ref_copy();
        assert_eq!(copy.len(), 4);
        assert!(original.is_shared());
    }
    assert!(!original.is_shared());
    original.push_back(b'!').unwrap();
}

#[test]
fn append_concatenates_by_sharing() {
    let mut head = Message::new();
    head.put(b"head-").unwrap();
    let mut tail = Message::new();
    tail.put(b"tail").unwrap();

    head.append(&tail).unwrap();
    assert!(head.iter().eq(b"head-tail".iter().copied()));
    assert_eq!(tail.len(), 4);

    // The tail's pages are shared now; both messages are frozen.
    assert_eq!(head.push_back(b'!'), Err(MessageError::ReadOnly));
    assert_eq!(tail.push_back(b'!'), Err(MessageError::ReadOnly));

    drop(tail);
    head.push_back(b'!').unwrap();
    assert_eq!(head.len(), 10);
}

#[test]
fn append_into_empty_message() {
    let mut source = Message::new();
    source.put(b"abc").unwrap();
    let mut empty = Message::new();
    empty.append(&source).unwrap();
    assert_eq!(empty, source);
}

#[test]
fn try_clone_is_deep() {
    let mut original = Message::new();
    original.put(b"deep").unwrap();
    let mut clone = original.try_clone().unwrap();
    assert_eq!(clone, original);
    assert!(!original.is_shared());
    clone.push_back(b'!').unwrap();
    original.push_back(b'?').unwrap();
    assert!(clone.iter().eq(b"deep!".iter().copied()));
    assert!(original.iter().eq(b"deep?".iter().copied()));
}

#[test]
fn equality_ignores_page_layout() {
    // Same bytes, arrived at differently: one bulk-copied, one built
    // backwards with prepends straddling a page boundary.
    let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();
    let mut bulk = Message::new();
    bulk.put(&payload).unwrap();
    let mut pieced = Message::with_offset(0);
    for &byte in payload.iter().rev() {
        pieced.push_front(byte).unwrap();
    }
    assert_eq!(bulk, pieced);

    pieced.pop_back().unwrap();
    assert_ne!(bulk, pieced);
}

#[test]
fn iteration_runs_both_directions() {
    let mut message = Message::new();
    let payload: Vec<u8> = (0..300).map(|i| i as u8).collect();
    message.put(&payload).unwrap();

    let forward: Vec<u8> = message.iter().collect();
    assert_eq!(forward, payload);

    let backward: Vec<u8> = message.iter().rev().collect();
    let mut expected = payload.clone();
    expected.reverse();
    assert_eq!(backward, expected);

    assert_eq!(message.iter().len(), 300);
}

#[test]
fn pop_on_empty_is_a_no_op() {
    let mut message = Message::new();
    message.pop_back().unwrap();
    message.pop_front().unwrap();
    assert!(message.is_empty());
}

#[test]
fn clear_restores_the_empty_writable_state() {
    let mut message = Message::new();
    message.put(&[0xAA; 600]).unwrap();
    let copy = message.ref_copy();
    message.clear();
    assert!(message.is_empty());
    assert_eq!(message.len(), 0);
    // The copy keeps its view; the cleared message is writable again.
    assert_eq!(copy.len(), 600);
    message.push_back(1).unwrap();
    assert_eq!(message.len(), 1);
}
