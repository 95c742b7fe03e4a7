//! Pool accounting scenarios.
//!
//! These assert absolute pool counters, so they run as a single sequential
//! test in their own binary where the process-wide pool is quiescent.

use lamina::message::{Pool, PAGE_COUNT, PAGE_SIZE};
use lamina::{Message, MessageError};

#[test]
fn pool_accounting() {
    let pool = Pool::global();
    assert_eq!(pool.capacity(), PAGE_COUNT);
    assert_eq!(pool.used_pages(), 0);

    // Exhaustion: one message swallows the whole pool, then the next write
    // is rejected without changing anything.
    let capacity = PAGE_COUNT * PAGE_SIZE;
    let mut hog = Message::with_offset(0);
    hog.put(&vec![0xAB; capacity]).unwrap();
    assert_eq!(hog.len(), capacity);
    assert_eq!(pool.used_pages(), PAGE_COUNT);
    assert_eq!(pool.used_pages_max(), PAGE_COUNT);

    assert_eq!(hog.push_back(1), Err(MessageError::PoolExhausted));
    assert_eq!(hog.len(), capacity);
    assert_eq!(pool.used_pages(), PAGE_COUNT);

    let mut other = Message::new();
    assert_eq!(other.push_back(1), Err(MessageError::PoolExhausted));
    assert!(other.is_empty());

    // A failed bulk append restores the prior size.
    let mut nearly = Message::with_offset(0);
    drop(hog);
    assert_eq!(pool.used_pages(), 0);
    nearly.put(&vec![0x11; capacity - PAGE_SIZE]).unwrap();
    let before = nearly.len();
    assert_eq!(
        nearly.put(&vec![0x22; 2 * PAGE_SIZE]),
        Err(MessageError::PoolExhausted)
    );
    assert_eq!(nearly.len(), before);
    drop(nearly);

    // Cheap copies share pages instead of consuming new ones.
    let mut shared = Message::new();
    shared.put(&[0x5A; 4 * PAGE_SIZE]).unwrap();
    let used = pool.used_pages();
    let copy = shared.ref_copy();
    assert_eq!(pool.used_pages(), used);
    drop(shared);
    assert_eq!(pool.used_pages(), used);
    drop(copy);
    assert_eq!(pool.used_pages(), 0);

    // The high-water mark is monotonic until cleared.
    assert_eq!(pool.used_pages_max(), PAGE_COUNT);
    pool.clear_used_pages_max();
    assert_eq!(pool.used_pages_max(), 0);
    let probe = Message::from_slice(&[1, 2, 3]).unwrap();
    assert_eq!(pool.used_pages_max(), 1);
    drop(probe);
    assert_eq!(pool.used_pages(), 0);
    assert_eq!(pool.used_pages_max(), 1);
}
