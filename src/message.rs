//! Byte containers with zero-copy operations for protocols.
//!
//! A [`Message`] owns a chain of fixed-size pages borrowed from the
//! process-wide [`pool::Pool`] and exposes deque semantics over the bytes
//! inside its `head..tail` window. Messages move between layers by
//! reference; [`Message::ref_copy`] makes a cheap copy by bumping page
//! reference counts, after which every holder of the shared pages is
//! read-only. Dropping a message returns its share of the pages to the pool.

pub mod pool;
pub use pool::{Pool, PAGE_BEGIN, PAGE_COUNT, PAGE_SIZE};

mod message_bytes;
pub use message_bytes::MessageBytes;

use pool::{Page, PageIndex};
use std::fmt::{self, Debug, Display};

/// Byte returned by [`Message::at`] for an out-of-range index.
const ILLEGAL: u8 = 0xCC;

/// Errors for message operations that mutate or allocate.
///
/// A failed operation consumes nothing: the message is left exactly as it
/// was before the call.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// The page pool has no free page left.
    #[error("the message pool is exhausted")]
    PoolExhausted,
    /// The message shares pages with another message and is read-only.
    #[error("the message is shared and read-only")]
    ReadOnly,
}

/// A paged, pool-backed byte sequence with deque semantics.
///
/// ```
/// use lamina::Message;
///
/// let mut message = Message::new();
/// message.put(b"payload").unwrap();
/// message.push_front(0x42).unwrap();
/// assert_eq!(message.len(), 8);
/// assert_eq!(message.at(0), 0x42);
/// ```
pub struct Message {
    first: Option<PageIndex>,
    offset: usize,
}

impl Message {
    /// Creates an empty message. The first page is taken from the pool on
    /// the first write, with the default [`PAGE_BEGIN`] head offset so that
    /// lower layers can prepend their headers in place.
    pub fn new() -> Self {
        Self::with_offset(PAGE_BEGIN)
    }

    /// Creates an empty message whose first page will start at the given
    /// head offset (clamped to the page size).
    pub fn with_offset(offset: usize) -> Self {
        Message {
            first: None,
            offset: offset.min(PAGE_SIZE - 1),
        }
    }

    /// Creates a message holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut message = Message::new();
        message.put(bytes)?;
        Ok(message)
    }

    /// Number of bytes in the message.
    pub fn len(&self) -> usize {
        self.chain().map(|idx| self.window(idx)).sum()
    }

    /// Whether the message holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Whether any page is shared with another message. A shared message
    /// rejects every mutating operation with [`MessageError::ReadOnly`].
    pub fn is_shared(&self) -> bool {
        self.chain().any(|idx| Pool::global().refs(idx) > 1)
    }

    /// Appends a byte. Acquires a new trailing page when the current one is
    /// full.
    pub fn push_back(&mut self, value: u8) -> Result<(), MessageError> {
        self.ensure_writable("push_back")?;
        let idx = match self.last_two() {
            None => self.acquire_first()?,
            Some((_, last)) => {
                if self.page(last).tail == PAGE_SIZE {
                    let fresh = Self::acquire()?;
                    self.page_mut(last).next = Some(fresh);
                    fresh
                } else {
                    last
                }
            }
        };
        let page = self.page_mut(idx);
        page.data[page.tail] = value;
        page.tail += 1;
        Ok(())
    }

    /// Prepends a byte. Acquires a new leading page when the current one has
    /// no room in front of its head.
    pub fn push_front(&mut self, value: u8) -> Result<(), MessageError> {
        self.ensure_writable("push_front")?;
        match self.first {
            None => {
                let idx = Self::acquire()?;
                let start = if self.offset == 0 { PAGE_SIZE } else { self.offset };
                // SAFETY: freshly acquired, refcount one, not yet linked.
                let page = unsafe { Pool::global().page_mut(idx) };
                page.head = start;
                page.tail = start;
                self.first = Some(idx);
            }
            Some(first) => {
                if self.page(first).head == 0 {
                    let fresh = Self::acquire()?;
                    // SAFETY: freshly acquired, refcount one, not yet linked.
                    let page = unsafe { Pool::global().page_mut(fresh) };
                    page.head = PAGE_SIZE;
                    page.tail = PAGE_SIZE;
                    page.next = Some(first);
                    self.first = Some(fresh);
                }
            }
        }
        let first = self.first.expect("page was just ensured");
        let page = self.page_mut(first);
        page.head -= 1;
        page.data[page.head] = value;
        Ok(())
    }

    /// Removes the last byte; the trailing page is released when it becomes
    /// empty. A no-op on an empty message.
    pub fn pop_back(&mut self) -> Result<(), MessageError> {
        self.ensure_writable("pop_back")?;
        let Some((prev, last)) = self.last_two() else {
            tracing::warn!("pop_back on empty message");
            return Ok(());
        };
        let emptied = {
            let page = self.page_mut(last);
            page.tail -= 1;
            page.tail == page.head
        };
        if emptied {
            match prev {
                Some(prev) => self.page_mut(prev).next = None,
                None => self.first = None,
            }
            Pool::global().release(last);
        }
        Ok(())
    }

    /// Removes the first byte; the leading page is released when it becomes
    /// empty. A no-op on an empty message.
    pub fn pop_front(&mut self) -> Result<(), MessageError> {
        self.ensure_writable("pop_front")?;
        let Some(first) = self.first else {
            tracing::warn!("pop_front on empty message");
            return Ok(());
        };
        let emptied = {
            let page = self.page_mut(first);
            page.head += 1;
            (page.head == page.tail).then_some(page.next)
        };
        if let Some(next) = emptied {
            self.first = next;
            Pool::global().release(first);
        }
        Ok(())
    }

    /// The byte at logical index `pos`, or the `0xCC` illegal-reference
    /// sentinel when `pos` is out of range.
    pub fn at(&self, pos: usize) -> u8 {
        let mut skipped = 0;
        for idx in self.chain() {
            let page = self.page(idx);
            let len = page.tail - page.head;
            if pos < skipped + len {
                return page.data[page.head + pos - skipped];
            }
            skipped += len;
        }
        tracing::warn!(pos, len = skipped, "message index out of range");
        ILLEGAL
    }

    /// The first byte, or the sentinel on an empty message.
    pub fn front(&self) -> u8 {
        self.at(0)
    }

    /// The last byte, or the sentinel on an empty message.
    pub fn back(&self) -> u8 {
        match self.len() {
            0 => self.at(0),
            n => self.at(n - 1),
        }
    }

    /// Inserts a byte before logical index `pos`; `pos >= len` appends.
    pub fn insert(&mut self, pos: usize, value: u8) -> Result<(), MessageError> {
        let len = self.len();
        if pos >= len {
            return self.push_back(value);
        }
        // Grow by one, then shift the tail right to open the gap.
        self.push_back(self.back())?;
        let mut i = len - 1;
        while i > pos {
            let moved = self.at(i - 1);
            self.set_at(i, moved);
            i -= 1;
        }
        self.set_at(pos, value);
        Ok(())
    }

    /// Inserts `n` copies of `value` before logical index `pos`.
    pub fn insert_n(&mut self, pos: usize, n: usize, value: u8) -> Result<(), MessageError> {
        for _ in 0..n {
            self.insert(pos, value)?;
        }
        Ok(())
    }

    /// Inserts a run of bytes before logical index `pos`.
    pub fn insert_slice(&mut self, pos: usize, bytes: &[u8]) -> Result<(), MessageError> {
        for (i, &value) in bytes.iter().enumerate() {
            self.insert(pos + i, value)?;
        }
        Ok(())
    }

    /// Removes the byte at logical index `pos`; out of range is a no-op.
    pub fn erase(&mut self, pos: usize) -> Result<(), MessageError> {
        let len = self.len();
        if pos >= len {
            return Ok(());
        }
        self.ensure_writable("erase")?;
        for i in pos..len - 1 {
            let moved = self.at(i + 1);
            self.set_at(i, moved);
        }
        self.pop_back()
    }

    /// Removes the bytes in `start..end` (clamped to the message).
    pub fn erase_range(&mut self, start: usize, end: usize) -> Result<(), MessageError> {
        let end = end.min(self.len());
        for _ in start..end {
            self.erase(start)?;
        }
        Ok(())
    }

    /// Truncates to `new_len` or pads with zeros up to it. On pool
    /// exhaustion while growing, the message is restored to its prior size.
    pub fn resize(&mut self, new_len: usize) -> Result<(), MessageError> {
        self.ensure_writable("resize")?;
        let len = self.len();
        if new_len > len {
            for grown in len..new_len {
                if self.push_back(0).is_err() {
                    for _ in len..grown {
                        let _ = self.pop_back();
                    }
                    return Err(MessageError::PoolExhausted);
                }
            }
        } else {
            for _ in new_len..len {
                self.pop_back()?;
            }
        }
        Ok(())
    }

    /// Releases every page and returns the message to the empty, writable
    /// state. Always succeeds, shared or not.
    pub fn clear(&mut self) {
        let mut cur = self.first.take();
        while let Some(idx) = cur {
            // Read the link before releasing: a freed page may be reused and
            // rewritten by another thread immediately.
            cur = unsafe { Pool::global().page(idx) }.next;
            Pool::global().release(idx);
        }
    }

    /// Copies the window starting at logical `offset` into `dest` and
    /// returns the number of bytes copied: `min(dest.len(), len - offset)`.
    pub fn get(&self, dest: &mut [u8], offset: usize) -> usize {
        let mut pos = 0;
        let mut copied = 0;
        for idx in self.chain() {
            let page = self.page(idx);
            let bytes = &page.data[page.head..page.tail];
            let page_end = pos + bytes.len();
            if page_end > offset {
                let from = offset.max(pos) - pos;
                let avail = &bytes[from..];
                let room = dest.len() - copied;
                let n = avail.len().min(room);
                dest[copied..copied + n].copy_from_slice(&avail[..n]);
                copied += n;
                if copied == dest.len() {
                    break;
                }
            }
            pos = page_end;
        }
        copied
    }

    /// Appends a linear byte buffer, copying page-wise. On pool exhaustion
    /// the message is restored to its prior size.
    pub fn put(&mut self, src: &[u8]) -> Result<(), MessageError> {
        self.ensure_writable("put")?;
        if src.is_empty() {
            return Ok(());
        }
        let prior = self.len();
        let mut idx = match self.last_two() {
            Some((_, last)) => last,
            None => match self.acquire_first() {
                Ok(idx) => idx,
                Err(e) => return Err(e),
            },
        };
        let mut remaining = src;
        loop {
            let page = self.page_mut(idx);
            let n = (PAGE_SIZE - page.tail).min(remaining.len());
            page.data[page.tail..page.tail + n].copy_from_slice(&remaining[..n]);
            page.tail += n;
            remaining = &remaining[n..];
            if remaining.is_empty() {
                return Ok(());
            }
            match Self::acquire() {
                Ok(fresh) => {
                    self.page_mut(idx).next = Some(fresh);
                    idx = fresh;
                }
                Err(e) => {
                    let _ = self.resize(prior);
                    return Err(e);
                }
            }
        }
    }

    /// Appends `other` by sharing its pages. Both messages end up
    /// referencing the shared pages and become read-only.
    pub fn append(&mut self, other: &Message) -> Result<(), MessageError> {
        self.ensure_writable("append")?;
        let Some(other_first) = other.first else {
            return Ok(());
        };
        for idx in other.chain() {
            Pool::global().share(idx);
        }
        match self.last_two() {
            Some((_, last)) => self.page_mut(last).next = Some(other_first),
            None => self.first = Some(other_first),
        }
        Ok(())
    }

    /// Makes a cheap copy by sharing pages. Every page's reference count is
    /// incremented, so both the original and the copy are read-only
    /// afterwards. (A copy of an empty message is an independent empty
    /// message — there is nothing to share.)
    pub fn ref_copy(&self) -> Message {
        for idx in self.chain() {
            Pool::global().share(idx);
        }
        Message {
            first: self.first,
            offset: self.offset,
        }
    }

    /// Makes a deep, writable copy with freshly acquired pages.
    pub fn try_clone(&self) -> Result<Message, MessageError> {
        let mut copy = Message::with_offset(self.offset);
        for byte in self.iter() {
            copy.push_back(byte)?;
        }
        Ok(copy)
    }

    /// Iterates over the bytes of the message.
    pub fn iter(&self) -> MessageBytes<'_> {
        MessageBytes::new(self)
    }

    // Page plumbing. The unsafe blocks below all rest on the pool's sharing
    // protocol: pages in this chain are held (refcount >= 1); a shared page
    // (refcount > 1) is never written by anyone; a unique page is written
    // only through the `&mut Message` owning it.

    fn page(&self, idx: PageIndex) -> &Page {
        unsafe { Pool::global().page(idx) }
    }

    fn page_mut(&mut self, idx: PageIndex) -> &mut Page {
        debug_assert!(Pool::global().refs(idx) == 1);
        unsafe { Pool::global().page_mut(idx) }
    }

    fn window(&self, idx: PageIndex) -> usize {
        let page = self.page(idx);
        page.tail - page.head
    }

    /// Walks the page chain front to back.
    fn chain(&self) -> impl Iterator<Item = PageIndex> + '_ {
        let mut cur = self.first;
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.page(idx).next;
            Some(idx)
        })
    }

    /// The last page and its predecessor, if any pages exist.
    fn last_two(&self) -> Option<(Option<PageIndex>, PageIndex)> {
        let mut prev = None;
        let mut last = self.first?;
        while let Some(next) = self.page(last).next {
            prev = Some(last);
            last = next;
        }
        Some((prev, last))
    }

    fn acquire() -> Result<PageIndex, MessageError> {
        Pool::global().acquire().ok_or(MessageError::PoolExhausted)
    }

    /// Acquires the first page with this message's head offset applied.
    fn acquire_first(&mut self) -> Result<PageIndex, MessageError> {
        let idx = Self::acquire()?;
        // SAFETY: freshly acquired, refcount one, not yet linked anywhere.
        let page = unsafe { Pool::global().page_mut(idx) };
        page.head = self.offset;
        page.tail = self.offset;
        self.first = Some(idx);
        Ok(idx)
    }

    /// Writes the byte at logical index `pos`. Callers have verified the
    /// message is writable and `pos` in range.
    fn set_at(&mut self, pos: usize, value: u8) {
        let mut skipped = 0;
        let mut cur = self.first;
        while let Some(idx) = cur {
            let (len, next) = {
                let page = self.page(idx);
                (page.tail - page.head, page.next)
            };
            if pos < skipped + len {
                let page = self.page_mut(idx);
                let head = page.head;
                page.data[head + pos - skipped] = value;
                return;
            }
            skipped += len;
            cur = next;
        }
        debug_assert!(false, "set_at out of range");
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<(), MessageError> {
        if self.is_shared() {
            tracing::warn!(operation, "mutation rejected, message is shared");
            return Err(MessageError::ReadOnly);
        }
        Ok(())
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.clear();
    }
}

impl PartialEq for Message {
    /// Equality over logical byte content, independent of page layout or
    /// sharing.
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Message {}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.iter() {
            write!(f, "{:02x} ", byte)?;
        }
        Ok(())
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[{}: {}]", self.len(), self)
    }
}
