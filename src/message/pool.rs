//! The process-wide page pool backing every [`Message`](crate::Message).
//!
//! The pool is a static array of [`PAGE_COUNT`] pages of [`PAGE_SIZE`] bytes
//! each. Pages are handed out from a LIFO free list and returned when their
//! reference count drops to zero; nothing here ever touches the heap.
//! Exhaustion is reported to the caller as a failed acquisition, never as a
//! wait.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Bytes per pool page.
pub const PAGE_SIZE: usize = 128;

/// Number of pages in the pool. `PAGE_SIZE * PAGE_COUNT` is the total
/// buffer memory of the process.
pub const PAGE_COUNT: usize = 128;

/// Default head offset of a fresh message inside its first page. Leaving
/// room at the front lets lower-layer protocols prepend their headers
/// without acquiring another page.
pub const PAGE_BEGIN: usize = PAGE_SIZE / 4;

pub(crate) type PageIndex = u16;

/// One pool page: a fixed data buffer plus the `head..tail` window of live
/// bytes and the link to the next page of the owning message chain.
pub(crate) struct Page {
    pub head: usize,
    pub tail: usize,
    pub next: Option<PageIndex>,
    pub data: [u8; PAGE_SIZE],
}

struct Slot {
    /// Number of message chains referencing this page. Zero means free.
    /// Above one the page is frozen: every holder refuses mutation.
    refs: AtomicU32,
    page: UnsafeCell<Page>,
}

impl Slot {
    const fn new() -> Self {
        Slot {
            refs: AtomicU32::new(0),
            page: UnsafeCell::new(Page {
                head: 0,
                tail: 0,
                next: None,
                data: [0; PAGE_SIZE],
            }),
        }
    }
}

struct Meta {
    /// LIFO stack of free page indices; `free[..top]` are valid.
    free: [PageIndex; PAGE_COUNT],
    top: usize,
    used_pages: usize,
    used_pages_max: usize,
}

/// The page pool. One static instance exists per process; see
/// [`Pool::global`].
pub struct Pool {
    meta: Mutex<Meta>,
    slots: [Slot; PAGE_COUNT],
}

// SAFETY: the `UnsafeCell<Page>` contents are governed by the reference
// counts: a page is written only while its count is exactly one and only
// through the unique `&mut Message` owning it, and is read shared only while
// every holder is read-only (count above one). Free-list and counter state
// is behind the mutex.
unsafe impl Sync for Pool {}

static GLOBAL: Pool = Pool::new();

impl Pool {
    const fn new() -> Self {
        let mut free = [0 as PageIndex; PAGE_COUNT];
        let mut i = 0;
        while i < PAGE_COUNT {
            // LIFO: page 0 on top so fresh processes hand out low indices first
            free[i] = (PAGE_COUNT - 1 - i) as PageIndex;
            i += 1;
        }
        Pool {
            meta: Mutex::new(Meta {
                free,
                top: PAGE_COUNT,
                used_pages: 0,
                used_pages_max: 0,
            }),
            slots: [const { Slot::new() }; PAGE_COUNT],
        }
    }

    /// The process-wide pool instance.
    pub fn global() -> &'static Pool {
        &GLOBAL
    }

    /// Takes one page off the free list with a reference count of one and a
    /// reset window. Returns `None` when the pool is exhausted.
    pub(crate) fn acquire(&self) -> Option<PageIndex> {
        let mut meta = self.meta.lock().unwrap();
        if meta.top == 0 {
            tracing::error!("page pool exhausted ({} pages)", PAGE_COUNT);
            return None;
        }
        meta.top -= 1;
        let idx = meta.free[meta.top];
        meta.used_pages += 1;
        if meta.used_pages > meta.used_pages_max {
            meta.used_pages_max = meta.used_pages;
        }
        tracing::trace!(
            page = idx,
            used = meta.used_pages,
            total = PAGE_COUNT,
            "page acquired"
        );
        self.slots[idx as usize].refs.store(1, Ordering::Release);
        // SAFETY: the page was free and is now held solely by this caller.
        let page = unsafe { &mut *self.slots[idx as usize].page.get() };
        page.head = 0;
        page.tail = 0;
        page.next = None;
        Some(idx)
    }

    /// Adds a reference to an already-acquired page.
    pub(crate) fn share(&self, idx: PageIndex) {
        self.slots[idx as usize].refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference; the page returns to the free list at zero.
    pub(crate) fn release(&self, idx: PageIndex) {
        if self.slots[idx as usize].refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut meta = self.meta.lock().unwrap();
            let top = meta.top;
            meta.free[top] = idx;
            meta.top += 1;
            meta.used_pages -= 1;
            tracing::trace!(
                page = idx,
                used = meta.used_pages,
                total = PAGE_COUNT,
                "page freed"
            );
        }
    }

    /// Current reference count of a page.
    pub(crate) fn refs(&self, idx: PageIndex) -> u32 {
        self.slots[idx as usize].refs.load(Ordering::Acquire)
    }

    /// Shared page access.
    ///
    /// # Safety
    ///
    /// The caller must hold a reference to the page (it is part of a live
    /// message chain) and must not hold a mutable reference to it.
    pub(crate) unsafe fn page(&self, idx: PageIndex) -> &Page {
        &*self.slots[idx as usize].page.get()
    }

    /// Exclusive page access.
    ///
    /// # Safety
    ///
    /// The caller must be the sole holder of the page (reference count one)
    /// and must reach it through the unique `&mut Message` owning the chain.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn page_mut(&self, idx: PageIndex) -> &mut Page {
        &mut *self.slots[idx as usize].page.get()
    }

    /// Number of pages currently acquired.
    pub fn used_pages(&self) -> usize {
        self.meta.lock().unwrap().used_pages
    }

    /// High-water mark of [`used_pages`](Self::used_pages) since process
    /// start or the last [`clear_used_pages_max`](Self::clear_used_pages_max).
    pub fn used_pages_max(&self) -> usize {
        self.meta.lock().unwrap().used_pages_max
    }

    /// Resets the high-water mark to the current usage.
    pub fn clear_used_pages_max(&self) {
        let mut meta = self.meta.lock().unwrap();
        meta.used_pages_max = meta.used_pages;
    }

    /// Total number of pages in the pool.
    pub const fn capacity(&self) -> usize {
        PAGE_COUNT
    }
}
