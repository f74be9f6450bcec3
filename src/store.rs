//! The cell store (C1): a raw two-space arena of [`Cell`] records
//! addressed by [`CellIdx`].
//!
//! Grounded on the raw-pointer arena pattern used for the tagged value
//! stack elsewhere in this codebase (manual `alloc`/`dealloc`/`realloc`
//! plus an explicit `grow`, rather than reaching for `Vec<Cell>` and
//! its reallocation-on-push semantics, which would make the "indices
//! survive growth" invariant harder to audit at a glance).

use crate::cell::{Cell, CellIdx, Tag};
use crate::error::EngineError;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// One raw buffer of `capacity` cells, owned and manually managed.
struct ArenaBuf {
    ptr: NonNull<Cell>,
    capacity: usize,
}

impl ArenaBuf {
    fn layout(capacity: usize) -> Layout {
        Layout::array::<Cell>(capacity).expect("arena layout overflow")
    }

    fn with_capacity(capacity: usize) -> Self {
        let layout = Self::layout(capacity);
        // SAFETY: layout is non-zero sized for any capacity > 0, which
        // every caller in this module guarantees.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw as *mut Cell).expect("arena allocation failed");
        ArenaBuf { ptr, capacity }
    }

    /// Grows (never shrinks) the buffer in place, preserving contents
    /// up to `min(old_capacity, new_capacity)` cells.
    fn grow(&mut self, new_capacity: usize) {
        assert!(new_capacity >= self.capacity, "arena grow must not shrink");
        let old_layout = Self::layout(self.capacity);
        let new_layout = Self::layout(new_capacity);
        // SAFETY: self.ptr was allocated with old_layout by this type.
        let raw = unsafe {
            alloc::realloc(self.ptr.as_ptr() as *mut u8, old_layout, new_layout.size())
        };
        self.ptr = NonNull::new(raw as *mut Cell).expect("arena reallocation failed");
        // Zero the newly added tail so uninitialized cells never look
        // like a spurious broken-heart or live tag.
        unsafe {
            let tail = self.ptr.as_ptr().add(self.capacity);
            std::ptr::write_bytes(tail, 0, new_capacity - self.capacity);
        }
        self.capacity = new_capacity;
    }

    #[inline]
    fn get(&self, idx: CellIdx) -> Cell {
        debug_assert!((idx as usize) < self.capacity);
        unsafe { *self.ptr.as_ptr().add(idx as usize) }
    }

    #[inline]
    fn set(&mut self, idx: CellIdx, cell: Cell) {
        debug_assert!((idx as usize) < self.capacity);
        unsafe { *self.ptr.as_ptr().add(idx as usize) = cell }
    }

    /// Pointer to the byte-packed payload region of a `Bytes` header
    /// at `start`: the header's `cdr` word and everything after it,
    /// reinterpreted as raw bytes rather than further `Cell`s.
    #[inline]
    fn bytes_ptr(&self, start: CellIdx) -> *mut u8 {
        debug_assert!((start as usize) < self.capacity);
        let cell_ptr = unsafe { self.ptr.as_ptr().add(start as usize) };
        let cdr_offset = std::mem::offset_of!(Cell, cdr);
        unsafe { (cell_ptr as *mut u8).add(cdr_offset) }
    }
}

impl Drop for ArenaBuf {
    fn drop(&mut self) {
        let layout = Self::layout(self.capacity);
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
    }
}

/// `bytes_cells(length)`: the number of cells a byte string of
/// `length` bytes occupies, header included — ⌈(1 + 2·word + length +
/// word)/word⌉ from §3, reproduced with this host's word size.
pub fn bytes_cells(length: usize) -> usize {
    let word = std::mem::size_of::<CellIdx>();
    (1 + word + word + length + word) / word
}

/// The two-space cell store (C1): `active` is what the evaluator reads
/// and writes; `scratch` exists only during a collection.
pub struct CellStore {
    active: ArenaBuf,
    scratch: Option<ArenaBuf>,
    /// `g_free`: next free index in `active`.
    free: CellIdx,
    /// `g_free` within `scratch`, valid only mid-collection.
    scratch_free: CellIdx,
    pub arena_size: CellIdx,
    pub jam_size: CellIdx,
    pub max_arena_size: CellIdx,
}

impl CellStore {
    pub fn new(arena_size: CellIdx, jam_size: CellIdx, max_arena_size: CellIdx) -> Self {
        let capacity = (arena_size + jam_size + 1) as usize;
        let mut active = ArenaBuf::with_capacity(capacity);
        // Cell 0 is an out-of-band sentinel; all user indices are >= 1.
        active.set(0, Cell::new(Tag::Special, 0, 0));
        CellStore {
            active,
            scratch: None,
            free: 1,
            scratch_free: 0,
            arena_size,
            jam_size,
            max_arena_size,
        }
    }

    pub fn free(&self) -> CellIdx {
        self.free
    }

    pub fn capacity(&self) -> CellIdx {
        self.arena_size + self.jam_size
    }

    pub fn get(&self, idx: CellIdx) -> Cell {
        self.active.get(idx)
    }

    pub fn set(&mut self, idx: CellIdx, cell: Cell) {
        self.active.set(idx, cell)
    }

    pub fn bytes_ptr(&self, start: CellIdx) -> *mut u8 {
        self.active.bytes_ptr(start)
    }

    /// `alloc(n)`: bump `g_free` by `n`, returning the start index.
    /// Per §4.1 the store trusts the caller to have passed
    /// `gc_check()` first; an overrun here is the unrecoverable
    /// "allocator exhaustion" condition from §7.
    pub fn alloc(&mut self, n: CellIdx) -> Result<CellIdx, EngineError> {
        let start = self.free;
        let next = self.free + n;
        if next > self.arena_size {
            return Err(EngineError::ArenaExhausted {
                requested: n,
                free: self.free,
                arena_size: self.arena_size,
            });
        }
        self.free = next;
        Ok(start)
    }

    pub fn make_cell(&mut self, tag: Tag, car: CellIdx, cdr: CellIdx) -> Result<CellIdx, EngineError> {
        let idx = self.alloc(1)?;
        self.set(idx, Cell::new(tag, car, cdr));
        Ok(idx)
    }

    // --- Collection support (used only by `crate::gc`) ---

    pub(crate) fn open_scratch(&mut self) {
        let capacity = (self.arena_size + self.jam_size + 1) as usize;
        self.scratch = Some(ArenaBuf::with_capacity(capacity));
        self.scratch_free = 1;
    }

    pub(crate) fn scratch_free(&self) -> CellIdx {
        self.scratch_free
    }

    pub(crate) fn get_scratch(&self, idx: CellIdx) -> Cell {
        self.scratch.as_ref().expect("scratch not open").get(idx)
    }

    pub(crate) fn set_scratch(&mut self, idx: CellIdx, cell: Cell) {
        self.scratch.as_mut().expect("scratch not open").set(idx, cell)
    }

    pub(crate) fn scratch_bytes_ptr(&self, start: CellIdx) -> *mut u8 {
        self.scratch.as_ref().expect("scratch not open").bytes_ptr(start)
    }

    /// Reserves `n` cells in scratch space, returning the start index.
    pub(crate) fn alloc_scratch(&mut self, n: CellIdx) -> CellIdx {
        let start = self.scratch_free;
        self.scratch_free += n;
        start
    }

    /// `gc_flip`: the compacted scratch space becomes the active
    /// space; `g_free` adopts the scratch-space free pointer.
    pub(crate) fn flip(&mut self) {
        let scratch = self.scratch.take().expect("scratch not open");
        self.active = scratch;
        self.free = self.scratch_free;
        self.scratch_free = 0;
    }

    /// Doubles `arena_size`/`jam_size` up to `max_arena_size` and
    /// reallocates the active buffer in place so existing indices
    /// remain valid (§4.2 "Arena growth").
    pub(crate) fn grow(&mut self) {
        let new_arena = (self.arena_size * 2).min(self.max_arena_size);
        let new_jam = self.jam_size * 2;
        self.arena_size = new_arena;
        self.jam_size = new_jam;
        let capacity = (new_arena + new_jam + 1) as usize;
        self.active.grow(capacity);
    }

    /// Grows `jam_size` to `1.5 * live` when the live set after a
    /// collection exceeds the current jam headroom.
    pub(crate) fn grow_jam_to(&mut self, live: CellIdx) {
        self.jam_size = live + live / 2;
        let capacity = (self.arena_size + self.jam_size + 1) as usize;
        self.active.grow(capacity);
    }
}
