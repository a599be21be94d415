//! Double-buffered state exchange between a control writer and the audio reader
//!
//! For state too large to hand over by value every block, two copies of the
//! state live behind an atomic "current" index. The audio thread reads the
//! current copy; the control thread edits the off copy and swaps. Because
//! the off copy missed everything applied since it was last published, the
//! writer replays its mutation log before applying new mutations.
//!
//! Safety protocol (all of it lives in this file):
//! - the writer only ever touches the off copy, and only after checking the
//!   reader has not pinned it;
//! - the reader pins the index it is about to read and re-checks `current`
//!   afterwards, retrying if a swap raced it;
//! - `current` is stored with release and loaded with acquire, so a reader
//!   that observes the new index also observes the writes behind it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Index value meaning "the reader holds no copy"
const NOT_READING: usize = usize::MAX;

/// State that can be edited through a stream of mutations
pub trait ManagedState: Send + 'static {
    type Mutation: Send;

    fn apply(&mut self, mutation: &Self::Mutation);
}

struct Slots<S> {
    copies: [UnsafeCell<S>; 2],
    current: AtomicUsize,
    reading: AtomicUsize,
}

// Access to `copies` is serialized by the current/reading protocol above.
unsafe impl<S: Send> Sync for Slots<S> {}

/// Create a writer/reader pair over two copies of `initial`
pub fn double_buffered<S: ManagedState + Clone>(initial: S) -> (StateWriter<S>, StateReader<S>) {
    let slots = Arc::new(Slots {
        copies: [UnsafeCell::new(initial.clone()), UnsafeCell::new(initial)],
        current: AtomicUsize::new(0),
        reading: AtomicUsize::new(NOT_READING),
    });
    (
        StateWriter {
            slots: Arc::clone(&slots),
            pending: Vec::new(),
            log: Vec::new(),
        },
        StateReader { slots },
    )
}

/// Control-thread half: queue mutations and publish them
pub struct StateWriter<S: ManagedState> {
    slots: Arc<Slots<S>>,
    /// Mutations not yet applied to any copy
    pending: Vec<S::Mutation>,
    /// Mutations in the published copy that the off copy has not seen
    log: Vec<S::Mutation>,
}

impl<S: ManagedState> StateWriter<S> {
    pub fn mutate(&mut self, mutation: S::Mutation) {
        self.pending.push(mutation);
    }

    /// Apply pending mutations to the off copy and swap it in.
    ///
    /// Returns false when the reader still pins the off copy; the pending
    /// mutations stay queued and the caller retries on its next cycle.
    pub fn publish(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let cur = self.slots.current.load(Ordering::Acquire);
        let off = 1 - cur;
        if self.slots.reading.load(Ordering::Acquire) == off {
            return false;
        }

        // Safe: the reader has not pinned `off` and will refuse to pin it
        // until `current` points at it, which happens only after the store
        // below.
        let state = unsafe { &mut *self.slots.copies[off].get() };
        for m in self.log.drain(..) {
            state.apply(&m);
        }
        for m in &self.pending {
            state.apply(m);
        }
        self.log = std::mem::take(&mut self.pending);

        self.slots.current.store(off, Ordering::Release);
        true
    }
}

/// Audio-thread half: pin and read the current copy
pub struct StateReader<S: ManagedState> {
    slots: Arc<Slots<S>>,
}

impl<S: ManagedState> StateReader<S> {
    /// Borrow the current copy for the duration of the block.
    ///
    /// Bounded: the retry loop only repeats when a swap lands between the
    /// pin and the re-check, and the writer cannot swap twice without the
    /// reader unpinning in between.
    pub fn current(&mut self) -> &S {
        loop {
            let idx = self.slots.current.load(Ordering::Acquire);
            self.slots.reading.store(idx, Ordering::Release);
            if self.slots.current.load(Ordering::Acquire) == idx {
                return unsafe { &*self.slots.copies[idx].get() };
            }
        }
    }
}
