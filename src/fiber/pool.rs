//! The fiber arena: owns every [`FiberRecord`], hands out fresh ones or
//! recycles finished ones via a free list, and enforces the `abac` pin
//! contract (spec.md §4.1, §9's "arena + generational index" design note).

use std::os::raw::c_void;

use crate::error::{Error, Result};

use super::context::{clamp_stack_size, Context, Stack};
use super::record::{fiber_trampoline, FiberRecord, Phase};

/// Raw arena index. Valid only in combination with a generation check
/// (see [`FiberHandle`]) when crossing the public API boundary; internal
/// code that already holds a `Slot` it just looked up treats it as
/// trusted for the duration of one scheduler turn.
pub type Slot = u32;

/// A generation-guarded external reference to a fiber record.
///
/// Two `FiberHandle`s can carry the same `slot` across a recycle; the
/// `generation` field is what makes a handle to the *old* occupant a
/// harmless miss (see [`Pool::resolve`]) instead of silently operating on
/// an unrelated, newer fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberHandle {
    pub(crate) slot: Slot,
    pub(crate) generation: u32,
}

pub struct Pool {
    arena: Vec<FiberRecord>,
    free_list: Vec<Slot>,
    /// Finalized-but-pinned records, merged back into `free_list` by
    /// [`Pool::gc`] once their `abac` counter returns to zero.
    holding: Vec<Slot>,
    next_id: u64,
    stack_size: usize,
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            arena: Vec::new(),
            free_list: Vec::new(),
            holding: Vec::new(),
            next_id: 0,
            stack_size: clamp_stack_size(256 * 1024),
        }
    }

    pub fn set_stack_size(&mut self, bytes: usize) -> usize {
        let prev = self.stack_size;
        self.stack_size = clamp_stack_size(bytes);
        prev
    }

    pub fn record(&self, slot: Slot) -> &FiberRecord {
        &self.arena[slot as usize]
    }

    pub fn record_mut(&mut self, slot: Slot) -> &mut FiberRecord {
        &mut self.arena[slot as usize]
    }

    /// Resolves a handle to its slot, rejecting stale handles (wrong
    /// generation) or ones pointing at a now-dormant/recycled slot.
    pub fn resolve(&self, handle: FiberHandle) -> Option<Slot> {
        let record = self.arena.get(handle.slot as usize)?;
        if record.generation == handle.generation && !record.finalized {
            Some(handle.slot)
        } else {
            None
        }
    }

    pub fn handle_of(&self, slot: Slot) -> FiberHandle {
        FiberHandle {
            slot,
            generation: self.arena[slot as usize].generation,
        }
    }

    /// Like [`resolve`](Pool::resolve), but matches a record regardless of
    /// its `finalized` flag — only the generation has to agree. Used for
    /// post-mortem reads (`get_retval`, a pinned fiber's name/id) and for
    /// `unpin`, which is only ever called on a fiber that has already
    /// finished and is (by definition, since it's still pinned) sitting on
    /// the holding list rather than already recycled into a new fiber.
    pub fn resolve_any_generation(&self, handle: FiberHandle) -> Option<Slot> {
        let record = self.arena.get(handle.slot as usize)?;
        if record.generation == handle.generation {
            Some(handle.slot)
        } else {
            None
        }
    }

    /// Like [`resolve`](Pool::resolve), but also matches a record that has
    /// already been finalized (and even recycled), as long as no later
    /// `new_fiber` call has reused the slot (which would have bumped its
    /// generation). Used by `fiber::JoinHandle::join` to retrieve a
    /// just-finished fiber's stashed result in the narrow window right
    /// after `finalize` runs.
    pub fn take_cld_if_same_generation(&mut self, handle: FiberHandle) -> Option<Box<dyn std::any::Any>> {
        let record = self.arena.get_mut(handle.slot as usize)?;
        if record.generation == handle.generation {
            record.cld.take()
        } else {
            None
        }
    }

    /// Acquires a slot from the free list if one is available, else grows
    /// the arena.
    fn alloc_slot(&mut self) -> Slot {
        if let Some(slot) = self.free_list.pop() {
            slot
        } else {
            self.arena.push(FiberRecord::new_dormant());
            (self.arena.len() - 1) as Slot
        }
    }

    /// spec.md §4.1 `new`: allocate a stack+context for `f`, in the
    /// DORMANT phase. Does not run `f`.
    pub fn new_fiber(&mut self, name: &str, f: Box<dyn FnOnce()>) -> Result<FiberHandle> {
        let stack = Stack::new(self.stack_size)?;

        let slot = self.alloc_slot();
        let id = self.next_id;
        self.next_id += 1;

        // `fiber_trampoline` reads this slot number back out once it has
        // switched onto the new stack, to find its own record again.
        let slot_arg = Box::into_raw(Box::new(slot)) as *mut c_void;
        // SAFETY: `fiber_trampoline` is the designated entry point for
        // exactly this ABI contract (never returns, expects a `*mut Slot`).
        let context = unsafe { Context::new(&stack, fiber_trampoline, slot_arg) };

        let record = &mut self.arena[slot as usize];
        record.id = id;
        record.set_name(name);
        record.generation = record.generation.wrapping_add(1);
        record.stack = Some(stack);
        record.context = context;
        record.set_entry(f);
        record.phase = Phase::Dormant;
        record.finalized = false;
        record.abac = 0;
        record.rc = super::record::Rc::Ok;
        record.cld = None;

        Ok(FiberHandle {
            slot,
            generation: record.generation,
        })
    }

    /// Recycles a finalized slot: if still pinned, parks it on the
    /// holding list instead of the free list (spec.md §4.1 `finalize`).
    pub fn recycle(&mut self, slot: Slot) {
        let record = &mut self.arena[slot as usize];
        debug_assert!(record.finalized);
        record.stack = None; // drops the mapping
        // `id`/`cld`/`retval` deliberately survive recycle while the
        // record is still pinned (parked on the holding list below): a
        // caller that `pin`ned the fiber before it finished is expecting
        // to read this post-mortem state back via `id`/`get_retval`/
        // `JoinHandle::join` before calling `unpin`. They're cleared on
        // reuse in `new_fiber` instead.
        if record.abac == 0 {
            record.id = u64::MAX;
        }
        if record.abac > 0 {
            self.holding.push(slot);
        } else {
            self.free_list.push(slot);
        }
    }

    pub fn pin(&mut self, slot: Slot) {
        self.arena[slot as usize].abac += 1;
    }

    pub fn unpin(&mut self, slot: Slot) {
        let record = &mut self.arena[slot as usize];
        debug_assert!(record.abac > 0, "unpin without a matching pin");
        record.abac = record.abac.saturating_sub(1);
    }

    /// spec.md §4.1 `gc`: releases holding-list entries whose pin count
    /// has returned to zero back into the free list.
    pub fn gc(&mut self) {
        let mut still_held = Vec::new();
        for slot in self.holding.drain(..) {
            if self.arena[slot as usize].abac == 0 {
                self.free_list.push(slot);
            } else {
                still_held.push(slot);
            }
        }
        self.holding = still_held;
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[cfg(test)]
    pub fn push_raw(&mut self, record: FiberRecord) -> Slot {
        self.arena.push(record);
        (self.arena.len() - 1) as Slot
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point reached the first time a fiber's context is switched into
/// (see `record.rs::fiber_trampoline`). Runs the fiber's closure on its
/// own stack, then hands control to [`crate::runtime::finalize_current`]
/// which finalizes the record and switches back to the scheduler — this
/// function never returns.
pub(super) fn run_current_and_finalize(slot: Slot) -> ! {
    let f = crate::runtime::with_runtime(|rt| {
        rt.pool.record_mut(slot).phase = Phase::Resumed;
        rt.pool.record_mut(slot).take_entry()
    });
    if let Some(f) = f {
        // Unwinding out of a fiber onto an unrelated stack would corrupt
        // the scheduler; a panic inside a fiber still finalizes it (with
        // rc left at whatever it was) rather than propagating further.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        if let Err(payload) = result {
            log::error!("fiber '{}' panicked", crate::runtime::with_runtime(|rt| rt.pool.record(slot).name().to_string()));
            drop(payload);
        }
    }
    crate::runtime::finalize_current_and_switch_back(slot)
}
