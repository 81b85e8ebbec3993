//! Linear storage backing a command stream.
//!
//! Commands live in one [`SlotArena`] per command type and are addressed by
//! slot index. Variable-length payloads live in [`AuxMemory`] and are
//! addressed by [`AuxSlice`] offsets. Neither hands out pointers, so both can
//! grow without invalidating what was already recorded.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;

use crate::gpu::driver::{CommandKind, CommandTypeId};
use crate::gpu::{GPUError, Result};

//===----------------------------------------------------------------------===//
// Per-type slots
//===----------------------------------------------------------------------===//

pub struct SlotArena<T> {
    slots: Vec<T>,
    capacity: usize,
    growable: bool,
    kind: CommandKind,
}

impl<T: Default> SlotArena<T> {
    pub fn new(kind: CommandKind, capacity: usize, growable: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            growable,
            kind,
        }
    }

    /// Default-initialises the next slot and returns its index.
    pub fn alloc(&mut self) -> Result<u32> {
        if self.slots.len() >= self.capacity {
            if !self.growable {
                return Err(GPUError::CommandArenaExhausted {
                    kind: self.kind,
                    capacity: self.capacity,
                });
            }
            self.capacity = self.capacity.saturating_mul(2).min(MAX_SLOTS);
            self.slots.reserve(self.capacity.saturating_sub(self.slots.len()));
            log::debug!(
                target: "kombu::stream",
                "grew {} arena to {} slots",
                self.kind,
                self.capacity
            );
        }

        let slot = slot_index(self.slots.len(), self.kind)?;
        self.slots.push(T::default());
        Ok(slot)
    }

    pub fn get(&self, slot: u32) -> Option<&T> {
        self.slots.get(slot as usize)
    }

    pub fn get_mut(&mut self, slot: u32) -> Option<&mut T> {
        self.slots.get_mut(slot as usize)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Slots are addressed by `u32` in the command log.
const MAX_SLOTS: usize = u32::MAX as usize;

fn slot_index(len: usize, kind: CommandKind) -> Result<u32> {
    u32::try_from(len).map_err(|_| GPUError::CommandArenaExhausted {
        kind,
        capacity: MAX_SLOTS,
    })
}

/// Type-erased view of a [`SlotArena`] so a stream can hold one per kind.
pub(crate) trait ErasedArena: Send + Sync {
    fn command_type(&self) -> CommandTypeId;
    fn rewind(&mut self);
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Default + Send + Sync + 'static> ErasedArena for SlotArena<T> {
    fn command_type(&self) -> CommandTypeId {
        CommandTypeId {
            kind: self.kind,
            type_id: TypeId::of::<T>(),
        }
    }

    fn rewind(&mut self) {
        // Keeps the allocation.
        self.slots.clear();
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

//===----------------------------------------------------------------------===//
// Aux memory
//===----------------------------------------------------------------------===//

/// Largest alignment aux memory can honour.
pub const AUX_ALIGN: usize = 16;

/// Slices store `u32` offsets, so an arena never grows past this.
pub const MAX_AUX_BYTES: usize = u32::MAX as usize;

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; AUX_ALIGN]);

const ZERO_CHUNK: Chunk = Chunk([0; AUX_ALIGN]);

static NEXT_AUX_ID: AtomicU32 = AtomicU32::new(1);

fn align_up(v: usize, a: usize) -> Option<usize> {
    debug_assert!(a.is_power_of_two());
    Some(v.checked_add(a - 1)? & !(a - 1))
}

/// Typed reference to a run of values in a stream's [`AuxMemory`].
///
/// Slices are tied to the arena that produced them and to its current
/// recording cycle; resolving one against another arena, or after a reset,
/// fails instead of reading stale bytes.
pub struct AuxSlice<T> {
    offset: u32,
    count: u32,
    arena: u32,
    epoch: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AuxSlice<T> {
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    pub fn byte_len(&self) -> usize {
        self.count as usize * std::mem::size_of::<T>()
    }
}

impl AuxSlice<u8> {
    /// Reinterprets a byte reservation as plain-old-data values.
    pub fn cast<U: Pod>(self) -> Option<AuxSlice<U>> {
        let size = std::mem::size_of::<U>();
        if size == 0
            || self.offset as usize % std::mem::align_of::<U>() != 0
            || self.count as usize % size != 0
        {
            return None;
        }

        Some(AuxSlice {
            offset: self.offset,
            count: self.count / size as u32,
            arena: self.arena,
            epoch: self.epoch,
            _marker: PhantomData,
        })
    }
}

impl<T> Clone for AuxSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AuxSlice<T> {}

impl<T> Default for AuxSlice<T> {
    fn default() -> Self {
        Self {
            offset: 0,
            count: 0,
            arena: 0,
            epoch: 0,
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for AuxSlice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.count == other.count
            && self.arena == other.arena
            && self.epoch == other.epoch
    }
}

impl<T> Eq for AuxSlice<T> {}

impl<T> fmt::Debug for AuxSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxSlice")
            .field("offset", &self.offset)
            .field("count", &self.count)
            .finish()
    }
}

/// Bump arena for variable-length command payloads.
///
/// Backing storage is 16-byte aligned, so any value with alignment up to
/// [`AUX_ALIGN`] lands correctly aligned at its offset.
pub struct AuxMemory {
    chunks: Vec<Chunk>,
    len: usize,
    capacity: usize,
    growable: bool,
    id: u32,
    epoch: u32,
}

impl AuxMemory {
    pub fn new(capacity: usize, growable: bool) -> Self {
        let capacity = capacity.min(MAX_AUX_BYTES);
        let chunks = vec![ZERO_CHUNK; capacity.div_ceil(AUX_ALIGN)];
        Self {
            chunks,
            len: 0,
            capacity,
            growable,
            id: NEXT_AUX_ID.fetch_add(1, Ordering::Relaxed),
            epoch: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    /// Rewinds the cursor. Slices handed out before this point stop resolving.
    pub fn reset(&mut self) {
        self.len = 0;
        self.epoch = self.epoch.wrapping_add(1).max(1);
    }

    fn reserve(&mut self, bytes: usize, align: usize) -> Result<usize> {
        if align > AUX_ALIGN {
            return Err(GPUError::UnsupportedAlignment { align });
        }

        let limit = if self.growable {
            MAX_AUX_BYTES
        } else {
            self.capacity
        };
        let end = align_up(self.len, align)
            .and_then(|start| start.checked_add(bytes))
            .filter(|end| *end <= limit)
            .ok_or(GPUError::AuxMemoryExhausted {
                requested: bytes,
                available: limit.saturating_sub(self.len),
            })?;
        let start = end - bytes;
        if end > self.capacity {
            self.capacity = end.max(self.capacity.saturating_mul(2)).min(MAX_AUX_BYTES);
            log::debug!(target: "kombu::stream", "grew aux memory to {} bytes", self.capacity);
        }

        let needed = end.div_ceil(AUX_ALIGN);
        if needed > self.chunks.len() {
            self.chunks.resize(needed, ZERO_CHUNK);
        }

        self.len = end;
        Ok(start)
    }

    fn base_ptr(&self) -> *const u8 {
        self.chunks.as_ptr() as *const u8
    }

    fn base_mut_ptr(&mut self) -> *mut u8 {
        self.chunks.as_mut_ptr() as *mut u8
    }

    fn make_slice<T>(&self, offset: usize, count: usize) -> Result<AuxSlice<T>> {
        let exhausted = || GPUError::AuxMemoryExhausted {
            requested: count.saturating_mul(std::mem::size_of::<T>()),
            available: MAX_AUX_BYTES.saturating_sub(offset),
        };
        Ok(AuxSlice {
            offset: u32::try_from(offset).map_err(|_| exhausted())?,
            count: u32::try_from(count).map_err(|_| exhausted())?,
            arena: self.id,
            epoch: self.epoch,
            _marker: PhantomData,
        })
    }

    /// Copies `values` into the arena.
    pub fn emplace<T: Copy + Send + Sync + 'static>(&mut self, values: &[T]) -> Result<AuxSlice<T>> {
        if values.is_empty() {
            return Ok(AuxSlice::default());
        }

        let bytes = std::mem::size_of_val(values);
        let start = self.reserve(bytes, std::mem::align_of::<T>())?;
        // SAFETY: `reserve` grew the backing chunks to cover `start..start + bytes`
        // and `start` is aligned for `T` because the base is `AUX_ALIGN` aligned.
        unsafe {
            std::ptr::copy_nonoverlapping(
                values.as_ptr() as *const u8,
                self.base_mut_ptr().add(start),
                bytes,
            );
        }

        self.make_slice(start, values.len())
    }

    /// Reserves `bytes` zeroed bytes for the caller to fill through
    /// [`AuxMemory::bytes_mut`].
    pub fn emplace_size_only(&mut self, bytes: usize) -> Result<AuxSlice<u8>> {
        if bytes == 0 {
            return Ok(AuxSlice::default());
        }

        let start = self.reserve(bytes, AUX_ALIGN)?;
        let slice = self.make_slice::<u8>(start, bytes)?;
        self.bytes_mut(slice)?.fill(0);
        Ok(slice)
    }

    fn check<T>(&self, slice: &AuxSlice<T>) -> Result<()> {
        if slice.arena != self.id || slice.epoch != self.epoch {
            return Err(GPUError::StaleAuxSlice);
        }

        let end = slice.offset as usize + slice.byte_len();
        if end > self.len || slice.offset as usize % std::mem::align_of::<T>() != 0 {
            return Err(GPUError::StaleAuxSlice);
        }

        Ok(())
    }

    /// Resolves a slice minted by this arena in the current cycle.
    pub fn get<T: Copy + 'static>(&self, slice: AuxSlice<T>) -> Result<&[T]> {
        if slice.is_empty() {
            return Ok(&[]);
        }

        self.check(&slice)?;
        // SAFETY: `check` proves the slice came from this arena in this cycle,
        // so the range was written as `count` values of `T` (or zeroed bytes
        // re-viewed as `Pod` through `AuxSlice::cast`) and is in bounds and
        // aligned.
        unsafe {
            Ok(std::slice::from_raw_parts(
                self.base_ptr().add(slice.offset as usize) as *const T,
                slice.count as usize,
            ))
        }
    }

    pub fn bytes_mut(&mut self, slice: AuxSlice<u8>) -> Result<&mut [u8]> {
        if slice.is_empty() {
            return Ok(&mut []);
        }

        self.check(&slice)?;
        // SAFETY: range validated by `check`; `&mut self` guarantees exclusivity.
        unsafe {
            Ok(std::slice::from_raw_parts_mut(
                self.base_mut_ptr().add(slice.offset as usize),
                slice.count as usize,
            ))
        }
    }
}

impl fmt::Debug for AuxMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxMemory")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::{ResourceState, TextureBarrier};

    #[test]
    fn slot_arena_fails_fast_when_full() {
        let mut arena = SlotArena::<u32>::new(CommandKind::DrawInstanced, 2, false);
        arena.alloc().unwrap();
        arena.alloc().unwrap();
        assert!(matches!(
            arena.alloc(),
            Err(GPUError::CommandArenaExhausted { capacity: 2, .. })
        ));
    }

    #[test]
    fn slot_arena_grows_when_allowed() {
        let mut arena = SlotArena::<u32>::new(CommandKind::DrawInstanced, 1, true);
        for _ in 0..5 {
            arena.alloc().unwrap();
        }
        assert_eq!(arena.len(), 5);
        assert!(arena.capacity() >= 5);
    }

    #[test]
    fn aux_respects_alignment() {
        let mut aux = AuxMemory::new(256, false);
        let a = aux.emplace(&[1u8, 2, 3]).unwrap();
        let b = aux.emplace(&[7u64]).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset() % 8, 0);
        assert_eq!(aux.get(a).unwrap(), &[1, 2, 3]);
        assert_eq!(aux.get(b).unwrap(), &[7]);
    }

    #[test]
    fn aux_fails_fast_when_full() {
        let mut aux = AuxMemory::new(16, false);
        aux.emplace(&[0u32; 4]).unwrap();
        assert!(matches!(
            aux.emplace(&[1u32]),
            Err(GPUError::AuxMemoryExhausted { requested: 4, available: 0 })
        ));
    }

    #[test]
    fn aux_growth_keeps_earlier_slices() {
        let mut aux = AuxMemory::new(8, true);
        let first = aux.emplace(&[11u32, 12]).unwrap();
        let second = aux.emplace(&[0u32; 64]).unwrap();
        assert_eq!(aux.get(first).unwrap(), &[11, 12]);
        assert_eq!(aux.get(second).unwrap().len(), 64);
    }

    #[test]
    fn oversized_reservation_is_an_error() {
        let mut aux = AuxMemory::new(64, false);
        aux.emplace(&[1u8]).unwrap();
        assert!(matches!(
            aux.emplace_size_only(usize::MAX),
            Err(GPUError::AuxMemoryExhausted { requested: usize::MAX, .. })
        ));

        let mut growable = AuxMemory::new(64, true);
        growable.emplace(&[1u8]).unwrap();
        assert!(matches!(
            growable.emplace_size_only(usize::MAX),
            Err(GPUError::AuxMemoryExhausted { .. })
        ));
        // The failed reservations left both cursors alone.
        assert_eq!(aux.len(), 1);
        assert_eq!(growable.len(), 1);
        assert_eq!(growable.emplace(&[2u8]).unwrap().offset(), 1);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn growth_stops_where_offsets_would_truncate() {
        let mut aux = AuxMemory::new(16, true);
        aux.emplace(&[0u8; 16]).unwrap();
        assert!(matches!(
            aux.emplace_size_only(MAX_AUX_BYTES),
            Err(GPUError::AuxMemoryExhausted { .. })
        ));
        assert!(aux.capacity() <= MAX_AUX_BYTES);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn slot_index_past_u32_is_an_error() {
        assert_eq!(slot_index(7, CommandKind::Dispatch).unwrap(), 7);
        assert_eq!(slot_index(MAX_SLOTS, CommandKind::Dispatch).unwrap(), u32::MAX);
        assert!(matches!(
            slot_index(MAX_SLOTS + 1, CommandKind::Dispatch),
            Err(GPUError::CommandArenaExhausted {
                kind: CommandKind::Dispatch,
                ..
            })
        ));
    }

    #[test]
    fn reset_invalidates_slices() {
        let mut aux = AuxMemory::new(64, false);
        let s = aux.emplace(&[5u16]).unwrap();
        aux.reset();
        assert!(matches!(aux.get(s), Err(GPUError::StaleAuxSlice)));
    }

    #[test]
    fn slices_do_not_cross_arenas() {
        let mut a = AuxMemory::new(64, false);
        let b = AuxMemory::new(64, false);
        let s = a.emplace(&[1u32]).unwrap();
        assert!(b.get(s).is_err());
    }

    #[test]
    fn size_only_is_zeroed_and_castable() {
        let mut aux = AuxMemory::new(64, false);
        aux.emplace(&[0xffu8; 3]).unwrap();
        let raw = aux.emplace_size_only(8).unwrap();
        assert!(aux.get(raw).unwrap().iter().all(|b| *b == 0));

        aux.bytes_mut(raw).unwrap()[..4].copy_from_slice(&9u32.to_ne_bytes());
        let words = raw.cast::<u32>().unwrap();
        assert_eq!(aux.get(words).unwrap(), &[9, 0]);
    }

    #[test]
    fn holds_non_pod_values() {
        let mut aux = AuxMemory::new(512, false);
        let barriers = [
            TextureBarrier {
                is_swapchain: true,
                new: ResourceState::Present,
                ..Default::default()
            },
            TextureBarrier::default(),
        ];
        let s = aux.emplace(&barriers).unwrap();
        assert_eq!(aux.get(s).unwrap(), &barriers);
    }
}
