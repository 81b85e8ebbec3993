//! Command streams: an ordered log of typed commands plus the arenas that
//! hold them.

pub mod arena;

use std::fmt;

pub use arena::{AuxMemory, AuxSlice, SlotArena, AUX_ALIGN};
use arena::ErasedArena;

use crate::gpu::driver::{type_id, Command, CommandKind};
use crate::gpu::{GPUError, QueueType, Result};

#[cfg(feature = "kombu-serde")]
use serde::{Deserialize, Serialize};

/// Sizing for a [`CommandStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct CommandStreamInfo {
    pub queue_type: QueueType,
    /// Maximum number of commands in the log.
    pub command_capacity: usize,
    /// Byte budget for each per-type arena; the slot count is derived from
    /// the command's size.
    pub per_type_bytes: usize,
    pub aux_bytes: usize,
    /// Grow arenas on exhaustion instead of failing the call.
    pub growable: bool,
}

impl Default for CommandStreamInfo {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Graphics,
            command_capacity: 1500,
            per_type_bytes: 24000,
            aux_bytes: 10000,
            growable: false,
        }
    }
}

impl CommandStreamInfo {
    pub fn for_queue(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            ..Default::default()
        }
    }

    fn slots_for<T>(&self) -> usize {
        (self.per_type_bytes / std::mem::size_of::<T>().max(1)).max(1)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamState {
    Recording,
    Closed,
    Submitted,
    Retired,
}

/// One entry of the command log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommandRecord {
    pub kind: CommandKind,
    pub slot: u32,
}

/// Append-only command recording bound to one queue type.
///
/// A stream is owned by a single recording thread. Recording order is the
/// execution order.
pub struct CommandStream {
    info: CommandStreamInfo,
    state: StreamState,
    log: Vec<CommandRecord>,
    arenas: Vec<Option<Box<dyn ErasedArena>>>,
    aux: AuxMemory,
}

impl CommandStream {
    pub fn new(info: &CommandStreamInfo) -> Self {
        let mut arenas = Vec::with_capacity(CommandKind::COUNT);
        arenas.resize_with(CommandKind::COUNT, || None);
        Self {
            info: *info,
            state: StreamState::Recording,
            log: Vec::with_capacity(info.command_capacity.min(4096)),
            arenas,
            aux: AuxMemory::new(info.aux_bytes, info.growable),
        }
    }

    pub fn info(&self) -> &CommandStreamInfo {
        &self.info
    }

    pub fn queue_type(&self) -> QueueType {
        self.info.queue_type
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Recorded commands in execution order.
    pub fn records(&self) -> &[CommandRecord] {
        &self.log
    }

    pub fn aux(&self) -> &AuxMemory {
        &self.aux
    }

    fn expect_state(&self, expected: StreamState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(GPUError::InvalidStreamState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn arena_mut<T: Command>(&mut self) -> Result<&mut arena::SlotArena<T>> {
        let slots = self.info.slots_for::<T>();
        let growable = self.info.growable;
        let entry = &mut self.arenas[T::KIND.index()];
        let arena = entry.get_or_insert_with(|| -> Box<dyn ErasedArena> {
            Box::new(arena::SlotArena::<T>::new(T::KIND, slots, growable))
        });

        let found = arena.command_type();
        arena
            .as_any_mut()
            .downcast_mut::<arena::SlotArena<T>>()
            .ok_or(GPUError::CommandTypeMismatch {
                kind: T::KIND,
                expected: found,
                found: type_id::<T>(),
            })
    }

    /// Appends a default-initialised `T` and returns it for the caller to fill.
    pub fn add_command<T: Command>(&mut self) -> Result<&mut T> {
        self.expect_state(StreamState::Recording, "add_command")?;

        if !T::QUEUES.contains(self.info.queue_type.mask()) {
            return Err(GPUError::IncompatibleCommand {
                kind: T::KIND,
                queue: self.info.queue_type,
            });
        }

        if self.log.len() >= self.info.command_capacity {
            if !self.info.growable {
                return Err(GPUError::CommandLogExhausted {
                    capacity: self.info.command_capacity,
                });
            }
            self.info.command_capacity *= 2;
            log::debug!(
                target: "kombu::stream",
                "grew command log to {} entries",
                self.info.command_capacity
            );
        }

        let slot = self.arena_mut::<T>()?.alloc()?;
        self.log.push(CommandRecord {
            kind: T::KIND,
            slot,
        });

        self.arena_mut::<T>()?
            .get_mut(slot)
            .ok_or(GPUError::CorruptStream(T::KIND))
    }

    /// Records a fully built command.
    pub fn record<T: Command>(&mut self, cmd: T) -> Result<()> {
        *self.add_command::<T>()? = cmd;
        Ok(())
    }

    pub fn emplace_aux<T: Copy + Send + Sync + 'static>(
        &mut self,
        values: &[T],
    ) -> Result<AuxSlice<T>> {
        self.expect_state(StreamState::Recording, "emplace_aux")?;
        self.aux.emplace(values)
    }

    pub fn emplace_aux_value<T: Copy + Send + Sync + 'static>(
        &mut self,
        value: T,
    ) -> Result<AuxSlice<T>> {
        self.emplace_aux(std::slice::from_ref(&value))
    }

    /// Reserves zeroed bytes to be filled through [`CommandStream::aux_bytes_mut`].
    pub fn emplace_aux_size_only(&mut self, bytes: usize) -> Result<AuxSlice<u8>> {
        self.expect_state(StreamState::Recording, "emplace_aux_size_only")?;
        self.aux.emplace_size_only(bytes)
    }

    pub fn aux_bytes_mut(&mut self, slice: AuxSlice<u8>) -> Result<&mut [u8]> {
        self.expect_state(StreamState::Recording, "aux_bytes_mut")?;
        self.aux.bytes_mut(slice)
    }

    /// Looks up the command behind a log record.
    pub fn command<T: Command>(&self, record: CommandRecord) -> Result<&T> {
        if record.kind != T::KIND {
            return Err(GPUError::CorruptStream(record.kind));
        }

        self.arenas[T::KIND.index()]
            .as_ref()
            .and_then(|a| a.as_any().downcast_ref::<arena::SlotArena<T>>())
            .and_then(|a| a.get(record.slot))
            .ok_or(GPUError::CorruptStream(record.kind))
    }

    /// Number of live commands of kind `kind`.
    pub fn count_of(&self, kind: CommandKind) -> usize {
        self.arenas[kind.index()].as_ref().map_or(0, |a| a.len())
    }

    pub(crate) fn begin_close(&self) -> Result<()> {
        self.expect_state(StreamState::Recording, "close")
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = StreamState::Closed;
    }

    pub(crate) fn mark_submitted(&mut self) -> Result<()> {
        self.expect_state(StreamState::Closed, "submit")?;
        self.state = StreamState::Submitted;
        Ok(())
    }

    pub(crate) fn mark_retired(&mut self) {
        if self.state == StreamState::Submitted {
            self.state = StreamState::Retired;
        }
    }

    /// Rewinds all arenas and the log. Backing storage is kept.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == StreamState::Submitted {
            return Err(GPUError::StreamInFlight);
        }

        self.log.clear();
        for arena in self.arenas.iter_mut().flatten() {
            arena.rewind();
        }
        self.aux.reset();
        self.state = StreamState::Recording;
        Ok(())
    }
}

impl fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStream")
            .field("queue_type", &self.info.queue_type)
            .field("state", &self.state)
            .field("commands", &self.log.len())
            .field("aux", &self.aux)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::*;
    use crate::utils::Handle;

    fn small(queue_type: QueueType) -> CommandStreamInfo {
        CommandStreamInfo {
            queue_type,
            command_capacity: 10,
            per_type_bytes: 256,
            aux_bytes: 256,
            growable: false,
        }
    }

    #[test]
    fn add_command_returns_default_slot() {
        let mut stream = CommandStream::new(&small(QueueType::Graphics));
        let draw = stream.add_command::<CmdDrawInstanced>().unwrap();
        assert_eq!(draw.instance_count, 1);
        draw.vertex_count_per_instance = 3;

        let rec = stream.records()[0];
        assert_eq!(rec.kind, CommandKind::DrawInstanced);
        assert_eq!(
            stream.command::<CmdDrawInstanced>(rec).unwrap().vertex_count_per_instance,
            3
        );
    }

    #[test]
    fn log_exhaustion_fails_fast() {
        let mut stream = CommandStream::new(&small(QueueType::Graphics));
        for _ in 0..10 {
            stream.record(CmdEndDebugMarker).unwrap();
        }
        assert!(matches!(
            stream.add_command::<CmdEndDebugMarker>(),
            Err(GPUError::CommandLogExhausted { capacity: 10 })
        ));
    }

    #[test]
    fn per_type_arena_is_sized_from_byte_budget() {
        let info = CommandStreamInfo {
            command_capacity: 100,
            per_type_bytes: std::mem::size_of::<CmdDispatch>() * 2,
            ..small(QueueType::Compute)
        };
        let mut stream = CommandStream::new(&info);
        stream.record(CmdDispatch::default()).unwrap();
        stream.record(CmdDispatch::default()).unwrap();
        assert!(matches!(
            stream.record(CmdDispatch::default()),
            Err(GPUError::CommandArenaExhausted {
                kind: CommandKind::Dispatch,
                capacity: 2
            })
        ));
        // Other kinds have their own budget.
        stream.record(CmdBindPipeline::default()).unwrap();
    }

    #[test]
    fn growable_stream_never_exhausts() {
        let info = CommandStreamInfo {
            growable: true,
            command_capacity: 1,
            per_type_bytes: 1,
            aux_bytes: 1,
            ..Default::default()
        };
        let mut stream = CommandStream::new(&info);
        for i in 0..50u32 {
            stream.record(CmdDispatch { x: i, y: 1, z: 1 }).unwrap();
            stream.emplace_aux(&[i; 4]).unwrap();
        }
        assert_eq!(stream.len(), 50);
        let last = stream.records()[49];
        assert_eq!(stream.command::<CmdDispatch>(last).unwrap().x, 49);
    }

    #[test]
    fn graphics_commands_rejected_on_transfer_stream() {
        let mut stream = CommandStream::new(&small(QueueType::Transfer));
        assert!(matches!(
            stream.add_command::<CmdDrawInstanced>(),
            Err(GPUError::IncompatibleCommand {
                kind: CommandKind::DrawInstanced,
                queue: QueueType::Transfer
            })
        ));
        stream.record(CmdCopyResource::default()).unwrap();
    }

    #[test]
    fn recording_after_close_fails() {
        let mut stream = CommandStream::new(&small(QueueType::Graphics));
        stream.record(CmdEndRenderPass).unwrap();
        stream.begin_close().unwrap();
        stream.mark_closed();

        assert!(matches!(
            stream.add_command::<CmdEndRenderPass>(),
            Err(GPUError::InvalidStreamState {
                state: StreamState::Closed,
                ..
            })
        ));
        assert!(stream.emplace_aux(&[1u8]).is_err());
        assert!(stream.begin_close().is_err());
    }

    #[test]
    fn reset_rewinds_without_leaking() {
        let mut stream = CommandStream::new(&small(QueueType::Graphics));
        stream
            .record(CmdBindPipeline {
                shader: Handle::new(3, 1),
            })
            .unwrap();
        let old = stream.emplace_aux(&[1u32, 2]).unwrap();
        stream.mark_closed();
        stream.mark_submitted().unwrap();
        assert!(matches!(stream.reset(), Err(GPUError::StreamInFlight)));
        stream.mark_retired();
        stream.reset().unwrap();

        assert!(stream.is_empty());
        assert_eq!(stream.state(), StreamState::Recording);
        assert!(stream.aux().get(old).is_err());
        let fresh = stream.add_command::<CmdBindPipeline>().unwrap();
        assert!(!fresh.shader.valid());
    }
}
