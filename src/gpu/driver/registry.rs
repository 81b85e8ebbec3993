//! Runtime type tags for recorded commands.
//!
//! Every command struct maps to exactly one [`CommandKind`]. The tag is the
//! key into a stream's per-type arenas and into a backend's dispatch table.

use std::any::TypeId;
use std::fmt;

use super::command::Command;

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    BeginRenderPass = 0,
    EndRenderPass = 1,
    SetViewport = 2,
    SetScissor = 3,
    BindPipeline = 4,
    BindVertexBuffer = 5,
    BindIndexBuffer = 6,
    BindDescriptorSets = 7,
    PushConstants = 8,
    DrawInstanced = 9,
    DrawIndexedInstanced = 10,
    Dispatch = 11,
    CopyResource = 12,
    CopyBuffer = 13,
    CopyBufferToTexture2D = 14,
    Barrier = 15,
    BeginDebugMarker = 16,
    EndDebugMarker = 17,
}

impl CommandKind {
    pub const COUNT: usize = 18;

    pub const ALL: [CommandKind; Self::COUNT] = [
        CommandKind::BeginRenderPass,
        CommandKind::EndRenderPass,
        CommandKind::SetViewport,
        CommandKind::SetScissor,
        CommandKind::BindPipeline,
        CommandKind::BindVertexBuffer,
        CommandKind::BindIndexBuffer,
        CommandKind::BindDescriptorSets,
        CommandKind::PushConstants,
        CommandKind::DrawInstanced,
        CommandKind::DrawIndexedInstanced,
        CommandKind::Dispatch,
        CommandKind::CopyResource,
        CommandKind::CopyBuffer,
        CommandKind::CopyBufferToTexture2D,
        CommandKind::Barrier,
        CommandKind::BeginDebugMarker,
        CommandKind::EndDebugMarker,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::BeginRenderPass => "BeginRenderPass",
            CommandKind::EndRenderPass => "EndRenderPass",
            CommandKind::SetViewport => "SetViewport",
            CommandKind::SetScissor => "SetScissor",
            CommandKind::BindPipeline => "BindPipeline",
            CommandKind::BindVertexBuffer => "BindVertexBuffer",
            CommandKind::BindIndexBuffer => "BindIndexBuffer",
            CommandKind::BindDescriptorSets => "BindDescriptorSets",
            CommandKind::PushConstants => "PushConstants",
            CommandKind::DrawInstanced => "DrawInstanced",
            CommandKind::DrawIndexedInstanced => "DrawIndexedInstanced",
            CommandKind::Dispatch => "Dispatch",
            CommandKind::CopyResource => "CopyResource",
            CommandKind::CopyBuffer => "CopyBuffer",
            CommandKind::CopyBufferToTexture2D => "CopyBufferToTexture2D",
            CommandKind::Barrier => "Barrier",
            CommandKind::BeginDebugMarker => "BeginDebugMarker",
            CommandKind::EndDebugMarker => "EndDebugMarker",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a command type: its dense tag plus the Rust type behind it.
///
/// Arenas remember the `TypeId` they were created for, so two structs that
/// claim the same tag are caught instead of aliasing each other's storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommandTypeId {
    pub kind: CommandKind,
    pub type_id: TypeId,
}

#[inline]
pub fn type_id<T: Command>() -> CommandTypeId {
    CommandTypeId {
        kind: T::KIND,
        type_id: TypeId::of::<T>(),
    }
}
