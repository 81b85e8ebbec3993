use std::fmt;

use super::cmd::StreamState;
use super::driver::{CommandKind, CommandTypeId};
use super::{HeapType, QueueType};

#[cfg(feature = "vulkan")]
#[derive(Debug)]
pub struct VulkanError {
    res: ash::vk::Result,
}

#[cfg(feature = "vulkan")]
impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan Error: {}", self.res)
    }
}

#[derive(Debug)]
pub enum GPUError {
    #[cfg(feature = "vulkan")]
    VulkanError(VulkanError),
    #[cfg(feature = "vulkan")]
    LoadingError(ash::LoadingError),
    /// A registry ran out of handle slots.
    SlotError(),
    InvalidHandle(&'static str),
    Configuration(String),
    Unsupported(&'static str),
    CommandLogExhausted {
        capacity: usize,
    },
    CommandArenaExhausted {
        kind: CommandKind,
        capacity: usize,
    },
    AuxMemoryExhausted {
        requested: usize,
        available: usize,
    },
    UnsupportedAlignment {
        align: usize,
    },
    /// An aux slice was resolved against the wrong stream or after a reset.
    StaleAuxSlice,
    CommandTypeMismatch {
        kind: CommandKind,
        expected: CommandTypeId,
        found: CommandTypeId,
    },
    CorruptStream(CommandKind),
    UnregisteredCommand(CommandKind),
    IncompatibleCommand {
        kind: CommandKind,
        queue: QueueType,
    },
    IncompatibleQueue {
        stream: QueueType,
        queue: QueueType,
    },
    InvalidStreamState {
        operation: &'static str,
        state: StreamState,
    },
    StreamInFlight,
    /// Encoder-level validation failure, such as a draw outside a render pass.
    InvalidCommand {
        kind: CommandKind,
        reason: &'static str,
    },
    FrameState(&'static str),
    NonMonotonicSignal {
        current: u64,
        requested: u64,
    },
    /// No submission signals the semaphore to the requested value.
    SemaphoreNeverSignaled {
        requested: u64,
        pending: u64,
    },
    HostAccessDenied(HeapType),
    OutOfBounds {
        offset: u64,
        size: u64,
        capacity: u64,
    },
    SwapchainOutOfDate,
    NoImageAcquired,
    DeviceLost,
    Backend(String),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

impl fmt::Display for GPUError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "vulkan")]
            GPUError::VulkanError(e) => write!(f, "{}", e),
            #[cfg(feature = "vulkan")]
            GPUError::LoadingError(e) => write!(f, "failed to load Vulkan: {}", e),
            GPUError::SlotError() => write!(f, "Ran out of slots!"),
            GPUError::InvalidHandle(what) => write!(f, "invalid or stale {} handle", what),
            GPUError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            GPUError::Unsupported(what) => write!(f, "unsupported: {}", what),
            GPUError::CommandLogExhausted { capacity } => {
                write!(f, "command log exhausted ({} commands)", capacity)
            }
            GPUError::CommandArenaExhausted { kind, capacity } => {
                write!(f, "{} arena exhausted ({} slots)", kind, capacity)
            }
            GPUError::AuxMemoryExhausted {
                requested,
                available,
            } => write!(
                f,
                "aux memory exhausted: requested {} bytes, {} available",
                requested, available
            ),
            GPUError::UnsupportedAlignment { align } => {
                write!(f, "aux memory cannot align to {} bytes", align)
            }
            GPUError::StaleAuxSlice => write!(f, "aux slice does not belong to this stream cycle"),
            GPUError::CommandTypeMismatch { kind, .. } => {
                write!(f, "two command types share the {} tag", kind)
            }
            GPUError::CorruptStream(kind) => write!(f, "corrupt {} record in command log", kind),
            GPUError::UnregisteredCommand(kind) => {
                write!(f, "no handler registered for {}", kind)
            }
            GPUError::IncompatibleCommand { kind, queue } => {
                write!(f, "{} cannot be recorded on a {:?} stream", kind, queue)
            }
            GPUError::IncompatibleQueue { stream, queue } => write!(
                f,
                "a {:?} stream cannot be submitted to a {:?} queue",
                stream, queue
            ),
            GPUError::InvalidStreamState { operation, state } => {
                write!(f, "cannot {} a stream in the {:?} state", operation, state)
            }
            GPUError::StreamInFlight => write!(f, "command stream is still in flight"),
            GPUError::InvalidCommand { kind, reason } => write!(f, "{}: {}", kind, reason),
            GPUError::FrameState(msg) => write!(f, "frame error: {}", msg),
            GPUError::NonMonotonicSignal { current, requested } => write!(
                f,
                "semaphore signal {} does not exceed pending value {}",
                requested, current
            ),
            GPUError::SemaphoreNeverSignaled { requested, pending } => write!(
                f,
                "semaphore value {} is never signaled (highest pending signal is {})",
                requested, pending
            ),
            GPUError::HostAccessDenied(heap) => {
                write!(f, "{:?} memory is not host visible", heap)
            }
            GPUError::OutOfBounds {
                offset,
                size,
                capacity,
            } => write!(
                f,
                "range {}..{} exceeds resource size {}",
                offset,
                offset + size,
                capacity
            ),
            GPUError::SwapchainOutOfDate => write!(f, "swapchain is out of date"),
            GPUError::NoImageAcquired => write!(f, "no swapchain image acquired this frame"),
            GPUError::DeviceLost => write!(f, "device lost"),
            GPUError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for GPUError {}

#[cfg(feature = "vulkan")]
impl From<ash::vk::Result> for GPUError {
    fn from(res: ash::vk::Result) -> Self {
        match res {
            ash::vk::Result::ERROR_DEVICE_LOST => GPUError::DeviceLost,
            ash::vk::Result::ERROR_OUT_OF_DATE_KHR => GPUError::SwapchainOutOfDate,
            _ => GPUError::VulkanError(VulkanError { res }),
        }
    }
}

#[cfg(feature = "vulkan")]
impl From<ash::LoadingError> for GPUError {
    fn from(res: ash::LoadingError) -> Self {
        GPUError::LoadingError(res)
    }
}
