//! Command recording, dispatch and submission on top of a pluggable
//! [`Backend`].
//!
//! # Examples
//! ```
//! use kombu::gpu::*;
//! use kombu::gpu::software::SoftwareDevice;
//!
//! let mut ctx = Context::new(SoftwareDevice::default(), &ContextInfo::default()).unwrap();
//! let stream = ctx
//!     .create_command_stream(&CommandStreamInfo::for_queue(QueueType::Graphics))
//!     .unwrap();
//! ctx.add_command::<CmdDispatch>(stream).unwrap().x = 8;
//! ctx.close_command_streams(&[stream]).unwrap();
//! let queue = ctx.queue(QueueType::Graphics).unwrap();
//! ctx.submit_command_streams(queue, &[stream], &SubmitInfo::default()).unwrap();
//! ctx.join().unwrap();
//! ctx.destroy();
//! ```

pub mod backend;
pub mod cmd;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod execution;
pub mod resources;
pub mod software;
pub mod structs;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use backend::{Backend, NativeDescriptor, NativeDescriptorWrite};
pub use cmd::{AuxMemory, AuxSlice, CommandRecord, CommandStream, CommandStreamInfo, StreamState};
pub use config::{ContextInfo, LogCallback};
pub use context::Context;
pub use driver::*;
pub use error::*;
pub use execution::{DispatchContext, DispatchTable};
pub use resources::Resources;
pub use structs::*;

// Marker types naming what a `Handle` refers to.
#[derive(Debug)]
pub enum Buffer {}
#[derive(Debug)]
pub enum Texture {}
#[derive(Debug)]
pub enum Sampler {}
#[derive(Debug)]
pub enum Shader {}
#[derive(Debug)]
pub enum PipelineLayout {}
#[derive(Debug)]
pub enum DescriptorSet {}
#[derive(Debug)]
pub enum Semaphore {}
#[derive(Debug)]
pub enum Swapchain {}
#[derive(Debug)]
pub enum Queue {}
