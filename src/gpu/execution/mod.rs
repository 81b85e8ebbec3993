pub mod command_dispatch;
pub mod command_ring;
pub mod queue;
pub mod retire;

pub use command_dispatch::*;
pub use command_ring::*;
pub use queue::*;
pub use retire::*;
