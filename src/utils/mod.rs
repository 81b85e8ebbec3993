pub mod handle;
pub mod per_frame;
pub mod resource_list;

pub use handle::{Handle, Pool};
pub use per_frame::PerFrame;
pub use resource_list::ResourceList;
