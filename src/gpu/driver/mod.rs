pub mod command;
pub mod registry;
pub mod types;

pub use command::*;
pub use registry::{type_id, CommandKind, CommandTypeId};
pub use types::*;
