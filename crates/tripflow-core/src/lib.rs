pub mod applier;
pub mod document;
pub mod patcher;
pub mod persistence;
pub mod reducer;
pub mod tool_registry;

pub use applier::*;
pub use document::*;
pub use patcher::*;
pub use persistence::*;
pub use reducer::*;
pub use tool_registry::*;
