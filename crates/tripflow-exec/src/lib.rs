pub mod config;
pub mod contracts;
pub mod routing;
pub mod runner;
pub mod simulated;

pub use config::*;
pub use contracts::*;
pub use routing::*;
pub use runner::*;
pub use simulated::*;
