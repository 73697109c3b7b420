pub mod config;
pub mod errors;
pub mod logging;
pub mod sweeper;

pub use config::*;
pub use errors::*;
pub use sweeper::{run_sweep_loop, Sweeper};
