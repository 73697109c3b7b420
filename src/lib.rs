pub mod app;
pub mod demo;
pub mod shutdown;

pub use app::Engine;
pub use shutdown::ShutdownManager;
