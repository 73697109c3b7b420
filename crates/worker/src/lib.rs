pub mod cancellation_handler;
pub mod executor_pool;
pub mod running_registry;
pub mod subtask_dispatcher;
pub mod watchdog;

pub use cancellation_handler::SubtaskCancellationHandler;
pub use executor_pool::{ExecutorPool, ExecutorPools, PoolSlot};
pub use running_registry::RunningRegistry;
pub use subtask_dispatcher::{ClaimedSubtask, SubtaskDispatcher};
pub use watchdog::SubtaskWatchdog;
