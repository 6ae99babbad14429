//! Background process management
//!
//! - `supervisor` - registry of background processes, start/list/kill
//! - `shutdown` - SIGINT/SIGTERM hook that kills every tracked process group

pub mod shutdown;
pub mod supervisor;

pub use shutdown::install_shutdown_hook;
pub use supervisor::{ProcessRecord, ProcessSupervisor, SupervisorError};
