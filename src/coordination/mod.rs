//! Runtime coordination
//!
//! Routing of records to robot partitions, supervised partition workers,
//! the concurrent runtime wiring and graceful shutdown.

pub mod router;
pub mod runtime;
pub mod shutdown;
pub mod worker;

pub use router::{partition_for, RecordRouter};
pub use runtime::Coordinator;
pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal,
};
pub use worker::PartitionWorker;
