//! Coordinator runtime for TCC/TAC distributed transactions
//!
//! Wires the persistence layer from `tcc-repository` to a recovery scheduler
//! that drives stuck transactions to completion through an
//! [`InvocationExecutor`], and owns startup and shutdown of the whole stack.

pub mod bootstrap;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod recovery;
pub mod testing;

pub use bootstrap::{init_logging, Coordinator};
pub use error::{InitializationError, InvocationError, LifecycleError, RecoveryError};
pub use executor::InvocationExecutor;
pub use lifecycle::{Closeable, PipelineCloser, Registry, ShutdownHook, StoreCloser};
pub use recovery::{RecoveryAlert, RecoveryReport, RecoveryScheduler};
