//! Persistence side of the TCC coordinator
//!
//! - [`TransactionStore`]: pluggable storage port, with in-memory and SQLite adapters
//! - [`Serializer`]: pluggable codec for opaque payloads (JSON, YAML)
//! - [`EventPublisher`]: bounded, sharded, asynchronous write pipeline
//! - [`ParticipantCache`]: bounded LRU of participant lists
//! - [`TransactionRepository`]: facade combining the three

pub mod cache;
pub mod error;
pub mod event;
pub mod publisher;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod serializer;
pub mod sqlite_store;
pub mod store;
pub mod testing;

pub use cache::{CacheStats, ParticipantCache};
pub use error::{PublishError, RepositoryError};
pub use event::{EventKind, RepositoryEvent};
pub use publisher::{DrainReport, EventPublisher, PipelineStats};
pub use registry::{SerializerRegistry, StoreRegistry};
pub use repository::TransactionRepository;
pub use retry::RetryPolicy;
pub use serializer::{JsonSerializer, SerializeError, Serializer, YamlSerializer};
pub use sqlite_store::SqliteStore;
pub use store::{InMemoryStore, StoreError, TransactionStore};
