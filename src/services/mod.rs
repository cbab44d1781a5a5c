pub mod broker;
pub mod ingest;
pub mod metadata;
pub mod metrics;
pub mod storage;

pub use broker::{EventPublisher, EventStream, InMemoryBroker, RedisBroker};
pub use ingest::UploadCoordinator;
pub use metadata::{InMemoryMetadataStore, MetadataStore, MongoMetadataStore, StatusChange};
pub use metrics::{get_metrics, init_metrics};
pub use storage::{BlobStore, InMemoryBlobStore, LocalBlobStore};
