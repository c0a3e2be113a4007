pub mod in_memory_queue;
pub mod message_queue_factory;
pub mod metadata_client;
pub mod redis_stream;
pub mod storage;

pub use in_memory_queue::InMemoryLeaseQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use metadata_client::HttpMetadataClient;
pub use redis_stream::RedisStreamLeaseQueue;
pub use storage::ObjectStoreStager;
