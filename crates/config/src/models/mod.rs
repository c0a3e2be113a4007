pub mod app_config;
pub mod logging;
pub mod message_queue;
pub mod metadata_api;
pub mod storage;
pub mod worker;

pub use app_config::*;
pub use logging::*;
pub use message_queue::*;
pub use metadata_api::*;
pub use storage::*;
pub use worker::*;
