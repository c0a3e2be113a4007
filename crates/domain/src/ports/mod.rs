pub mod messaging;
pub mod metadata;
pub mod storage;

pub use messaging::*;
pub use metadata::*;
pub use storage::*;
