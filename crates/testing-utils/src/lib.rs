//! # Evaluator Testing Utils
//!
//! 测试共用的内存替身和数据构造器：
//!
//! - **Mocks**: 记录状态与结果调用的内存元数据 API
//! - **Builders**: harness、数据文件和提交压缩包的构造与暂存
//! - **Helpers**: 暂存字节、构造任务消息
//!
//! ```toml
//! [dev-dependencies]
//! evaluator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
