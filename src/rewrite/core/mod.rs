//! 改写系统核心模块
//!
//! - **服务层** (`service.rs`): 协调提取、缓存、生成调用和注入，汇总统计

pub mod service;

pub use service::{CancelFlag, RewriteService};
