//! 改写管道模块
//!
//! 提供文本处理管道，包括提取、分批、提示词构造和注入

pub mod batch;
pub mod extractor;
pub mod injector;
pub mod prompts;

// 重新导出主要类型
pub use batch::{Batch, BatchPlan};
pub use extractor::{detect_rtl, extract, is_rtl_language, ParsedDocument};
pub use injector::{inject, inject_with_report, InjectionReport};
pub use prompts::build_messages;
