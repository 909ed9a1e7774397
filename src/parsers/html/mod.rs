//! HTML解析和处理模块
//!
//! - `dom`: 解析、清理和基础DOM操作
//! - `address`: 片段的结构化地址（提取与注入共用）
//! - `serializer`: 序列化功能

pub mod address;
pub mod dom;
pub mod serializer;

pub use address::{is_suffix_compatible, Address, Qualifier, Segment, SEPARATOR};
pub use dom::{
    check_markup, get_child_node_by_name, get_class_names, get_node_attr, get_node_name,
    get_parent_node, has_text_descendant, html_to_dom, replace_text, replace_text_span,
    sanitize_html, set_text_content, text_of, SKIP_ELEMENTS, VOID_ELEMENTS,
};
pub use serializer::{serialize_children, serialize_document, DocumentShape};
