use std::io;

use html5ever::serialize::{serialize, SerializeOpts};
use markup5ever_rcdom::{Handle, RcDom, SerializableHandle};

use super::dom::get_child_node_by_name;

/// 输入文档的形态
///
/// html5ever 总是补全 `html/head/body`，片段输入需要在序列化时去掉这些补全的外壳。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// 完整文档（带有 doctype、html、head 或 body 标签）
    Full,
    /// HTML 片段
    Fragment,
}

impl DocumentShape {
    pub fn detect(html: &str) -> Self {
        let lowered = html.to_ascii_lowercase();
        if ["<!doctype", "<html", "<head", "<body"]
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            DocumentShape::Full
        } else {
            DocumentShape::Fragment
        }
    }
}

/// 序列化文档
pub fn serialize_document(dom: &RcDom, shape: DocumentShape) -> io::Result<String> {
    match shape {
        DocumentShape::Full => serialize_children(&dom.document),
        DocumentShape::Fragment => {
            let mut out = String::new();
            if let Some(html) = get_child_node_by_name(&dom.document, "html") {
                // 片段中的 title、meta 等会被放进 head
                for name in ["head", "body"] {
                    if let Some(section) = get_child_node_by_name(&html, name) {
                        out.push_str(&serialize_children(&section)?);
                    }
                }
            }
            Ok(out)
        }
    }
}

/// 序列化节点的全部子节点
pub fn serialize_children(node: &Handle) -> io::Result<String> {
    let mut buf: Vec<u8> = Vec::new();
    let serializable: SerializableHandle = node.clone().into();
    serialize(&mut buf, &serializable, SerializeOpts::default())?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
