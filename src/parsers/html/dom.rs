//! 基础DOM操作
//!
//! 解析、清理以及节点读写的辅助函数。所有函数都作用于 `markup5ever_rcdom` 的句柄，
//! 提取和注入两个阶段共享这些函数，保证二者看到的是同一棵树的同一种视图。

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

use html5ever::parse_document;
use html5ever::tendril::{StrTendril, TendrilSink};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};
use regex::{Captures, Regex};

/// 需要自闭合的空元素（清理阶段使用）
pub const VOID_ELEMENTS: &[&str] = &["img", "br", "hr", "meta", "input", "link"];

/// 内容不参与改写的元素
pub const SKIP_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "code", "pre", "svg", "math", "iframe", "object",
    "canvas", "textarea",
];

/// 将 HTML 字符串解析为 DOM
///
/// html5ever 本身是容错的，调用方应先用 [`check_markup`] 判断输入是否可以安全解析。
pub fn html_to_dom(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

/// 检查标记中会导致内容静默丢失的缺陷
///
/// 返回 `Err(原因)` 表示输入在解析后无法可靠地还原：
/// - 含有空字节（解析器会替换为 U+FFFD）
/// - 存在未闭合的标签（解析器会在 EOF 处丢弃整个标签）
pub fn check_markup(html: &str) -> Result<(), String> {
    if html.contains('\0') {
        return Err("文档包含空字节".to_string());
    }

    let bytes = html.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        let rest = &html[i..];

        // 注释整体跳过
        if rest.starts_with("<!--") {
            match rest[4..].find("-->") {
                Some(end) => {
                    i += 4 + end + 3;
                    continue;
                }
                None => return Err(format!("第 {} 字节处的注释未闭合", i)),
            }
        }

        let next = bytes.get(i + 1).copied().unwrap_or(b' ');
        if !(next.is_ascii_alphabetic() || next == b'/' || next == b'!') {
            i += 1;
            continue;
        }

        let tag_end = match find_tag_end(&bytes[i..]) {
            Some(end) => i + end,
            None => return Err(format!("第 {} 字节处的标签未闭合", i)),
        };

        // script/style 为原始文本，跳到对应的结束标签
        let tag_name = leading_tag_name(&html[i + 1..tag_end]);
        i = tag_end + 1;
        if tag_name == "script" || tag_name == "style" {
            let closing = format!("</{}", tag_name);
            match html[i..].to_ascii_lowercase().find(&closing) {
                Some(offset) => i += offset,
                None => return Err(format!("<{}> 元素未闭合", tag_name)),
            }
        }
    }

    Ok(())
}

/// 在标签内部寻找结束的 `>`，忽略引号中的内容
fn find_tag_end(tag: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;

    for (offset, &byte) in tag.iter().enumerate().skip(1) {
        match quote {
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None if byte == b'"' || byte == b'\'' => quote = Some(byte),
            None if byte == b'>' => return Some(offset),
            None => {}
        }
    }

    None
}

fn leading_tag_name(tag_body: &str) -> String {
    tag_body
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// 尽力清理常见的标记问题
///
/// 去除空字节，自闭合未闭合的空元素，并为未加引号的属性值加上引号。
pub fn sanitize_html(html: &str) -> String {
    static VOID_RE: OnceLock<Regex> = OnceLock::new();
    static TAG_RE: OnceLock<Regex> = OnceLock::new();

    let cleaned = html.replace('\0', "");

    let void_re = VOID_RE.get_or_init(|| {
        let pattern = format!(r"(?i)<({})(\s[^<>]*?)?\s*/?>", VOID_ELEMENTS.join("|"));
        Regex::new(&pattern).expect("空元素正则表达式无效")
    });
    let cleaned = void_re.replace_all(&cleaned, |caps: &Captures| {
        format!("<{}{}/>", &caps[1], caps.get(2).map_or("", |m| m.as_str()))
    });

    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"<[a-zA-Z][^<>]*>").expect("标签正则表达式无效"));

    tag_re
        .replace_all(&cleaned, |caps: &Captures| quote_attribute_values(&caps[0]))
        .into_owned()
}

/// 为标签内未加引号的属性值加上双引号，已加引号的值保持不变
fn quote_attribute_values(tag: &str) -> String {
    let chars: Vec<char> = tag.chars().collect();
    let mut out = String::with_capacity(tag.len() + 8);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            out.push(c);
            i += 1;
            continue;
        }

        if c == '"' || c == '\'' {
            quote = Some(c);
            out.push(c);
            i += 1;
            continue;
        }

        let unquoted_value = c == '='
            && chars
                .get(i + 1)
                .is_some_and(|next| !next.is_whitespace() && !matches!(next, '"' | '\'' | '>'));

        if !unquoted_value {
            out.push(c);
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while end < chars.len() && !chars[end].is_whitespace() && chars[end] != '>' {
            end += 1;
        }
        // `/>` 中的斜杠属于标签本身
        if end < chars.len() && chars[end] == '>' && end > start + 1 && chars[end - 1] == '/' {
            end -= 1;
        }

        out.push_str("=\"");
        out.extend(&chars[start..end]);
        out.push('"');
        i = end;
    }

    out
}

/// 根据名称获取子节点
pub fn get_child_node_by_name(parent: &Handle, node_name: &str) -> Option<Handle> {
    let children = parent.children.borrow();
    let matching_children = children.iter().find(|child| match child.data {
        NodeData::Element { ref name, .. } => &*name.local == node_name,
        _ => false,
    });
    matching_children.cloned()
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            for attr in attrs.borrow().iter() {
                if &*attr.name.local == attr_name {
                    return Some(attr.value.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 获取节点的 class 列表
pub fn get_class_names(node: &Handle) -> Vec<String> {
    get_node_attr(node, "class")
        .map(|classes| classes.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// 获取父节点
///
/// `parent` 字段是 `Cell<Option<Weak<Node>>>`，读取时必须放回原值。
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|node| node.upgrade());
    child.parent.set(weak);
    parent
}

/// 是否为文本节点
pub fn is_text(node: &Handle) -> bool {
    matches!(node.data, NodeData::Text { .. })
}

/// 读取文本节点内容
pub fn text_of(node: &Handle) -> Option<String> {
    match node.data {
        NodeData::Text { ref contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// 替换文本节点内容，保留原文本首尾空白
pub fn replace_text(node: &Handle, replacement: &str) -> bool {
    if let NodeData::Text { ref contents } = node.data {
        let mut content_ref = contents.borrow_mut();
        let original = content_ref.to_string();
        let (leading, trailing) = surrounding_whitespace(&original);

        content_ref.clear();
        content_ref.push_slice(leading);
        content_ref.push_slice(replacement.trim());
        content_ref.push_slice(trailing);
        true
    } else {
        false
    }
}

/// 只替换文本节点中第一次出现的 `needle`，其余内容原样保留
pub fn replace_text_span(node: &Handle, needle: &str, replacement: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    if let NodeData::Text { ref contents } = node.data {
        let mut content_ref = contents.borrow_mut();
        let original = content_ref.to_string();
        let Some(start) = original.find(needle) else {
            return false;
        };

        content_ref.clear();
        content_ref.push_slice(&original[..start]);
        content_ref.push_slice(replacement.trim());
        content_ref.push_slice(&original[start + needle.len()..]);
        true
    } else {
        false
    }
}

/// 元素的全部后代中是否有非空文本
pub fn has_text_descendant(node: &Handle) -> bool {
    node.children.borrow().iter().any(|child| match child.data {
        NodeData::Text { ref contents } => !contents.borrow().trim().is_empty(),
        _ => has_text_descendant(child),
    })
}

/// 用单个文本节点替换元素的全部子节点
pub fn set_text_content(element: &Handle, text: &str) {
    let text_node = Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    });
    text_node.parent.set(Some(Rc::downgrade(element)));

    let mut children = element.children.borrow_mut();
    for child in children.iter() {
        child.parent.set(None);
    }
    children.clear();
    children.push(text_node);
}

fn surrounding_whitespace(text: &str) -> (&str, &str) {
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len();
    if start >= end {
        return (&text[..start], "");
    }
    (&text[..start], &text[end..])
}
