//! 文本片段提取器
//!
//! 深度优先遍历文档，为每个足够长的文本节点计算结构化地址和书写方向。
//!
//! ## 文档级校验
//!
//! 1. 去除首尾空白后短于 [`constants::MIN_DOCUMENT_BYTES`] 时返回 `EmptyInput`
//! 2. 超过 [`constants::MAX_DOCUMENT_BYTES`] 时返回 `TooLarge`
//! 3. 标记有缺陷时先清理再检查一次，仍失败返回 `MalformedInput`
//!
//! 单个片段的地址计算失败不会中断提取，只会退化为低精度地址。

use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::parsers::html::{
    check_markup, get_class_names, get_node_attr, get_node_name, html_to_dom, sanitize_html,
    Address, DocumentShape, SKIP_ELEMENTS,
};
use crate::rewrite::config::constants;
use crate::rewrite::error::helpers::excerpt;
use crate::rewrite::error::DocumentError;
use crate::rewrite::models::Fragment;

/// 通过校验的已解析文档
pub struct ParsedDocument {
    pub dom: RcDom,
    pub shape: DocumentShape,
    /// 是否经过了清理
    pub sanitized: bool,
}

/// 从文档中提取片段
pub fn extract(document: &str, min_text_length: usize) -> Result<Vec<Fragment>, DocumentError> {
    check_size(document)?;
    let parsed = parse_checked(document)?;
    Ok(collect_fragments(&parsed.dom, min_text_length))
}

/// 检查文档大小
pub fn check_size(document: &str) -> Result<(), DocumentError> {
    if document.trim().len() < constants::MIN_DOCUMENT_BYTES {
        return Err(DocumentError::EmptyInput);
    }
    if document.len() > constants::MAX_DOCUMENT_BYTES {
        return Err(DocumentError::TooLarge {
            size: document.len(),
            max: constants::MAX_DOCUMENT_BYTES,
        });
    }
    Ok(())
}

/// 解析文档，标记有缺陷时清理后重试一次
pub fn parse_checked(document: &str) -> Result<ParsedDocument, DocumentError> {
    let shape = DocumentShape::detect(document);

    if check_markup(document).is_ok() {
        return Ok(ParsedDocument {
            dom: html_to_dom(document),
            shape,
            sanitized: false,
        });
    }

    let cleaned = sanitize_html(document);
    match check_markup(&cleaned) {
        Ok(()) => {
            tracing::debug!("文档经清理后可以解析");
            Ok(ParsedDocument {
                dom: html_to_dom(&cleaned),
                shape,
                sanitized: true,
            })
        }
        Err(reason) => Err(DocumentError::MalformedInput {
            reason,
            excerpt: excerpt(document, constants::EXCERPT_CHARS),
        }),
    }
}

/// 从已解析的 DOM 收集片段
pub fn collect_fragments(dom: &RcDom, min_text_length: usize) -> Vec<Fragment> {
    let mut collector = FragmentCollector {
        min_text_length,
        ancestors: vec![dom.document.clone()],
        fragments: Vec::new(),
    };
    collector.walk_children(&dom.document);

    tracing::debug!("提取到 {} 个文本片段", collector.fragments.len());
    collector.fragments
}

struct FragmentCollector {
    min_text_length: usize,
    /// 文档节点加上当前路径上的各级元素
    ancestors: Vec<Handle>,
    fragments: Vec<Fragment>,
}

impl FragmentCollector {
    fn walk_children(&mut self, node: &Handle) {
        let children = node.children.borrow().clone();
        for child in &children {
            self.walk(child);
        }
    }

    fn walk(&mut self, node: &Handle) {
        match node.data {
            NodeData::Text { ref contents } => {
                let text = contents.borrow();
                let trimmed = text.trim();
                if !trimmed.is_empty() && trimmed.chars().count() >= self.min_text_length {
                    let fragment = self.fragment_for(trimmed);
                    self.fragments.push(fragment);
                }
            }
            NodeData::Element { ref name, .. } => {
                if is_skipped(&name.local) {
                    return;
                }
                self.ancestors.push(node.clone());
                self.walk_children(node);
                self.ancestors.pop();
            }
            // 注释、doctype、处理指令
            _ => {}
        }
    }

    fn fragment_for(&self, text: &str) -> Fragment {
        match Address::from_chain(&self.ancestors) {
            Ok(address) => Fragment::new(text, address.to_string(), detect_rtl(&self.ancestors)),
            Err(e) => {
                let parent_tag = self.ancestors.last().and_then(get_node_name);
                let address = Address::fallback(parent_tag);
                tracing::warn!("地址计算失败，使用低精度地址 {}: {}", address, e);
                Fragment::new(text, address.to_string(), false)
            }
        }
    }
}

fn is_skipped(tag: &str) -> bool {
    SKIP_ELEMENTS.iter().any(|skip| tag.eq_ignore_ascii_case(skip))
}

/// 判断文本的书写方向
///
/// `ancestors` 的最后一个元素是文本所在的元素。依次检查：
/// 1. 最近的显式 `dir` 属性（`auto` 继续向上查找）
/// 2. 所在元素或其父元素的 `lang` 属性
/// 3. 所在元素含有 `rtl` 的 class
pub fn detect_rtl(ancestors: &[Handle]) -> bool {
    for node in ancestors.iter().rev() {
        if let Some(dir) = get_node_attr(node, "dir") {
            match dir.trim().to_ascii_lowercase().as_str() {
                "rtl" => return true,
                "ltr" => return false,
                _ => {}
            }
        }
    }

    for node in ancestors.iter().rev().take(2) {
        if get_node_attr(node, "lang").is_some_and(|lang| is_rtl_language(&lang)) {
            return true;
        }
    }

    ancestors.last().is_some_and(|element| {
        get_class_names(element)
            .iter()
            .any(|class| class.to_ascii_lowercase().contains("rtl"))
    })
}

/// 语言标签的主子标签是否属于从右到左的语言
pub fn is_rtl_language(lang: &str) -> bool {
    let primary = lang
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    constants::RTL_LANGUAGES.contains(&primary.as_str())
}
