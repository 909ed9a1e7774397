//! 片段注入器
//!
//! 重新解析原文档，按地址把片段文本写回。分两轮：
//!
//! 1. **地址定位**：先按完整地址从文档根逐段匹配；失败时只用最后一段搜索全文，
//!    多个候选时只保留简化地址与原地址后缀兼容的元素。
//!    同一地址可能对应多个元素（共享 class 的兄弟），依次查找原文相同的直接文本子节点。
//! 2. **内容回退**：第一轮没有定位到的片段，按原始文本指纹在剩余文本节点中按文档顺序查找。
//!
//! 文本只写入原文匹配的节点，已写入的文本节点不会被第二个片段再次占用。

use std::collections::HashSet;

use markup5ever_rcdom::{Handle, Node, NodeData};

use super::extractor::parse_checked;
use crate::parsers::html::{
    has_text_descendant, is_suffix_compatible, replace_text, replace_text_span,
    serialize_document, set_text_content, text_of, Address, Segment, SKIP_ELEMENTS,
};
use crate::rewrite::config::constants;
use crate::rewrite::error::helpers::excerpt;
use crate::rewrite::error::DocumentError;
use crate::rewrite::models::Fragment;

/// 注入结果
#[derive(Debug, Clone, Default)]
pub struct InjectionReport {
    pub html: String,
    /// 按地址写回的片段数
    pub by_address: usize,
    /// 在回退轮写回的片段数
    pub by_content: usize,
    /// 两轮都没有定位到的片段地址
    pub unresolved: Vec<String>,
}

/// 注入片段并返回新文档
pub fn inject(document: &str, fragments: &[Fragment], strict: bool) -> Result<String, DocumentError> {
    inject_with_report(document, fragments, strict).map(|report| report.html)
}

/// 注入片段并返回详细结果
///
/// 非严格模式下无法定位的片段只记录在 `unresolved` 中；严格模式下返回 `NodeNotFound` 或 `InvalidAddress`。
pub fn inject_with_report(
    document: &str,
    fragments: &[Fragment],
    strict: bool,
) -> Result<InjectionReport, DocumentError> {
    let parsed = parse_checked(document)?;
    let root = parsed.dom.document.clone();

    let mut claimed = Claimed::default();
    let mut report = InjectionReport::default();
    let mut pending: Vec<&Fragment> = Vec::new();

    for fragment in fragments {
        let address = match fragment.address.parse::<Address>() {
            Ok(address) => address,
            Err(e) if strict => return Err(e),
            Err(e) => {
                tracing::debug!("{}，改用内容匹配", e);
                pending.push(fragment);
                continue;
            }
        };

        let candidates = resolve_all(&root, &address);
        if write_into_candidates(&candidates, fragment, &mut claimed) {
            report.by_address += 1;
        } else if strict {
            return Err(DocumentError::NodeNotFound {
                address: fragment.address.clone(),
            });
        } else {
            pending.push(fragment);
        }
    }

    if !pending.is_empty() {
        let mut text_nodes = Vec::new();
        collect_text_nodes(&root, &mut text_nodes);

        for fragment in pending {
            if write_by_content(&text_nodes, fragment, &mut claimed) {
                report.by_content += 1;
            } else {
                tracing::warn!("无法定位片段: {}", fragment.address);
                report.unresolved.push(fragment.address.clone());
            }
        }
    }

    report.html = serialize_document(&parsed.dom, parsed.shape).map_err(|e| {
        DocumentError::MalformedInput {
            reason: format!("序列化失败: {}", e),
            excerpt: excerpt(document, constants::EXCERPT_CHARS),
        }
    })?;

    tracing::debug!(
        "注入完成: 地址定位 {}，内容匹配 {}，未定位 {}",
        report.by_address,
        report.by_content,
        report.unresolved.len()
    );
    Ok(report)
}

/// 已被写入的节点（按指针识别）
#[derive(Default)]
struct Claimed(HashSet<*const Node>);

impl Claimed {
    fn contains(&self, node: &Handle) -> bool {
        self.0.contains(&std::rc::Rc::as_ptr(node))
    }

    fn insert(&mut self, node: &Handle) {
        self.0.insert(std::rc::Rc::as_ptr(node));
    }
}

/// 解析地址对应的全部元素（文档顺序）
pub fn resolve_all(root: &Handle, address: &Address) -> Vec<Handle> {
    let exact = resolve_exact(root, address.segments());
    if exact.is_empty() {
        resolve_relaxed(root, address)
    } else {
        exact
    }
}

fn resolve_exact(root: &Handle, segments: &[Segment]) -> Vec<Handle> {
    if segments.is_empty() {
        return Vec::new();
    }
    let mut current = vec![root.clone()];
    for segment in segments {
        current = current
            .iter()
            .flat_map(|parent| {
                parent
                    .children
                    .borrow()
                    .iter()
                    .filter(|child| segment.matches(child, Some(parent)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        if current.is_empty() {
            break;
        }
    }
    current
}

/// 只用最后一段在全文中搜索
fn resolve_relaxed(root: &Handle, address: &Address) -> Vec<Handle> {
    let Some(last) = address.last() else {
        return Vec::new();
    };
    let mut candidates = Vec::new();
    let mut path = Vec::new();
    find_candidates(root, last, &mut path, &mut candidates);

    if candidates.len() == 1 {
        return candidates.into_iter().map(|(element, _)| element).collect();
    }

    let original = address.simplified();
    candidates
        .into_iter()
        .filter(|(_, simplified)| {
            let simplified: Vec<&str> = simplified.iter().map(String::as_str).collect();
            is_suffix_compatible(&simplified, &original)
        })
        .map(|(element, _)| element)
        .collect()
}

/// 深度优先收集匹配段的元素及其简化地址
fn find_candidates(
    node: &Handle,
    segment: &Segment,
    path: &mut Vec<String>,
    out: &mut Vec<(Handle, Vec<String>)>,
) {
    let children = node.children.borrow();
    for child in children.iter() {
        if let NodeData::Element { ref name, .. } = child.data {
            path.push((&*name.local).to_ascii_lowercase());
            if segment.matches(child, Some(node)) {
                out.push((child.clone(), path.clone()));
            }
            find_candidates(child, segment, path, out);
            path.pop();
        }
    }
}

/// 写入地址定位到的元素
///
/// 依次在各候选元素中查找原文相同且未占用的直接文本子节点。
/// 都没有时，只有完全不含文本的元素才会被整体设置文本内容。
fn write_into_candidates(candidates: &[Handle], fragment: &Fragment, claimed: &mut Claimed) -> bool {
    let wanted = fingerprint(&fragment.original);

    let matching_child = if wanted.is_empty() {
        None
    } else {
        candidates.iter().find_map(|element| {
            element
                .children
                .borrow()
                .iter()
                .filter(|child| !claimed.contains(child))
                .find(|child| text_of(child).is_some_and(|text| fingerprint(&text) == wanted))
                .cloned()
        })
    };

    if let Some(node) = matching_child {
        replace_text(&node, &fragment.text);
        claimed.insert(&node);
        return true;
    }

    match candidates
        .iter()
        .find(|element| !claimed.contains(element) && !has_text_descendant(element))
    {
        Some(element) => {
            set_text_content(element, &fragment.text);
            claimed.insert(element);
            true
        }
        None => false,
    }
}

/// 回退：按原始文本查找第一个未占用的文本节点
///
/// 先比较空白归一化后的指纹；没有完全相同的节点时，在包含原文的节点中只替换原文所在的一段。
fn write_by_content(text_nodes: &[Handle], fragment: &Fragment, claimed: &mut Claimed) -> bool {
    let wanted = fingerprint(&fragment.original);
    if wanted.is_empty() {
        return false;
    }

    let unclaimed = || text_nodes.iter().filter(|node| !claimed.contains(node));
    let node_text = |node: &Handle| text_of(node).map(|text| fingerprint(&text)).unwrap_or_default();

    let exact = unclaimed().find(|node| node_text(*node) == wanted).cloned();
    if let Some(node) = exact {
        replace_text(&node, &fragment.text);
        claimed.insert(&node);
        return true;
    }

    let needle = fragment.original.trim();
    let containing = unclaimed()
        .find(|node| text_of(node).is_some_and(|text| text.contains(needle)))
        .cloned();

    match containing {
        Some(node) if replace_text_span(&node, needle, &fragment.text) => {
            claimed.insert(&node);
            true
        }
        _ => false,
    }
}

/// 文档顺序的非空文本节点，跳过不参与改写的元素
fn collect_text_nodes(node: &Handle, out: &mut Vec<Handle>) {
    for child in node.children.borrow().iter() {
        match child.data {
            NodeData::Text { ref contents } => {
                if !contents.borrow().trim().is_empty() {
                    out.push(child.clone());
                }
            }
            NodeData::Element { ref name, .. } => {
                if !SKIP_ELEMENTS.iter().any(|skip| (&*name.local).eq_ignore_ascii_case(skip)) {
                    collect_text_nodes(child, out);
                }
            }
            _ => {}
        }
    }
}

/// 空白归一化后的文本
fn fingerprint(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
