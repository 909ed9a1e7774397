//! 结构化地址
//!
//! 地址描述了从文档根到片段所在元素的路径，每一段由标签名加上一个消歧限定符组成：
//! 优先使用 `id`，其次是第一个 class，最后是同名兄弟中的序号（从 1 开始，仅当存在多个同名兄弟时添加）。
//!
//! ```text
//! html > body > div#main > p:nth-of-type(2)
//! ```
//!
//! 提取和注入都通过本模块计算和匹配地址，二者不会各自实现一套规则。

use std::fmt;
use std::str::FromStr;

use markup5ever_rcdom::{Handle, NodeData};

use super::dom::{get_class_names, get_node_attr, get_node_name};
use crate::rewrite::error::DocumentError;

/// 段之间的分隔符
pub const SEPARATOR: &str = " > ";

const NTH_PREFIX: &str = ":nth-of-type(";

/// 段限定符
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// `#id`
    Id(String),
    /// `.class`（第一个 class）
    Class(String),
    /// `:nth-of-type(n)`
    Nth(usize),
    /// 没有同名兄弟时不加限定
    Plain,
}

/// 地址中的一段
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub tag: String,
    pub qualifier: Qualifier,
}

/// 完整地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    segments: Vec<Segment>,
}

impl Segment {
    /// 计算元素在其父节点下的段
    ///
    /// 非元素节点返回 `None`。
    pub fn for_element(node: &Handle, parent: Option<&Handle>) -> Option<Self> {
        let tag = get_node_name(node)?.to_ascii_lowercase();

        let qualifier = if let Some(id) = get_node_attr(node, "id").filter(|id| is_safe_token(id)) {
            Qualifier::Id(id)
        } else if let Some(class) = get_class_names(node).into_iter().find(|c| is_safe_token(c)) {
            Qualifier::Class(class)
        } else {
            match parent {
                Some(parent) => {
                    let siblings = same_tag_siblings(parent, &tag);
                    if siblings.len() > 1 {
                        let index = siblings
                            .iter()
                            .position(|sibling| std::rc::Rc::ptr_eq(sibling, node))
                            .map_or(1, |i| i + 1);
                        Qualifier::Nth(index)
                    } else {
                        Qualifier::Plain
                    }
                }
                None => Qualifier::Plain,
            }
        };

        Some(Self { tag, qualifier })
    }

    /// 判断元素是否匹配该段
    pub fn matches(&self, node: &Handle, parent: Option<&Handle>) -> bool {
        let tag_matches = get_node_name(node)
            .map(|name| name.eq_ignore_ascii_case(&self.tag))
            .unwrap_or(false);
        if !tag_matches {
            return false;
        }

        match &self.qualifier {
            Qualifier::Id(id) => get_node_attr(node, "id").as_deref() == Some(id.as_str()),
            Qualifier::Class(class) => get_class_names(node).iter().any(|c| c == class),
            Qualifier::Nth(n) => match parent {
                Some(parent) => same_tag_siblings(parent, &self.tag)
                    .iter()
                    .position(|sibling| std::rc::Rc::ptr_eq(sibling, node))
                    .map_or(false, |i| i + 1 == *n),
                None => *n == 1,
            },
            Qualifier::Plain => true,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Qualifier::Id(id) => write!(f, "{}#{}", self.tag, id),
            Qualifier::Class(class) => write!(f, "{}.{}", self.tag, class),
            Qualifier::Nth(n) => write!(f, "{}{}{})", self.tag, NTH_PREFIX, n),
            Qualifier::Plain => write!(f, "{}", self.tag),
        }
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let split = raw.find(['#', '.', ':']).unwrap_or(raw.len());
        let (tag, rest) = raw.split_at(split);

        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("无效的标签名: '{}'", raw));
        }

        let qualifier = if rest.is_empty() {
            Qualifier::Plain
        } else if let Some(id) = rest.strip_prefix('#') {
            Qualifier::Id(id.to_string())
        } else if let Some(class) = rest.strip_prefix('.') {
            Qualifier::Class(class.to_string())
        } else if let Some(n) = rest.strip_prefix(NTH_PREFIX).and_then(|r| r.strip_suffix(')')) {
            let n: usize = n.parse().map_err(|_| format!("无效的序号: '{}'", raw))?;
            if n == 0 {
                return Err(format!("序号从 1 开始: '{}'", raw));
            }
            Qualifier::Nth(n)
        } else {
            return Err(format!("无法识别的限定符: '{}'", raw));
        };

        if matches!(&qualifier, Qualifier::Id(v) | Qualifier::Class(v) if v.is_empty()) {
            return Err(format!("限定符为空: '{}'", raw));
        }

        Ok(Self {
            tag: tag.to_ascii_lowercase(),
            qualifier,
        })
    }
}

impl Address {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// 根据祖先链计算地址
    ///
    /// `chain[0]` 必须是文档节点（只用作第一层元素的父节点），其余依次为各级元素，最后一个是目标元素。
    pub fn from_chain(chain: &[Handle]) -> Result<Self, DocumentError> {
        if chain.len() < 2 {
            return Err(DocumentError::InvalidAddress {
                address: String::new(),
                reason: "祖先链为空".to_string(),
            });
        }

        let mut segments = Vec::with_capacity(chain.len() - 1);
        for pair in chain.windows(2) {
            let segment = Segment::for_element(&pair[1], Some(&pair[0])).ok_or_else(|| {
                DocumentError::InvalidAddress {
                    address: segments
                        .iter()
                        .map(Segment::to_string)
                        .collect::<Vec<_>>()
                        .join(SEPARATOR),
                    reason: "祖先链中存在非元素节点".to_string(),
                }
            })?;
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// 低精度地址：只使用直接父元素的标签名
    pub fn fallback(parent_tag: Option<&str>) -> Self {
        let mut segments = vec![Segment {
            tag: "body".to_string(),
            qualifier: Qualifier::Plain,
        }];
        if let Some(tag) = parent_tag.filter(|tag| *tag != "body") {
            segments.push(Segment {
                tag: tag.to_ascii_lowercase(),
                qualifier: Qualifier::Plain,
            });
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// 只保留标签名的简化地址
    pub fn simplified(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.tag.as_str()).collect()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(Segment::to_string).collect();
        write!(f, "{}", parts.join(SEPARATOR))
    }
}

impl FromStr for Address {
    type Err = DocumentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Err(DocumentError::InvalidAddress {
                address: raw.to_string(),
                reason: "地址为空".to_string(),
            });
        }

        let segments = raw
            .split(SEPARATOR.trim())
            .map(str::parse::<Segment>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| DocumentError::InvalidAddress {
                address: raw.to_string(),
                reason,
            })?;

        Ok(Self { segments })
    }
}

/// 简化地址的后缀兼容：末尾的元素及其父元素标签一致
///
/// 任意一方只有一段时只比较最后一段。两个都从 `html` 开始的完整路径在中间插入或删除层级后仍然兼容。
pub fn is_suffix_compatible(a: &[&str], b: &[&str]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let depth = a.len().min(b.len()).min(2);
    a[a.len() - depth..] == b[b.len() - depth..]
}

/// 父节点下与给定标签同名的元素子节点
fn same_tag_siblings(parent: &Handle, tag: &str) -> Vec<Handle> {
    parent
        .children
        .borrow()
        .iter()
        .filter(|child| match child.data {
            NodeData::Element { ref name, .. } => (&*name.local).eq_ignore_ascii_case(tag),
            _ => false,
        })
        .cloned()
        .collect()
}

/// 可以安全写入地址的 id/class 值
fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '>' | '#' | '.' | ':'))
}
