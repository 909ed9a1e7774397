//! 批次划分
//!
//! 片段按固定大小切分为连续的批次，批次之间顺序处理，以限制同时在途的状态。

use std::ops::Range;

/// 一个批次在片段序列中的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 从 0 开始的批次序号
    pub index: usize,
    pub range: Range<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// 批次计划
#[derive(Debug, Clone, Copy)]
pub struct BatchPlan {
    total: usize,
    batch_size: usize,
}

impl BatchPlan {
    /// `batch_size` 为 0 时按 1 处理
    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            total,
            batch_size: batch_size.max(1),
        }
    }

    /// 批次数
    pub fn len(&self) -> usize {
        self.total.div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        (0..self.len()).map(move |index| {
            let start = index * self.batch_size;
            Batch {
                index,
                range: start..(start + self.batch_size).min(self.total),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_batch_is_partial() {
        let plan = BatchPlan::new(25, 10);
        let batches: Vec<Batch> = plan.batches().collect();

        assert_eq!(plan.len(), 3);
        assert_eq!(batches[0].range, 0..10);
        assert_eq!(batches[2].range, 20..25);
        assert_eq!(batches[2].len(), 5);
    }

    #[test]
    fn test_empty_and_degenerate_sizes() {
        assert!(BatchPlan::new(0, 10).is_empty());
        assert_eq!(BatchPlan::new(0, 10).batches().count(), 0);
        assert_eq!(BatchPlan::new(3, 0).len(), 3);
        assert_eq!(BatchPlan::new(10, 10).len(), 1);
    }
}
