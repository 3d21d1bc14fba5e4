use std::collections::VecDeque;

use analyzer_core::models::{TaskPriority, PRIORITY_LEVELS};

/// 五档优先级队列
///
/// 档位之间严格按优先级出队，同档位内先进先出。没有老化机制，
/// 高优先级任务持续到达时低优先级任务会一直等待。
#[derive(Debug)]
pub struct PriorityQueue<T> {
    bins: [VecDeque<T>; PRIORITY_LEVELS],
    len: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| VecDeque::new()),
            len: 0,
        }
    }

    pub fn push(&mut self, priority: TaskPriority, item: T) {
        self.bins[priority.level()].push_back(item);
        self.len += 1;
    }

    /// 重试的任务回到所在档位的队首
    pub fn push_front(&mut self, priority: TaskPriority, item: T) {
        self.bins[priority.level()].push_front(item);
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.bins.iter_mut().find_map(|bin| bin.pop_front())?;
        self.len -= 1;
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 每个档位的排队数量，下标即优先级
    pub fn depth_by_level(&self) -> [usize; PRIORITY_LEVELS] {
        std::array::from_fn(|level| self.bins[level].len())
    }

    /// 按出队顺序取出全部元素
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        for bin in self.bins.iter_mut() {
            items.extend(bin.drain(..));
        }
        self.len = 0;
        items
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
