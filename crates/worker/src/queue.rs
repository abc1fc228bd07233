//! 有界优先级任务队列
//!
//! 入队时按优先级插入：严格更高优先级的任务排在所有同级或更低级任务之前，
//! 同级任务保持到达顺序。队列满时入队立即失败并把任务交还调用方，不会阻塞。

use std::collections::VecDeque;

use validator_core::{TaskPriority, ValidationTask, ValidatorError};

/// 可按优先级排队的条目
pub trait Prioritized {
    fn priority(&self) -> TaskPriority;
}

impl Prioritized for ValidationTask {
    fn priority(&self) -> TaskPriority {
        self.priority
    }
}

/// 队列已满时被退回的条目
#[derive(Debug)]
pub struct QueueFull<T> {
    pub item: T,
    pub max_depth: usize,
}

impl<T> QueueFull<T> {
    /// 拆分为被退回的条目与对应错误
    pub fn into_parts(self) -> (T, ValidatorError) {
        (
            self.item,
            ValidatorError::QueueFull {
                max_depth: self.max_depth,
            },
        )
    }
}

/// 有界优先级队列
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: VecDeque<T>,
    max_depth: usize,
}

impl<T: Prioritized> TaskQueue<T> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_depth,
        }
    }

    /// 按优先级插入
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueFull<T>> {
        self.enqueue_with_headroom(item, 0)
    }

    /// 按优先级插入，允许在深度上限之外再容纳 `headroom` 个条目
    ///
    /// 这些条目已有即将就绪的执行者认领，不计入积压。
    pub fn enqueue_with_headroom(&mut self, item: T, headroom: usize) -> Result<(), QueueFull<T>> {
        if self.items.len() >= self.max_depth.saturating_add(headroom) {
            return Err(QueueFull {
                item,
                max_depth: self.max_depth,
            });
        }

        let priority = item.priority();
        let position = self
            .items
            .iter()
            .position(|queued| priority.is_higher_than(&queued.priority()))
            .unwrap_or(self.items.len());
        self.items.insert(position, item);
        Ok(())
    }

    /// 取出队首
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// 把刚出队但未能派发的条目放回队首，不检查深度上限
    pub fn requeue_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 调整最大深度，已在队列中的条目不受影响
    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    /// 移除不满足条件的条目，返回移除数量
    pub fn retain<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.items.len();
        self.items.retain(keep);
        before - self.items.len()
    }

    /// 取出全部条目，保持出队顺序
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Item(&'static str, TaskPriority);

    impl Prioritized for Item {
        fn priority(&self) -> TaskPriority {
            self.1
        }
    }

    fn drain_names(queue: &mut TaskQueue<Item>) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.dequeue()).map(|item| item.0).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = TaskQueue::new(10);
        queue.enqueue(Item("h1", TaskPriority::High)).unwrap();
        queue.enqueue(Item("n1", TaskPriority::Normal)).unwrap();
        queue.enqueue(Item("h2", TaskPriority::High)).unwrap();
        queue.enqueue(Item("l1", TaskPriority::Low)).unwrap();

        assert_eq!(drain_names(&mut queue), vec!["h1", "h2", "n1", "l1"]);
    }

    #[test]
    fn test_late_high_priority_jumps_ahead() {
        let mut queue = TaskQueue::new(10);
        queue.enqueue(Item("l1", TaskPriority::Low)).unwrap();
        queue.enqueue(Item("n1", TaskPriority::Normal)).unwrap();
        queue.enqueue(Item("n2", TaskPriority::Normal)).unwrap();
        queue.enqueue(Item("h1", TaskPriority::High)).unwrap();
        queue.enqueue(Item("n3", TaskPriority::Normal)).unwrap();

        assert_eq!(drain_names(&mut queue), vec!["h1", "n1", "n2", "n3", "l1"]);
    }

    #[test]
    fn test_full_queue_rejects_and_returns_item() {
        let mut queue = TaskQueue::new(2);
        queue.enqueue(Item("a", TaskPriority::Normal)).unwrap();
        queue.enqueue(Item("b", TaskPriority::Normal)).unwrap();

        let rejected = queue.enqueue(Item("c", TaskPriority::High)).unwrap_err();
        assert_eq!(rejected.max_depth, 2);
        let (item, error) = rejected.into_parts();
        assert_eq!(item.0, "c");
        assert!(matches!(error, ValidatorError::QueueFull { max_depth: 2 }));
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn test_dequeue_empty_and_drain() {
        let mut queue: TaskQueue<Item> = TaskQueue::new(3);
        assert!(queue.dequeue().is_none());

        queue.enqueue(Item("n", TaskPriority::Normal)).unwrap();
        queue.enqueue(Item("h", TaskPriority::High)).unwrap();
        let drained: Vec<_> = queue.drain().into_iter().map(|item| item.0).collect();
        assert_eq!(drained, vec!["h", "n"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_headroom_extends_depth_limit() {
        let mut queue = TaskQueue::new(1);
        queue.enqueue(Item("a", TaskPriority::Normal)).unwrap();
        assert!(queue.enqueue(Item("b", TaskPriority::Normal)).is_err());

        queue
            .enqueue_with_headroom(Item("b", TaskPriority::Normal), 2)
            .unwrap();
        queue
            .enqueue_with_headroom(Item("c", TaskPriority::Normal), 2)
            .unwrap();
        let rejected = queue
            .enqueue_with_headroom(Item("d", TaskPriority::Normal), 2)
            .unwrap_err();
        // 错误中报告的仍是配置的深度上限
        assert_eq!(rejected.max_depth, 1);
        assert_eq!(queue.depth(), 3);
    }

    #[test]
    fn test_retain_removes_matching_items() {
        let mut queue = TaskQueue::new(5);
        queue.enqueue(Item("keep1", TaskPriority::Normal)).unwrap();
        queue.enqueue(Item("drop1", TaskPriority::High)).unwrap();
        queue.enqueue(Item("keep2", TaskPriority::Low)).unwrap();

        assert_eq!(queue.retain(|item| item.0.starts_with("keep")), 1);
        assert_eq!(drain_names(&mut queue), vec!["keep1", "keep2"]);
    }
}
