use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use pipeline_core::{PipelineError, PipelineResult};
use tokio::sync::{Notify, Semaphore};

/// 有界先进先出队列
///
/// `push` 在队列满时等待，`pop` 在队列空时等待。每个取出的元素处理完后需调用
/// [`WorkQueue::task_done`]，[`WorkQueue::wait_until_drained`] 在所有已放入的元素
/// 都处理完之后返回。
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    slots: Semaphore,
    available: Semaphore,
    pending: AtomicUsize,
    drained: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            available: Semaphore::new(0),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub async fn push(&self, item: T) -> PipelineResult<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| PipelineError::Internal("队列已关闭".to_string()))?;
        permit.forget();

        self.pending.fetch_add(1, Ordering::SeqCst);
        self.lock_items().push_back(item);
        self.available.add_permits(1);
        Ok(())
    }

    /// 取出队首元素，队列关闭后返回 `None`
    pub async fn pop(&self) -> Option<T> {
        let permit = self.available.acquire().await.ok()?;
        permit.forget();

        let item = self.lock_items().pop_front();
        self.slots.add_permits(1);
        item
    }

    /// 标记一个已取出的元素处理完成
    pub fn task_done(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.drained.notify_waiters();
        }
    }

    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// 关闭队列，唤醒所有等待者
    pub fn close(&self) {
        self.slots.close();
        self.available.close();
        self.drained.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.available.is_closed()
    }

    /// 队列中尚未取出的元素个数
    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已放入但尚未处理完成的元素个数
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
