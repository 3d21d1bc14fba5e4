use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, Stream};

use super::MemoryController;

impl MemoryController {
    /// 把 `items` 切成固定大小的批次逐批处理
    ///
    /// 每次只处理一个批次，批次内的元素并发执行；每个批次结束后采样内存，
    /// 超过上限的阈值时先强制回收再继续。流是有限且只能消费一次的。
    pub fn create_streaming_batches<T, R, F, Fut>(
        self: &Arc<Self>,
        items: Vec<T>,
        per_item: F,
        batch_size: usize,
    ) -> impl Stream<Item = Vec<R>> + Send + 'static
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let batch_size = batch_size.max(1);
        let controller = Arc::clone(self);

        stream::unfold(
            (items.into_iter(), per_item, controller),
            move |(mut items, per_item, controller)| async move {
                let batch: Vec<T> = items.by_ref().take(batch_size).collect();
                if batch.is_empty() {
                    return None;
                }
                let results = join_all(batch.into_iter().map(&per_item)).await;
                controller.check_between_batches();
                Some((results, (items, per_item, controller)))
            },
        )
    }
}
