use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use analyzer_core::models::WorkerRecord;

use crate::job::{execute, ExecutionResult, Job};
use crate::registry::HandlerRegistry;

/// Worker回报给控制循环的消息
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Finished {
        worker_id: String,
        job: Job,
        result: ExecutionResult,
        elapsed: Duration,
    },
}

/// 控制循环持有的Worker
pub(crate) struct WorkerSlot {
    pub record: WorkerRecord,
    pub sender: mpsc::Sender<Job>,
    pub handle: JoinHandle<()>,
}

impl WorkerSlot {
    /// 启动一个Worker任务
    ///
    /// 控制循环只在Worker空闲时派发，通道容量为1即可。
    pub fn spawn(
        id: String,
        registry: Arc<HandlerRegistry>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (sender, jobs) = mpsc::channel(1);
        let record = WorkerRecord::new(id.clone());
        let handle = tokio::spawn(run_worker(id, registry, jobs, events));
        Self {
            record,
            sender,
            handle,
        }
    }

    /// 关闭派发通道，Worker处理完手上的任务后自行退出
    pub fn retire(mut self) -> WorkerRecord {
        self.record.mark_terminated();
        self.record
    }

    /// 立即终止Worker，手上的任务结果会丢失
    pub fn terminate(mut self) -> WorkerRecord {
        self.handle.abort();
        self.record.mark_terminated();
        self.record
    }
}

async fn run_worker(
    id: String,
    registry: Arc<HandlerRegistry>,
    mut jobs: mpsc::Receiver<Job>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    debug!("Worker {} 启动", id);

    while let Some(job) = jobs.recv().await {
        let started = Instant::now();
        let result = execute(&registry, &job.task, Some(&id)).await;
        let event = WorkerEvent::Finished {
            worker_id: id.clone(),
            job,
            result,
            elapsed: started.elapsed(),
        };
        if events.send(event).is_err() {
            break;
        }
    }

    debug!("Worker {} 退出", id);
}
