mod task;

use std::collections::BTreeSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use self::task::{Task, TaskType};
use crate::aggregator::Aggregator;
use crate::error::Error;
use crate::sink::Sink;
use crate::storage::{CompletionLedger, CorrelationStore};

// Keeps Instant arithmetic in range for absurd retention settings
const MAX_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

pub enum Message {
    /// A notification arrived before its Original. The worker will drop it
    /// at the deadline unless the Original turns up first.
    OrphanSeen(String, DateTime<Utc>),
    /// Ask the worker to terminate
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum WorkerStatus {
    Ok = 0,
    Terminated = 1,
    ChannelDisconnected = 2,
    LockPoisoned = 3,
    Unknown = 255,
}
impl WorkerStatus {
    pub fn from_u8(value: u8) -> WorkerStatus {
        match value {
            0 => WorkerStatus::Ok,
            1 => WorkerStatus::Terminated,
            2 => WorkerStatus::ChannelDisconnected,
            3 => WorkerStatus::LockPoisoned,
            _ => WorkerStatus::Unknown,
        }
    }
}

pub(crate) struct Worker<C, L, K> {
    receiver: mpsc::Receiver<Message>,

    worker_status: Arc<RwLock<u8>>,

    aggregator: Arc<Aggregator<C, L, K>>,

    // Orphan expiries we need to do later, sorted in time order
    tasks: BTreeSet<Task>,
}

impl<C, L, K> Worker<C, L, K>
where
    C: CorrelationStore,
    L: CompletionLedger,
    K: Sink,
{
    pub fn new(
        receiver: mpsc::Receiver<Message>,
        aggregator: Arc<Aggregator<C, L, K>>,
        worker_status: Arc<RwLock<u8>>,
        orphan_deadlines: Vec<(String, DateTime<Utc>)>,
    ) -> Worker<C, L, K> {
        let mut worker = Worker {
            receiver,
            worker_status,
            aggregator,
            tasks: BTreeSet::new(),
        };

        // Orphans recovered from storage keep their original deadlines
        for (correlation_id, deadline) in orphan_deadlines {
            worker.schedule(correlation_id, deadline);
        }

        worker
    }

    pub fn run(&mut self) {
        let loop_delay = Duration::from_secs(self.aggregator.config().worker_loop_delay_secs);

        loop {
            // Wait until the first task is due, or loop_delay if there are none
            let timeout: Duration = if let Some(task) = self.tasks.iter().next() {
                debug!("(worker) loop start (tasks in queue)");
                let now = Instant::now();
                if task.time > now {
                    task.time - now
                } else {
                    Duration::new(0, 0) // overdue!
                }
            } else {
                debug!("(worker) loop start (no tasks)");
                loop_delay
            };

            match self.receiver.recv_timeout(timeout) {
                Ok(Message::OrphanSeen(correlation_id, deadline)) => {
                    trace!("(worker) scheduling expiry of orphan {}", correlation_id);
                    self.schedule(correlation_id, deadline);
                }
                Ok(Message::Terminate) => {
                    debug!("(worker) received Terminate command");
                    self.set_status(WorkerStatus::Terminated);
                    info!("(worker) terminated");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.set_status(WorkerStatus::ChannelDisconnected);
                    info!("(worker) failed and terminated");
                    return;
                }
            };

            // Copy out all the tasks that are due
            let now = Instant::now();
            let due_tasks: Vec<Task> = self
                .tasks
                .iter()
                .take_while(|t| t.time <= now)
                .cloned()
                .collect();

            for task in &due_tasks {
                self.tasks.remove(task);
                let worker_status = self.handle_task(task, loop_delay);
                if worker_status != WorkerStatus::Ok {
                    self.set_status(worker_status);
                    debug!("(worker) failed and terminated");
                    return;
                }
            }
        }
    }

    fn handle_task(&mut self, task: &Task, retry_delay: Duration) -> WorkerStatus {
        match task.tasktype {
            TaskType::ExpireOrphan => {
                match self
                    .aggregator
                    .expire_orphan(&task.correlation_id, Utc::now())
                {
                    Ok(true) => WorkerStatus::Ok,
                    Ok(false) => {
                        // Still held but not quite due by the wall clock
                        if let Some(deadline) =
                            self.aggregator.orphan_deadline(&task.correlation_id)
                        {
                            self.schedule(task.correlation_id.clone(), deadline);
                        }
                        WorkerStatus::Ok
                    }
                    Err(Error::LockPoisoned) => WorkerStatus::LockPoisoned,
                    Err(e) => {
                        error!(
                            "(worker) unable to expire orphan {}: {}",
                            task.correlation_id, e
                        );
                        self.tasks.insert(Task {
                            tasktype: TaskType::ExpireOrphan,
                            time: Instant::now() + retry_delay,
                            correlation_id: task.correlation_id.clone(),
                        });
                        WorkerStatus::Ok
                    }
                }
            }
        }
    }

    fn schedule(&mut self, correlation_id: String, deadline: DateTime<Utc>) {
        let wait = (deadline - Utc::now())
            .to_std()
            .unwrap_or_else(|_| Duration::new(0, 0))
            .min(MAX_WAIT);
        self.tasks.insert(Task {
            tasktype: TaskType::ExpireOrphan,
            time: Instant::now() + wait,
            correlation_id,
        });
    }

    fn set_status(&self, status: WorkerStatus) {
        match self.worker_status.write() {
            Ok(mut guard) => *guard = status as u8,
            Err(poisoned) => *poisoned.into_inner() = status as u8,
        }
    }
}
