use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Error, Result};

/// Context provided to background tasks during execution
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
    pub shutdown: broadcast::Receiver<()>,
}

/// Trait for background tasks that run periodically
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run this task
    fn interval(&self) -> Duration;

    /// Execute one tick. An error ends the tick, not the task.
    async fn execute(&self, ctx: Context) -> Result<()>;
}

/// Scheduler runs periodic background tasks on its own runtime.
///
/// Callers stay synchronous: the scheduler owns a small multi-threaded tokio
/// runtime, and [`Scheduler::shutdown`] blocks until every task loop has exited.
pub struct Scheduler {
    runtime: Runtime,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("plydb-scheduler")
            .enable_time()
            .build()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            runtime,
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    /// Register a periodic background task
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let handle = self.spawn_timer_loop(task);
        self.tasks.lock().push(handle);
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run_id = 0u64;

        self.runtime.spawn(async move {
            // First tick one interval after registration, then fixed delay.
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // A pending stop signal wins over a tick that is already due.
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = task.name(), "Task shutting down");
                        break;
                    }

                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };

                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                run_id,
                                error = %e,
                                "Task execution failed"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Graceful shutdown: stop scheduling ticks and wait for running ones.
    ///
    /// Must not be called from inside an async context; [`Store::close`]
    /// moves the call to a plain thread when it is.
    ///
    /// [`Store::close`]: crate::store::Store::close
    pub fn shutdown(self) -> Result<()> {
        // Signal all tasks to stop
        self.shutdown_tx.send(()).ok();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let joined = self.runtime.block_on(async move {
            for task in tasks {
                task.await
                    .map_err(|e| Error::Task(format!("Task join error: {}", e)))?;
            }
            Ok(())
        });

        self.runtime.shutdown_timeout(Duration::from_secs(5));
        joined
    }
}
