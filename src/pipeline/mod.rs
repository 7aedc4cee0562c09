//! Execution pipeline
//!
//! Turns each [`ExecutionRequest`] into exactly one [`ExecutionResult`] over a
//! sandbox borrowed from the pool. Submissions go to a fixed set of workers
//! through a bounded backlog; when the backlog is full the submitter's own
//! future runs the work, so nothing is dropped and latency degrades instead.

mod steps;
mod verdict;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::pool::SandboxPool;
use crate::sandbox::SandboxRuntime;
use crate::types::{ExecutionRequest, ExecutionResult, PoolStatus};

use steps::StepRunner;

/// One queued submission
struct Job {
    request: ExecutionRequest,
    reply: oneshot::Sender<ExecutionResult>,
}

/// Bounded worker pool running submissions end to end
pub struct ExecutionPipeline {
    runner: Arc<StepRunner>,
    sender: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    caller_runs: AtomicU64,
}

impl ExecutionPipeline {
    /// Build the pool over `runtime`, warm it up, and start the workers
    pub async fn start(runtime: Arc<dyn SandboxRuntime>, config: &Config) -> Result<Self> {
        let pool = SandboxPool::new(runtime, config)?;
        pool.init().await?;
        Ok(Self::with_pool(pool, config))
    }

    /// Start workers over an already initialised pool
    pub fn with_pool(pool: Arc<SandboxPool>, config: &Config) -> Self {
        let runner = Arc::new(StepRunner::new(
            pool,
            config.toolchain.clone(),
            config.pipeline.clone(),
            config.container.workspace.clone(),
        ));

        let (sender, receiver) = mpsc::channel::<Job>(config.pipeline.backlog.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.pipeline.workers.max(1))
            .map(|i| {
                let runner = runner.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    info!("Pipeline worker {} started", i);
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        let result = runner.execute(job.request).await;
                        if job.reply.send(result).is_err() {
                            warn!("Submitter went away before its result was ready");
                        }
                    }
                    info!("Pipeline worker {} stopped", i);
                })
            })
            .collect();

        info!(
            workers = config.pipeline.workers.max(1),
            backlog = config.pipeline.backlog,
            "Execution pipeline started"
        );

        ExecutionPipeline {
            runner,
            sender: std::sync::Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            caller_runs: AtomicU64::new(0),
        }
    }

    /// The pool this pipeline borrows from
    pub fn pool(&self) -> &Arc<SandboxPool> {
        self.runner.pool()
    }

    pub async fn status(&self) -> PoolStatus {
        self.pool().status().await
    }

    /// Submissions that ran on the caller because the backlog was full
    pub fn caller_runs(&self) -> u64 {
        self.caller_runs.load(Ordering::Relaxed)
    }

    /// Queue a submission; the returned future always resolves to a result
    ///
    /// Never blocks. When the backlog is full the work happens inside the
    /// returned future instead of on a worker.
    pub fn submit(&self, request: ExecutionRequest) -> BoxFuture<'static, ExecutionResult> {
        let submission_id = request.submission_id.clone();
        let sender = self.sender.lock().ok().and_then(|guard| guard.clone());
        let Some(sender) = sender else {
            return async move { ExecutionResult::internal_error(submission_id, "pipeline is shut down") }
                .boxed();
        };

        let (reply, result) = oneshot::channel();
        match sender.try_send(Job { request, reply }) {
            Ok(()) => async move {
                result.await.unwrap_or_else(|_| {
                    error!(id = %submission_id, "Worker dropped the submission");
                    ExecutionResult::internal_error(submission_id, "worker dropped the submission")
                })
            }
            .boxed(),
            Err(TrySendError::Full(job)) => {
                warn!(id = %submission_id, "Backlog full, running submission on the caller");
                self.caller_runs.fetch_add(1, Ordering::Relaxed);
                let runner = self.runner.clone();
                async move { runner.execute(job.request).await }.boxed()
            }
            Err(TrySendError::Closed(_)) => {
                async move { ExecutionResult::internal_error(submission_id, "pipeline is shut down") }
                    .boxed()
            }
        }
    }

    /// Run a submission on the caller, bypassing the workers
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.runner.execute(request).await
    }

    /// Stop accepting work, drain the backlog, then shut the pool down
    pub async fn shutdown(&self) -> Result<()> {
        let sender = self.sender.lock().ok().and_then(|mut guard| guard.take());
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);
        info!("Draining execution pipeline");

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Pipeline worker failed: {}", e);
            }
        }

        self.pool().shutdown().await
    }
}
