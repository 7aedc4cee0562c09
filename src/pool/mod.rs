//! Sandbox pool
//!
//! Hands out ready-to-use sandboxes, reclaims them, and keeps the number of
//! sandboxes this instance owns within bounds.
//!
//! - state.rs: slot registry and the release policy
//! - lease.rs: scoped ownership of one sandbox
//! - reaper.rs: periodic eviction of surplus idle sandboxes
//!
//! All bookkeeping sits behind one async mutex that is never held across a
//! runtime call. A sandbox leaves the available set under that lock, so two
//! acquires can never receive the same name.

mod lease;
mod reaper;
mod state;

pub use lease::Lease;
pub use state::SandboxState;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{validate_config, Config, ContainerConfig, PoolConfig};
use crate::error::{Error, Result};
use crate::sandbox::shell::{keepalive_command, probe_passed, probe_script, wipe_script};
use crate::sandbox::{CommandExecutor, ResourceLimits, SandboxRuntime, SandboxSpec, Step};
use crate::types::PoolStatus;

use reaper::Reaper;
use state::{keep_on_release, PoolState};

/// Bounded set of reusable sandboxes owned by one instance
pub struct SandboxPool {
    runtime: Arc<dyn SandboxRuntime>,
    executor: CommandExecutor,
    config: PoolConfig,
    container: ContainerConfig,
    instance_id: String,
    /// `<name_prefix>-<instance_id>-`; every sandbox name starts with it
    prefix: String,
    state: Mutex<PoolState>,
    /// Woken when a sandbox becomes available or capacity frees up
    changed: Notify,
    /// Serialises the capacity check with the create that follows it
    provisioning: Mutex<()>,
    reaper: std::sync::Mutex<Option<Reaper>>,
    shut_down: AtomicBool,
}

impl SandboxPool {
    /// Create a pool over `runtime`
    ///
    /// Refuses configurations with validation errors. Nothing is created
    /// until [`SandboxPool::init`].
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: &Config) -> Result<Arc<Self>> {
        let report = validate_config(config);
        for warning in &report.warnings {
            warn!("Config warning: {}: {}", warning.path, warning.message);
        }
        report.into_result()?;

        let instance_id = config.pool.resolve_instance_id();
        let prefix = format!("{}-{}-", config.pool.name_prefix, instance_id);
        let executor = CommandExecutor::new(runtime.clone(), config.pipeline.max_output_bytes);

        Ok(Arc::new(SandboxPool {
            runtime,
            executor,
            config: config.pool.clone(),
            container: config.container.clone(),
            instance_id,
            prefix,
            state: Mutex::new(PoolState::default()),
            changed: Notify::new(),
            provisioning: Mutex::new(()),
            reaper: std::sync::Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }))
    }

    /// Warm up `target_size` sandboxes and start the reaper
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        info!(
            instance = %self.instance_id,
            runtime = self.runtime.name(),
            target = self.config.target_size,
            max = self.config.max_total,
            "Initialising sandbox pool"
        );

        let created = self.warm_up(self.config.target_size).await;
        if created < self.config.target_size {
            warn!(
                created,
                target = self.config.target_size,
                "Pool warm-up fell short; missing sandboxes are created on demand"
            );
        }

        let reaper = Reaper::spawn(Arc::downgrade(self), self.config.reap_interval);
        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(previous) = slot.replace(reaper) {
                previous.abort();
            }
        }

        info!(available = created, "Sandbox pool ready");
        Ok(())
    }

    /// Create up to `count` sandboxes straight into the available set
    ///
    /// Never exceeds `max_total`, and stops once `target_size +
    /// overflow_slack` sandboxes are available. Returns how many were created.
    pub async fn warm_up(&self, count: usize) -> usize {
        let ceiling = self.config.target_size + self.config.overflow_slack;
        let mut created = 0;
        for _ in 0..count {
            let _guard = self.provisioning.lock().await;
            if self.state.lock().await.available() >= ceiling {
                debug!(ceiling, "Warm-up stopped at the available ceiling");
                break;
            }
            if self.owned_total().await >= self.config.max_total {
                break;
            }
            match self.provision().await {
                Ok(name) => {
                    self.state.lock().await.push_idle(&name);
                    created += 1;
                }
                Err(e) => warn!("Warm-up provisioning failed: {}", e),
            }
        }
        if created > 0 {
            self.changed.notify_waiters();
        }
        created
    }

    /// Identifier of this pool instance
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Prefix shared by every sandbox this instance owns
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Executor bound to this pool's runtime
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Lifecycle state of `name` as seen by this pool
    pub async fn state_of(&self, name: &str) -> SandboxState {
        self.state.lock().await.state_of(name)
    }

    /// Borrow a sandbox, waiting at most `acquire_timeout` per attempt
    pub async fn acquire(self: &Arc<Self>) -> Result<Lease> {
        self.acquire_within(self.config.acquire_timeout).await
    }

    /// Borrow a sandbox, waiting at most `wait` per attempt
    ///
    /// A candidate that fails pre-use validation is destroyed and counts as
    /// one attempt; after `acquire_attempts` the pool reports exhaustion.
    pub async fn acquire_within(self: &Arc<Self>, wait: Duration) -> Result<Lease> {
        if self.is_shut_down() {
            return Err(Error::Internal("sandbox pool is shut down".to_string()));
        }

        let started = Instant::now();
        for attempt in 1..=self.config.acquire_attempts {
            let (name, fresh) = self.obtain(wait).await?;

            let checked = if fresh || !self.config.pre_use_validation {
                Ok(())
            } else {
                self.validate(&name).await
            };

            match checked {
                Ok(()) => {
                    if let Some(lease) = self.lend(name).await {
                        return Ok(lease);
                    }
                }
                Err(e) => {
                    warn!(sandbox = %name, attempt, "Sandbox failed validation: {}", e);
                    self.destroy(&name).await;
                }
            }
        }

        warn!(waited = ?started.elapsed(), "No valid sandbox after {} attempts", self.config.acquire_attempts);
        Err(Error::PoolExhausted {
            waited: started.elapsed(),
        })
    }

    /// Hand out a validated candidate, unless shutdown claimed it meanwhile
    async fn lend(self: &Arc<Self>, name: String) -> Option<Lease> {
        {
            let mut state = self.state.lock().await;
            if state.state_of(&name) != SandboxState::Validating {
                debug!(sandbox = %name, "Candidate was claimed while validating");
                return None;
            }
            state.set_state(&name, SandboxState::Leased);
        }
        debug!(sandbox = %name, "Sandbox leased");
        Some(Lease::new(self.clone(), name))
    }

    /// Get a candidate: an available sandbox, a new one, or whatever frees up
    /// before `wait` runs out. The flag tells whether it was just created.
    async fn obtain(&self, wait: Duration) -> Result<(String, bool)> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_shut_down() {
                return Err(Error::Internal("sandbox pool is shut down".to_string()));
            }

            if let Some(name) = self.state.lock().await.take_idle() {
                return Ok((name, false));
            }

            if let Some(name) = self.try_provision().await {
                return Ok((name, true));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("Sandbox pool exhausted after waiting {:?}", wait);
                return Err(Error::PoolExhausted { waited: wait });
            }
        }
    }

    /// Create one sandbox for an acquire miss, if the cap allows it
    async fn try_provision(&self) -> Option<String> {
        let _guard = self.provisioning.lock().await;

        let total = self.owned_total().await;
        if total >= self.config.max_total {
            debug!(total, max = self.config.max_total, "At capacity, not provisioning");
            return None;
        }

        match self.provision().await {
            Ok(name) => {
                self.state.lock().await.set_state(&name, SandboxState::Validating);
                Some(name)
            }
            Err(e) => {
                warn!("On-demand provisioning failed: {}", e);
                None
            }
        }
    }

    /// Sandboxes this instance owns, by the runtime's count when it answers
    ///
    /// Counting through the runtime keeps the cap correct across restarts
    /// that reuse an instance id.
    async fn owned_total(&self) -> usize {
        let local = self.state.lock().await.total();
        match self.runtime.list_sandboxes(&self.prefix).await {
            Ok(listed) => listed.len().max(local),
            Err(e) => {
                warn!("Failed to list sandboxes, using local count: {}", e);
                local
            }
        }
    }

    /// Create and start one sandbox; the slot is left in `Provisioning`
    async fn provision(&self) -> Result<String> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}{}", self.prefix, &suffix[..8]);

        let spec = SandboxSpec {
            name: name.clone(),
            image: self.container.image.clone(),
            limits: ResourceLimits {
                memory_bytes: self.container.memory_bytes(),
                nano_cpus: self.container.nano_cpus(),
            },
            command: keepalive_command(&self.container.workspace),
        };

        self.state.lock().await.track(&name);

        let created = tokio::time::timeout(self.config.provision_timeout, async {
            let handle = self.runtime.create_sandbox(&spec).await?;
            self.runtime.start_sandbox(&handle).await
        })
        .await
        .unwrap_or_else(|_| {
            Err(Error::ProvisionFailed(format!(
                "{} not ready after {:?}",
                name, self.config.provision_timeout
            )))
        });

        match created {
            Ok(()) => {
                debug!(sandbox = %name, "Sandbox provisioned");
                Ok(name)
            }
            Err(e) => {
                // A half-created sandbox must not count against the cap forever
                if let Err(cleanup) = self.runtime.remove_sandbox(&name).await {
                    if !cleanup.is_gone() {
                        warn!(sandbox = %name, "Failed to remove half-created sandbox: {}", cleanup);
                    }
                }
                self.state.lock().await.untrack(&name);
                Err(e)
            }
        }
    }

    /// Wipe the workspace and probe it
    async fn validate(&self, name: &str) -> Result<()> {
        let workspace = &self.container.workspace;

        let wiped = self
            .executor
            .shell(name, Step::Cleanup, wipe_script(workspace), self.config.cleanup_timeout)
            .await?;
        if !wiped.succeeded() {
            return Err(Error::ValidationFailed(format!(
                "{}: wipe exited with {:?}: {}",
                name,
                wiped.exit_code,
                wiped.stderr.trim()
            )));
        }

        let probe = self
            .executor
            .shell(name, Step::Probe, probe_script(workspace), self.config.validation_timeout)
            .await?;
        if !probe_passed(&probe.stdout) {
            return Err(Error::ValidationFailed(format!(
                "{}: probe answered {:?}",
                name,
                probe.stdout.trim()
            )));
        }

        Ok(())
    }

    /// Return a leased sandbox to the pool
    ///
    /// Never fails: any fault along the way destroys the sandbox instead.
    pub async fn release(&self, lease: Lease) {
        lease.release().await;
    }

    pub(crate) async fn release_name(&self, name: &str) {
        if self.is_shut_down() {
            debug!(sandbox = %name, "Released after shutdown, destroying");
            self.destroy(name).await;
            return;
        }

        if self.state.lock().await.state_of(name) != SandboxState::Leased {
            debug!(sandbox = %name, "Released sandbox is no longer leased, skipping");
            return;
        }

        if self.config.post_use_cleanup {
            let wiped = self
                .executor
                .shell(
                    name,
                    Step::Cleanup,
                    wipe_script(&self.container.workspace),
                    self.config.cleanup_timeout,
                )
                .await;
            match wiped {
                Ok(output) if output.succeeded() => {}
                Ok(output) => {
                    warn!(sandbox = %name, exit_code = ?output.exit_code, "Post-use wipe failed, destroying");
                    self.destroy(name).await;
                    return;
                }
                Err(e) => {
                    warn!(sandbox = %name, "Post-use wipe failed, destroying: {}", e);
                    self.destroy(name).await;
                    return;
                }
            }
        }

        let listed = self.runtime.list_sandboxes(&self.prefix).await.map(|l| l.len()).ok();

        let kept = {
            let mut state = self.state.lock().await;
            // Shutdown or a concurrent destroy may have claimed it meanwhile
            if state.state_of(name) != SandboxState::Leased {
                return;
            }
            let total = state.total().max(listed.unwrap_or(0));
            let keep = keep_on_release(
                state.available(),
                total,
                self.config.target_size,
                self.config.overflow_slack,
                self.config.max_total,
            );
            if keep {
                state.push_idle(name);
            }
            keep
        };

        if kept {
            debug!(sandbox = %name, "Sandbox returned to pool");
            self.changed.notify_waiters();
        } else {
            info!(sandbox = %name, "Pool over capacity, destroying released sandbox");
            self.destroy(name).await;
        }
    }

    /// Stop and remove `name`
    ///
    /// Concurrent calls for one name reach the runtime once; only the caller
    /// that ran the removal gets `true`. A failed removal is retried by the
    /// reaper.
    pub async fn destroy(&self, name: &str) -> bool {
        if !self.state.lock().await.claim_deletion(name) {
            debug!(sandbox = %name, "Destroy already in flight");
            return false;
        }
        self.teardown(name).await
    }

    /// Stop and remove a sandbox already claimed for deletion
    async fn teardown(&self, name: &str) -> bool {
        if let Err(e) = self.runtime.stop_sandbox(name).await {
            if !e.is_gone() {
                warn!(sandbox = %name, "Stop failed, forcing removal: {}", e);
            }
        }

        let removed = match self.runtime.remove_sandbox(name).await {
            Ok(()) => true,
            Err(e) if e.is_gone() => true,
            Err(e) => {
                error!(sandbox = %name, "Remove failed, will retry: {}", e);
                false
            }
        };

        self.state.lock().await.finish_deletion(name, removed);
        self.changed.notify_waiters();

        if removed {
            debug!(sandbox = %name, "Sandbox destroyed");
        }
        removed
    }

    /// Evict surplus idle sandboxes and retry failed removals
    ///
    /// Returns how many sandboxes were evicted for idleness.
    pub async fn reap(&self) -> usize {
        let (victims, retries) = {
            let mut state = self.state.lock().await;
            let victims: Vec<String> = state
                .reap_candidates(self.config.target_size, self.config.idle_timeout, Instant::now())
                .into_iter()
                .filter(|name| state.claim_deletion(name))
                .collect();
            let retries: Vec<String> = state
                .take_retries()
                .into_iter()
                .filter(|name| state.claim_deletion(name))
                .collect();
            (victims, retries)
        };

        for name in &retries {
            debug!(sandbox = %name, "Retrying removal");
            self.teardown(name).await;
        }

        let mut evicted = 0;
        for name in &victims {
            info!(sandbox = %name, "Evicting idle sandbox");
            if self.teardown(name).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Destroy sandboxes of this instance the runtime reports as exited or dead
    pub async fn purge_abnormal(&self) -> Result<Vec<String>> {
        let listed = self.runtime.list_sandboxes(&self.prefix).await?;
        let mut purged = Vec::new();
        for info in listed.into_iter().filter(|info| info.is_abnormal()) {
            warn!(sandbox = %info.name, state = ?info.state, "Purging abnormal sandbox");
            if self.destroy(&info.name).await {
                purged.push(info.name);
            }
        }
        Ok(purged)
    }

    /// Snapshot of pool health
    pub async fn status(&self) -> PoolStatus {
        let listed = self.runtime.list_sandboxes(&self.prefix).await.map(|l| l.len());
        let state = self.state.lock().await;
        let total = match listed {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to list sandboxes for status: {}", e);
                state.total()
            }
        };
        PoolStatus::new(
            state.available(),
            state.in_use(),
            total,
            self.config.max_total,
            self.config.target_size,
            state.recent(PoolStatus::RECENT_LIMIT, Instant::now()),
        )
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the reaper, destroy every sandbox of this instance, close the runtime
    ///
    /// Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Sandbox pool already shut down");
            return Ok(());
        }
        info!(instance = %self.instance_id, "Shutting down sandbox pool");

        // Wake waiting acquires so they observe the shutdown
        self.changed.notify_waiters();

        let reaper = self.reaper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }

        let idle = self.state.lock().await.idle_names();
        for name in &idle {
            self.destroy(name).await;
        }

        match self.runtime.list_sandboxes(&self.prefix).await {
            Ok(listed) => {
                for info in listed {
                    self.destroy(&info.name).await;
                }
            }
            Err(e) => error!("Failed to list sandboxes during shutdown: {}", e),
        }

        self.runtime.close().await?;
        info!("Sandbox pool shut down");
        Ok(())
    }
}
