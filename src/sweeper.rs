// src/sweeper.rs
use crate::{DelayQueue, DelayTaskError, QueueOptions, Result, Sweep, TaskContext};
use redis::Client;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::{
    sync::{Semaphore, broadcast},
    task::JoinHandle,
    time::{Duration, interval, timeout},
};
use tracing::{Instrument, error, info, warn};

/// Consumer of due payloads. Failures are logged and the payload is dropped;
/// a popped task is never put back.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &TaskContext, payload: String) -> anyhow::Result<()>;
}

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub queue_options: QueueOptions,
    pub taskname: String,
    /// Bucket width; falls back to `queue_options.default_interval`
    pub interval: Option<i64>,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub sweeper_id: String,
    pub shutdown_timeout: Duration,
    pub handle_signals: bool,
}

impl SweeperConfig {
    pub fn new(taskname: impl Into<String>) -> Self {
        Self {
            queue_options: QueueOptions::default(),
            taskname: taskname.into(),
            interval: None,
            concurrency: 10,
            poll_interval: Duration::from_millis(100),
            sweeper_id: format!("sweeper-{}", uuid::Uuid::new_v4()),
            shutdown_timeout: Duration::from_secs(30),
            handle_signals: true,
        }
    }

    fn effective_interval(&self) -> i64 {
        self.interval.unwrap_or(self.queue_options.default_interval)
    }
}

enum QueueSource {
    Url,
    Client(Client),
    Shared(Arc<DelayQueue>),
}

/// Sweeper builder for fluent configuration
pub struct SweeperBuilder {
    config: SweeperConfig,
    source: QueueSource,
    handler: Option<Arc<dyn TaskHandler>>,
}

impl SweeperBuilder {
    pub fn new_with_redis_uri(redis_url: impl Into<String>, taskname: impl Into<String>) -> Self {
        let mut config = SweeperConfig::new(taskname);
        config.queue_options.redis_url = redis_url.into();

        Self {
            config,
            source: QueueSource::Url,
            handler: None,
        }
    }

    pub fn new_with_redis_instance(redis_client: Client, taskname: impl Into<String>) -> Self {
        Self {
            config: SweeperConfig::new(taskname),
            source: QueueSource::Client(redis_client),
            handler: None,
        }
    }

    /// Share an existing queue (and its clock) with the sweeper
    pub fn new_with_queue(queue: Arc<DelayQueue>, taskname: impl Into<String>) -> Self {
        let mut config = SweeperConfig::new(taskname);
        config.queue_options = queue.options().clone();

        Self {
            config,
            source: QueueSource::Shared(queue),
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Ignored when the sweeper shares an existing queue
    pub fn with_queue_options(mut self, options: QueueOptions) -> Self {
        if !matches!(self.source, QueueSource::Shared(_)) {
            self.config.queue_options = options;
        }
        self
    }

    pub fn with_interval(mut self, interval: i64) -> Self {
        self.config.interval = Some(interval);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn with_sweeper_id(mut self, id: impl Into<String>) -> Self {
        self.config.sweeper_id = id.into();
        self
    }

    /// Install SIGINT/SIGTERM handlers on `start` (on by default)
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    pub async fn spawn(self) -> Result<Sweeper> {
        let handler = self
            .handler
            .ok_or_else(|| DelayTaskError::Sweeper("Task handler is required".to_string()))?;
        if self.config.concurrency == 0 {
            return Err(DelayTaskError::Sweeper(
                "Concurrency must be greater than zero".to_string(),
            ));
        }
        if self.config.poll_interval.is_zero() {
            return Err(DelayTaskError::Sweeper(
                "Poll interval must be greater than zero".to_string(),
            ));
        }
        crate::tick::ensure_interval(self.config.effective_interval())?;
        crate::keys::ensure_taskname(&self.config.taskname)?;

        let queue = match self.source {
            QueueSource::Url => Arc::new(DelayQueue::new(self.config.queue_options.clone()).await?),
            QueueSource::Client(client) => Arc::new(
                DelayQueue::with_client(client, self.config.queue_options.clone()).await?,
            ),
            QueueSource::Shared(queue) => queue,
        };

        Ok(Sweeper::new(self.config, queue, handler))
    }
}

/// Polls the shared cursor for one task name and feeds due payloads to a
/// handler with bounded concurrency
pub struct Sweeper {
    config: SweeperConfig,
    queue: Arc<DelayQueue>,
    handler: Arc<dyn TaskHandler>,
    semaphore: Arc<Semaphore>,
    loop_handle: Option<JoinHandle<()>>,
    signal_handle: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    is_shutting_down: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl Sweeper {
    fn new(config: SweeperConfig, queue: Arc<DelayQueue>, handler: Arc<dyn TaskHandler>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            queue,
            handler,
            semaphore,
            loop_handle: None,
            signal_handle: None,
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn the sweep loop (and signal watcher) and return immediately
    pub fn start(&mut self) -> Result<()> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return Err(DelayTaskError::Sweeper(
                "Sweeper has already been shut down".to_string(),
            ));
        }
        if self.loop_handle.is_some() {
            return Err(DelayTaskError::Sweeper("Sweeper already started".to_string()));
        }

        info!(
            "Starting sweeper {} for '{}' with concurrency {}",
            self.config.sweeper_id, self.config.taskname, self.config.concurrency
        );

        if self.config.handle_signals {
            self.signal_handle = Some(self.spawn_signal_watcher());
        }
        self.loop_handle = Some(self.spawn_sweep_loop());

        info!("Sweeper started successfully");
        Ok(())
    }

    /// Start, then block until a shutdown signal or `shutdown_trigger` fires and
    /// drain in-flight tasks
    pub async fn run(&mut self) -> Result<()> {
        self.start()?;

        if let Some(mut shutdown_rx) = self.shutdown_rx.take() {
            shutdown_rx.recv().await.ok();
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    /// Stop polling and wait (up to the shutdown timeout) for running handlers
    pub async fn stop(&mut self) {
        info!("Stop requested for sweeper {}", self.config.sweeper_id);
        let _ = self.shutdown_tx.send(());
        self.graceful_shutdown().await;
    }

    /// Sender that triggers shutdown of a sweeper blocked in `run`
    pub fn shutdown_trigger(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Abort everything without waiting for handlers. Payloads already popped
    /// but not yet handed to a handler are lost.
    pub fn force_stop(&mut self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        for handle in [self.loop_handle.take(), self.signal_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    fn spawn_signal_watcher(&self) -> JoinHandle<()> {
        let shutdown_tx = self.shutdown_tx.clone();
        let sweeper_id = self.config.sweeper_id.clone();

        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("Shutdown signal received by sweeper {}", sweeper_id);
            let _ = shutdown_tx.send(());
        })
    }

    async fn wait_for_shutdown_signal() {
        use tokio::signal;

        #[cfg(unix)]
        {
            use signal::unix::{SignalKind, signal};

            match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("SIGTERM received"),
                        _ = sigint.recv() => info!("SIGINT received"),
                    }
                }
                _ => {
                    warn!("Failed to install unix signal handlers, falling back to CTRL+C");
                    if signal::ctrl_c().await.is_ok() {
                        info!("CTRL+C received");
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if signal::ctrl_c().await.is_ok() {
                info!("CTRL+C received");
            }
        }
    }

    async fn graceful_shutdown(&mut self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Initiating graceful shutdown for sweeper {}",
            self.config.sweeper_id
        );

        if let Some(handle) = self.signal_handle.take() {
            handle.abort();
        }
        let _ = self.shutdown_tx.send(());

        // The loop finishes dispatching the batch it holds before exiting, so
        // every popped payload reaches a handler.
        let loop_handle = self.loop_handle.take();
        let drained = timeout(self.config.shutdown_timeout, async {
            if let Some(handle) = loop_handle {
                if let Err(e) = handle.await {
                    error!("Sweep loop ended abnormally: {}", e);
                }
            }
            let active = self.active_tasks();
            if active > 0 {
                info!("Waiting for {} active tasks to complete...", active);
                self.wait_for_tasks_completion().await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All tasks completed during shutdown"),
            Err(_) => warn!(
                "Shutdown timeout reached. {} tasks may still be running",
                self.active_tasks()
            ),
        }

        info!("Sweeper {} shutdown complete", self.config.sweeper_id);
    }

    async fn wait_for_tasks_completion(&self) {
        // Holding every permit means no handler is running.
        if let Ok(permits) = self
            .semaphore
            .clone()
            .acquire_many_owned(self.config.concurrency as u32)
            .await
        {
            drop(permits);
        }
    }

    fn active_tasks(&self) -> usize {
        self.config.concurrency - self.semaphore.available_permits()
    }

    fn spawn_sweep_loop(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let semaphore = Arc::clone(&self.semaphore);
        let is_shutting_down = Arc::clone(&self.is_shutting_down);
        let processed = Arc::clone(&self.processed);
        let failed = Arc::clone(&self.failed);
        let taskname = self.config.taskname.clone();
        let sweeper_id = self.config.sweeper_id.clone();
        let task_interval = self.config.effective_interval();
        let poll_interval = self.config.poll_interval;
        let batch_limit = queue.options().batch_limit;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);

            loop {
                // Shutdown is only observed between sweeps; a popped batch is
                // always dispatched in full.
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop stopping - shutdown initiated");
                        break;
                    }
                }
                if is_shutting_down.load(Ordering::SeqCst) {
                    info!("Sweep loop stopping - shutdown initiated");
                    break;
                }

                // Keep pulling without waiting while batches come back full or
                // the cursor is still catching up.
                loop {
                    let sweep = match queue.sweep(&taskname, task_interval).await {
                        Ok(sweep) => sweep,
                        Err(e) => {
                            error!("Failed to pull tasks for '{}': {}", taskname, e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            break;
                        }
                    };

                    let again = sweep.tasks.len() >= batch_limit
                        || (sweep.advanced && !sweep.caught_up());

                    Self::dispatch(
                        &sweep,
                        &sweeper_id,
                        &handler,
                        &semaphore,
                        &processed,
                        &failed,
                    )
                    .await;

                    if !again || is_shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }

            info!("Sweep loop terminated");
        })
    }

    async fn dispatch(
        sweep: &Sweep,
        sweeper_id: &str,
        handler: &Arc<dyn TaskHandler>,
        semaphore: &Arc<Semaphore>,
        processed: &Arc<AtomicU64>,
        failed: &Arc<AtomicU64>,
    ) {
        for payload in &sweep.tasks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Failed to acquire semaphore permit");
                    return;
                }
            };

            let ctx = TaskContext::new(sweep.taskname.clone(), sweep.tick, sweeper_id);
            let handler = Arc::clone(handler);
            let processed = Arc::clone(processed);
            let failed = Arc::clone(failed);
            let payload = payload.clone();
            let span = ctx.span.clone();

            tokio::spawn(
                async move {
                    let _permit = permit;
                    let start_time = std::time::Instant::now();

                    match handler.handle(&ctx, payload).await {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::SeqCst);
                            info!("Task completed in {:?}", start_time.elapsed());
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                            error!("Task failed, dropping payload: {:#}", e);
                        }
                    }
                }
                .instrument(span),
            );
        }
    }

    pub fn queue(&self) -> &Arc<DelayQueue> {
        &self.queue
    }

    /// Get sweeper statistics
    pub fn get_stats(&self) -> SweeperStats {
        SweeperStats {
            sweeper_id: self.config.sweeper_id.clone(),
            taskname: self.config.taskname.clone(),
            concurrency: self.config.concurrency,
            active_tasks: self.active_tasks(),
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            is_shutting_down: self.is_shutting_down.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweeperStats {
    pub sweeper_id: String,
    pub taskname: String,
    pub concurrency: usize,
    pub active_tasks: usize,
    pub processed: u64,
    pub failed: u64,
    pub is_shutting_down: bool,
}
