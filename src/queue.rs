// src/queue.rs
use crate::{
    Clock, DelayTaskError, Result, SystemClock, keys, lua::LuaScripts,
    tick::{self, DEFAULT_INTERVAL},
};
use redis::{AsyncCommands, Client as RedisClient, aio::MultiplexedConnection};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Options for queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub redis_url: String,
    /// Bucket width in milliseconds used by `push_task` / `pull_task`
    pub default_interval: i64,
    /// Lifetime of a bucket after its most recent push
    pub bucket_ttl_secs: u64,
    /// Lifetime of the sweeper cursor after its most recent pull
    pub cursor_ttl_secs: u64,
    /// Max payloads popped per pull
    pub batch_limit: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            default_interval: DEFAULT_INTERVAL,
            bucket_ttl_secs: 24 * 60 * 60, // 1 day
            cursor_ttl_secs: 2 * 60 * 60,  // 2 hours
            batch_limit: 100,
        }
    }
}

impl QueueOptions {
    pub fn validate(&self) -> Result<()> {
        tick::ensure_interval(self.default_interval)?;
        if self.bucket_ttl_secs == 0 {
            return Err(DelayTaskError::InvalidOptions(
                "bucket_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.cursor_ttl_secs == 0 {
            return Err(DelayTaskError::InvalidOptions(
                "cursor_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.batch_limit == 0 {
            return Err(DelayTaskError::InvalidOptions(
                "batch_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_secs)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_secs)
    }
}

/// Outcome of one pull script run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sweep {
    pub taskname: String,
    /// Cursor position the batch was popped from
    pub tick: i64,
    /// Matured tick the script was run against
    pub matured_tick: i64,
    /// Whether the cursor moved forward one tick during this run
    pub advanced: bool,
    pub tasks: Vec<String>,
}

impl Sweep {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cursor value left in the store after this run
    pub fn next_tick(&self) -> i64 {
        if self.advanced { self.tick + 1 } else { self.tick }
    }

    /// Whether the cursor has reached the matured tick
    pub fn caught_up(&self) -> bool {
        self.next_tick() >= self.matured_tick
    }

    /// Decode payloads that were pushed with [`DelayQueue::push_json`]
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.tasks
            .iter()
            .map(|task| serde_json::from_str(task).map_err(DelayTaskError::from))
            .collect()
    }
}

/// Redis-backed delay queue. Producers push into tick buckets, sweepers pull
/// from the bucket under a shared per-task cursor.
pub struct DelayQueue {
    client: RedisClient,
    connection: MultiplexedConnection,
    options: QueueOptions,
    scripts: LuaScripts,
    clock: Arc<dyn Clock>,
}

impl DelayQueue {
    pub async fn new(options: QueueOptions) -> Result<Self> {
        let client = RedisClient::open(options.redis_url.as_str())?;
        Self::with_client(client, options).await
    }

    pub async fn with_client(client: RedisClient, options: QueueOptions) -> Result<Self> {
        options.validate()?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            client,
            connection,
            options,
            scripts: LuaScripts::new(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for pull maturity and `push_after`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Push `content` into the bucket for `tick_time` using the default interval
    pub async fn push_task(&self, taskname: &str, tick_time: i64, content: &str) -> Result<usize> {
        self.push_task_internal(taskname, tick_time, content, self.options.default_interval)
            .await
    }

    /// Push `content` to be due `delay` from now on the queue's clock
    pub async fn push_after(&self, taskname: &str, delay: Duration, content: &str) -> Result<usize> {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let tick_time = self.clock.now_millis().saturating_add(delay_ms);
        self.push_task(taskname, tick_time, content).await
    }

    /// Serialize `task` as JSON and push it
    pub async fn push_json<T: Serialize>(
        &self,
        taskname: &str,
        tick_time: i64,
        task: &T,
    ) -> Result<usize> {
        let content = serde_json::to_string(task)?;
        self.push_task(taskname, tick_time, &content).await
    }

    /// Append `content` to the bucket `ceil(tick_time / interval)` and refresh
    /// the bucket TTL in one script run. Returns the bucket length.
    ///
    /// Not idempotent: pushing the same content twice delivers it twice.
    #[instrument(skip(self, content), level = "debug")]
    pub async fn push_task_internal(
        &self,
        taskname: &str,
        tick_time: i64,
        content: &str,
        interval: i64,
    ) -> Result<usize> {
        keys::ensure_taskname(taskname)?;
        let tick = tick::push_tick(tick_time, interval)?;
        let bucket_key = keys::bucket_key(taskname, tick);

        let mut con = self.connection.clone();
        let len: usize = self
            .scripts
            .push
            .key(&bucket_key)
            .arg(content)
            .arg(self.options.bucket_ttl_secs)
            .invoke_async(&mut con)
            .await?;

        debug!(tick, bucket_len = len, "task pushed");
        Ok(len)
    }

    /// Pull the next batch using the default interval
    pub async fn pull_task(&self, taskname: &str) -> Result<Vec<String>> {
        self.pull_task_internal(taskname, self.options.default_interval)
            .await
    }

    /// Pull up to `batch_limit` due payloads. An empty result means nothing is
    /// due right now.
    pub async fn pull_task_internal(&self, taskname: &str, interval: i64) -> Result<Vec<String>> {
        Ok(self.sweep(taskname, interval).await?.tasks)
    }

    /// Run the pull script once and report where the cursor stood.
    ///
    /// The cursor is seeded at the matured tick on first use, stays put while
    /// its bucket yields payloads, and moves forward one tick per run once the
    /// bucket is empty, never beyond the matured tick.
    #[instrument(skip(self), level = "debug")]
    pub async fn sweep(&self, taskname: &str, interval: i64) -> Result<Sweep> {
        keys::ensure_taskname(taskname)?;
        let matured_tick = tick::matured_tick(self.clock.now_millis(), interval)?;

        let mut con = self.connection.clone();
        let (cursor, advanced, tasks): (i64, i64, Vec<String>) = self
            .scripts
            .pull
            .key(keys::cursor_key(taskname))
            .arg(matured_tick)
            .arg(self.options.cursor_ttl_secs)
            .arg(self.options.batch_limit)
            .arg(keys::bucket_key_prefix(taskname))
            .invoke_async(&mut con)
            .await?;

        let sweep = Sweep {
            taskname: taskname.to_string(),
            tick: cursor,
            matured_tick,
            advanced: advanced != 0,
            tasks,
        };

        debug!(
            cursor = sweep.tick,
            matured_tick,
            advanced = sweep.advanced,
            popped = sweep.tasks.len(),
            "sweep finished"
        );
        Ok(sweep)
    }

    /// Current cursor for `taskname`, if one has been seeded and not expired
    pub async fn cursor(&self, taskname: &str) -> Result<Option<i64>> {
        let mut con = self.connection.clone();
        let cursor: Option<i64> = con.get(keys::cursor_key(taskname)).await?;
        Ok(cursor)
    }

    /// Number of payloads waiting in one bucket
    pub async fn bucket_len(&self, taskname: &str, tick: i64) -> Result<usize> {
        let mut con = self.connection.clone();
        let len: usize = con.llen(keys::bucket_key(taskname, tick)).await?;
        Ok(len)
    }
}
