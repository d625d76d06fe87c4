use dtaskq::{SweeperBuilder, TaskContext, TaskHandler, async_trait};
use std::sync::Arc;
use std::time::Duration;

struct PrintReminder;

#[async_trait]
impl TaskHandler for PrintReminder {
    async fn handle(&self, ctx: &TaskContext, payload: String) -> anyhow::Result<()> {
        println!(
            "[sweeper {}] tick={} task='{}' payload={}",
            ctx.sweeper_id, ctx.tick, ctx.taskname, payload
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let mut sweeper = SweeperBuilder::new_with_redis_uri(redis_url, "reminders")
        .with_handler(Arc::new(PrintReminder))
        .with_concurrency(4)
        .with_poll_interval(Duration::from_millis(250))
        .spawn()
        .await?;

    println!("[sweeper] running. Press Ctrl+C to stop.");
    sweeper.run().await?;

    let stats = sweeper.get_stats();
    println!(
        "[sweeper] stopped: processed={} failed={}",
        stats.processed, stats.failed
    );
    Ok(())
}
