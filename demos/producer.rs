use dtaskq::{DelayQueue, QueueOptions};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct Reminder {
    user_id: String,
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let queue = DelayQueue::new(QueueOptions {
        redis_url,
        ..Default::default()
    })
    .await?;

    for (i, delay_secs) in [1u64, 3, 5].into_iter().enumerate() {
        let reminder = Reminder {
            user_id: format!("u{}", i),
            message: format!("ping after {}s", delay_secs),
        };
        let due = queue.now_millis() + (delay_secs * 1000) as i64;
        let len = queue.push_json("reminders", due, &reminder).await?;
        println!(
            "[producer] scheduled {} in {}s (bucket now holds {})",
            reminder.user_id, delay_secs, len
        );
    }

    queue
        .push_after("reminders", Duration::from_secs(2), "plain text payload")
        .await?;
    println!("[producer] scheduled a plain payload in 2s");

    Ok(())
}
