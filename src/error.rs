// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DelayTaskError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid interval {0}: must be greater than zero")]
    InvalidInterval(i64),

    #[error("Task name must not be empty")]
    InvalidTaskName,

    #[error("Invalid queue options: {0}")]
    InvalidOptions(String),

    #[error("Task handler failed: {0}")]
    Handler(#[from] anyhow::Error),

    #[error("Sweeper error: {0}")]
    Sweeper(String),
}

pub type Result<T> = std::result::Result<T, DelayTaskError>;
