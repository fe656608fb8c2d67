use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    // 配置错误
    #[error("Source is empty")]
    EmptySource,
    #[error("Invalid range: {start}..{end} (source length {len})")]
    InvalidRange { start: usize, end: usize, len: usize },

    // 采样错误
    #[error("Sampling failed: {0}")]
    PrepareFailed(String),

    // 调度错误
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
    #[error("Topic has no workers: {0}")]
    NoWorkers(String),
    #[error("Topic is not a mock topic: {0}")]
    NotManual(String),
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

// 便捷的Result类型
pub type Result<T> = std::result::Result<T, SamplerError>;
