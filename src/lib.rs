//! 二进制可视化的自适应采样引擎
//!
//! 从（可能很大的）字节缓冲中取出大小受限的代表性样本，供可视化等昂贵的
//! 下游消费者使用。采样可以同步完成，也可以交给后台线程池异步完成。

pub mod config;
pub mod core;
pub mod error;
pub mod sampling;

pub use crate::config::Config;
pub use crate::core::{
    CallbackId, MaterializedSample, SampleAlgorithm, SampleMetadata, Sampler, SamplerConfig,
    SamplerGuard, Scheduler, SourceView,
};
pub use crate::error::{Result, SamplerError, SchedulingError};
pub use crate::sampling::{IdentitySampler, UniformSampler};
