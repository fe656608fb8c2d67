use crate::error::Result;
use serde::{Deserialize, Serialize};

/// 一次采样请求的配置快照
///
/// 创建后不再修改。后台准备阶段只读这个快照，不接触引擎的实时状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub start: usize,
    pub end: usize,
    /// 期望的采样大小，仅作提示；0 表示不缩减
    pub sample_size: usize,
}

impl SamplerConfig {
    pub fn new(start: usize, end: usize, sample_size: usize) -> Self {
        Self {
            start,
            end,
            sample_size,
        }
    }

    pub fn data_size(&self) -> usize {
        self.end - self.start
    }

    pub fn requires_reduction(&self) -> bool {
        self.sample_size > 0 && self.sample_size < self.data_size()
    }

    pub fn with_range(self, start: usize, end: usize) -> Self {
        Self { start, end, ..self }
    }

    pub fn with_sample_size(self, sample_size: usize) -> Self {
        Self {
            sample_size,
            ..self
        }
    }
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// 已物化的采样结果
///
/// `source` 总是完整的原始数据；无需物化缓冲的算法直接从中切片。
pub trait MaterializedSample: Clone + Send + Sync + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bytes<'a>(&'a self, source: &'a [u8]) -> &'a [u8];

    /// 采样索引 -> 文件偏移（绝对偏移）
    fn file_offset(&self, index: usize) -> usize;

    /// 文件偏移（绝对偏移）-> 采样索引
    fn sample_offset(&self, address: usize) -> usize;
}

/// 采样算法
///
/// `prepare` 是纯函数，在后台线程上无锁执行；`apply` 与 `cleanup` 在引擎锁内
/// 调用，且每个准备好的结果只会被二者之一按值消费一次。
pub trait SampleAlgorithm: sealed::Sealed + Clone + Send + Sync + 'static {
    type Sample: MaterializedSample;

    const NAME: &'static str;

    fn prepare(&self, source: &[u8], config: &SamplerConfig) -> Result<Self::Sample>;

    fn apply(&self, live: &mut Option<Self::Sample>, prepared: Self::Sample) {
        *live = Some(prepared);
    }

    fn cleanup(&self, prepared: Self::Sample) {
        drop(prepared);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub original_size: usize,
    pub sample_size: usize,
    pub method: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_reduction() {
        let config = SamplerConfig::new(0, 100, 0);
        assert!(!config.requires_reduction());
        assert!(!config.with_sample_size(100).requires_reduction());
        assert!(!config.with_sample_size(120).requires_reduction());
        assert!(config.with_sample_size(99).requires_reduction());
        assert!(!config.with_range(10, 20).with_sample_size(10).requires_reduction());
        assert!(config.with_range(10, 20).with_sample_size(9).requires_reduction());
    }
}
