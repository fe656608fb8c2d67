use crate::core::sampler::{sealed, MaterializedSample, SampleAlgorithm, SamplerConfig};
use crate::error::Result;

/// 不做任何缩减，读取直接落到原始数据上
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySampler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySample {
    start: usize,
    end: usize,
}

impl sealed::Sealed for IdentitySampler {}

impl SampleAlgorithm for IdentitySampler {
    type Sample = IdentitySample;

    const NAME: &'static str = "identity";

    fn prepare(&self, _source: &[u8], config: &SamplerConfig) -> Result<IdentitySample> {
        Ok(IdentitySample {
            start: config.start,
            end: config.end,
        })
    }
}

impl MaterializedSample for IdentitySample {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn bytes<'a>(&'a self, source: &'a [u8]) -> &'a [u8] {
        &source[self.start..self.end]
    }

    fn file_offset(&self, index: usize) -> usize {
        self.start + index.min(self.len())
    }

    fn sample_offset(&self, address: usize) -> usize {
        address.saturating_sub(self.start).min(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_reads_range() {
        let source: Vec<u8> = (0..50).collect();
        let sample = IdentitySampler
            .prepare(&source, &SamplerConfig::new(10, 20, 5))
            .unwrap();

        assert_eq!(sample.len(), 10);
        assert_eq!(sample.bytes(&source), &source[10..20]);
        assert_eq!(sample.file_offset(0), 10);
        assert_eq!(sample.file_offset(10), 20);
        assert_eq!(sample.sample_offset(15), 5);
        assert_eq!(sample.sample_offset(3), 0);
        assert_eq!(sample.sample_offset(40), 10);
    }
}
