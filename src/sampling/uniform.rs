use crate::core::sampler::{sealed, MaterializedSample, SampleAlgorithm, SamplerConfig};
use crate::error::{Result, SamplerError};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// 均匀窗口采样
///
/// 把采样切成 `m` 个长度为 `k` 的窗口，随机分布在整个范围内且互不重叠，
/// 既保留局部相邻字节，又覆盖全局。
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformSampler {
    // 0 表示 floor(sqrt(sample_size))
    window_size: usize,
    seed: Option<u64>,
}

impl UniformSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window_size(window_size: usize) -> Self {
        Self {
            window_size,
            seed: None,
        }
    }

    /// 固定随机种子，使窗口位置可复现
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    /// 计算 (window_size, windows_count)
    pub fn window_params(&self, sample_size: usize) -> (usize, usize) {
        let window_size = if self.window_size > 0 {
            self.window_size
        } else {
            isqrt(sample_size)
        };

        // 确保 window_size 至少为 1，避免除以零
        let window_size = window_size.max(1);

        let windows_count = sample_size / window_size;
        if windows_count == 0 {
            // 窗口比采样还大：退化为一个长度为 sample_size 的窗口
            return (sample_size, 1);
        }

        (window_size, windows_count)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

fn isqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt().floor() as usize;
    while root > 0 && root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// 生成排序后互不重叠的窗口起点（相对范围起点）
fn generate_windows<R: Rng>(
    rng: &mut R,
    data_size: usize,
    window_size: usize,
    windows_count: usize,
) -> Vec<usize> {
    let max_offset = data_size - windows_count * window_size;

    let mut windows: Vec<usize> = (0..windows_count)
        .map(|_| rng.gen_range(0..=max_offset))
        .collect();

    // 排序窗口位置
    windows.sort_unstable();

    // 调整位置避免重叠
    for (i, window) in windows.iter_mut().enumerate() {
        *window += i * window_size;
    }

    windows
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedSample {
    start: usize,
    window_size: usize,
    windows: Vec<usize>,
    buffer: Vec<u8>,
}

impl WindowedSample {
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// 窗口起点，相对于采样范围的起点
    pub fn windows(&self) -> &[usize] {
        &self.windows
    }
}

impl sealed::Sealed for UniformSampler {}

impl SampleAlgorithm for UniformSampler {
    type Sample = WindowedSample;

    const NAME: &'static str = "uniform";

    fn prepare(&self, source: &[u8], config: &SamplerConfig) -> Result<WindowedSample> {
        if config.end > source.len() || config.start > config.end {
            return Err(SamplerError::InvalidRange {
                start: config.start,
                end: config.end,
                len: source.len(),
            });
        }
        if !config.requires_reduction() {
            return Err(SamplerError::PrepareFailed(format!(
                "sample size {} does not reduce range of {} bytes",
                config.sample_size,
                config.data_size()
            )));
        }

        let data = &source[config.start..config.end];
        let (window_size, windows_count) = self.window_params(config.sample_size);
        let windows = generate_windows(&mut self.rng(), data.len(), window_size, windows_count);

        // 并行提取数据
        let mut buffer = vec![0u8; window_size * windows_count];
        buffer
            .par_chunks_mut(window_size)
            .zip(windows.par_iter())
            .for_each(|(chunk, &offset)| {
                chunk.copy_from_slice(&data[offset..offset + window_size]);
            });

        Ok(WindowedSample {
            start: config.start,
            window_size,
            windows,
            buffer,
        })
    }
}

impl MaterializedSample for WindowedSample {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn bytes<'a>(&'a self, _source: &'a [u8]) -> &'a [u8] {
        &self.buffer
    }

    fn file_offset(&self, index: usize) -> usize {
        let last = self.windows.len() - 1;
        if index >= self.len() {
            return self.start + self.windows[last] + self.window_size;
        }
        let window = index / self.window_size;
        self.start + self.windows[window] + index % self.window_size
    }

    fn sample_offset(&self, address: usize) -> usize {
        let relative = address.saturating_sub(self.start);
        // 最后一个起点 <= relative 的窗口
        let window = self
            .windows
            .partition_point(|&w| w <= relative)
            .saturating_sub(1);
        let delta = relative
            .saturating_sub(self.windows[window])
            .min(self.window_size - 1);
        window * self.window_size + delta
    }
}
