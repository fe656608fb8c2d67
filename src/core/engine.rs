//! 自适应采样引擎
//!
//! 引擎持有原始数据视图和当前的采样配置。每次配置变化都会请求一个新版本：
//! 同步模式下直接在调用线程上完成；异步模式下把准备阶段交给调度器的主题，
//! 完成时只有版本号仍然最新的结果会被应用，过期的结果直接清理掉。

use crate::config::Config;
use crate::core::sampler::{MaterializedSample, SampleAlgorithm, SampleMetadata, SamplerConfig};
use crate::core::scheduler::{panic_message, Scheduler};
use crate::core::source::SourceView;
use crate::error::{Result, SamplerError, SchedulingError};
use crate::sampling::UniformSampler;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const DEFAULT_TOPIC: &str = "visualization";

pub type Callback = Box<dyn FnMut() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u32);

struct EngineState<S> {
    // 最近一次请求的配置
    pending: SamplerConfig,
    // 当前已物化数据对应的配置
    current: SamplerConfig,
    live: Option<S>,
    callbacks: BTreeMap<CallbackId, Callback>,
    next_callback_id: u32,
    allow_async: bool,
    // 准备失败的版本及错误，仅在该版本仍是当前版本时报告
    failure: Option<(u64, SamplerError)>,
}

enum Outcome<S> {
    Passthrough,
    Prepared(Result<S>),
}

struct Shared<A: SampleAlgorithm> {
    source: Arc<dyn SourceView>,
    algorithm: A,
    scheduler: Option<Arc<Scheduler>>,
    topic: String,
    state: Mutex<EngineState<A::Sample>>,
    finished: Condvar,
    // 只在持有锁时修改，无锁读取仅供 is_finished 使用
    current_version: AtomicU64,
    requested_version: AtomicU64,
}

impl<A: SampleAlgorithm> Shared<A> {
    fn prepare(&self, config: &SamplerConfig) -> Result<A::Sample> {
        let source = self.source.bytes();
        panic::catch_unwind(AssertUnwindSafe(|| self.algorithm.prepare(source, config)))
            .unwrap_or_else(|payload| Err(SamplerError::PrepareFailed(panic_message(&*payload))))
    }

    /// 取出最新版本的准备错误；更早版本的错误已被后续结果取代
    fn take_failure(&self, state: &mut EngineState<A::Sample>) -> Result<()> {
        match state.failure.take() {
            Some((version, e)) if version == self.current_version.load(Ordering::Acquire) => Err(e),
            _ => Ok(()),
        }
    }

    fn is_finished(&self) -> bool {
        self.current_version.load(Ordering::Acquire) == self.requested_version.load(Ordering::Acquire)
    }

    fn wait_locked(&self, state: &mut MutexGuard<'_, EngineState<A::Sample>>) {
        if !state.allow_async {
            return;
        }
        while !self.is_finished() {
            self.finished.wait(state);
        }
    }

    /// 应用或丢弃版本 `version` 的结果。只有比当前版本新的结果才会被应用。
    fn complete_locked(
        &self,
        state: &mut EngineState<A::Sample>,
        version: u64,
        config: SamplerConfig,
        outcome: Outcome<A::Sample>,
    ) -> Result<()> {
        let current = self.current_version.load(Ordering::Acquire);
        if version <= current {
            match outcome {
                Outcome::Prepared(Ok(sample)) => self.algorithm.cleanup(sample),
                Outcome::Prepared(Err(e)) => {
                    warn!("Superseded sample version {} failed: {}", version, e);
                }
                Outcome::Passthrough => {}
            }
            debug!("Discarded sample version {} (current {})", version, current);
            return Ok(());
        }

        let result = match outcome {
            Outcome::Passthrough => {
                state.live = None;
                state.current = config;
                state.failure = None;
                Ok(())
            }
            Outcome::Prepared(Ok(sample)) => {
                self.algorithm.apply(&mut state.live, sample);
                state.current = config;
                state.failure = None;
                Ok(())
            }
            Outcome::Prepared(Err(e)) => {
                // 保留上一次的采样，版本照常推进以唤醒等待者
                error!("Sample version {} failed: {}", version, e);
                Err(e)
            }
        };

        self.current_version.store(version, Ordering::Release);
        self.finished.notify_all();

        if result.is_ok() {
            // 后注册的先调用
            for callback in state.callbacks.values_mut().rev() {
                callback();
            }
        }

        result
    }
}

/// 采样引擎
pub struct Sampler<A: SampleAlgorithm = UniformSampler> {
    shared: Arc<Shared<A>>,
}

impl<A: SampleAlgorithm> Sampler<A> {
    /// 同步采样引擎；范围为整个数据，不缩减
    pub fn new<S: SourceView>(source: Arc<S>, algorithm: A) -> Self {
        Self::build(source, algorithm, None, DEFAULT_TOPIC.to_string())
    }

    /// 可以把准备阶段交给 `scheduler` 的 `topic` 主题执行（需要 `allow_async(true)`）
    pub fn with_scheduler<S: SourceView>(
        source: Arc<S>,
        algorithm: A,
        scheduler: Arc<Scheduler>,
        topic: impl Into<String>,
    ) -> Self {
        Self::build(source, algorithm, Some(scheduler), topic.into())
    }

    fn build<S: SourceView>(
        source: Arc<S>,
        algorithm: A,
        scheduler: Option<Arc<Scheduler>>,
        topic: String,
    ) -> Self {
        let config = SamplerConfig::new(0, source.len(), 0);
        let source: Arc<dyn SourceView> = source;

        Self {
            shared: Arc::new(Shared {
                source,
                algorithm,
                scheduler,
                topic,
                state: Mutex::new(EngineState {
                    pending: config,
                    current: config,
                    live: None,
                    callbacks: BTreeMap::new(),
                    next_callback_id: 0,
                    allow_async: false,
                    failure: None,
                }),
                finished: Condvar::new(),
                current_version: AtomicU64::new(0),
                requested_version: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_range(&self, start: usize, end: usize) -> Result<()> {
        let len = self.shared.source.len();
        if len == 0 {
            return Err(SamplerError::EmptySource);
        }
        if start > end || end > len {
            return Err(SamplerError::InvalidRange { start, end, len });
        }

        self.update(|config| config.with_range(start, end))
    }

    pub fn set_sample_size(&self, sample_size: usize) -> Result<()> {
        self.update(|config| config.with_sample_size(sample_size))
    }

    /// 以当前配置重新采样（随机算法会得到新的窗口）
    pub fn resample(&self) -> Result<()> {
        self.update(|config| config)
    }

    /// 切换同步/异步模式。调用前必须没有正在进行的采样。
    pub fn allow_async(&self, allow: bool) {
        self.shared.state.lock().allow_async = allow;
    }

    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(SamplerConfig) -> SamplerConfig,
    {
        let shared = &self.shared;
        let (config, version, allow_async) = {
            let mut state = shared.state.lock();
            let config = change(state.pending);
            state.pending = config;
            let version = shared.requested_version.fetch_add(1, Ordering::AcqRel) + 1;

            // 不需要采样：直接完成，不付出异步延迟
            if !config.requires_reduction() {
                return shared.complete_locked(&mut state, version, config, Outcome::Passthrough);
            }

            (config, version, state.allow_async)
        };

        if allow_async {
            match self.schedule(version, config) {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Falling back to synchronous sampling: {}", e),
            }
        }

        let result = shared.prepare(&config);
        let mut state = shared.state.lock();
        shared.complete_locked(&mut state, version, config, Outcome::Prepared(result))
    }

    fn schedule(&self, version: u64, config: SamplerConfig) -> std::result::Result<(), SchedulingError> {
        let scheduler = self
            .shared
            .scheduler
            .as_ref()
            .ok_or_else(|| SchedulingError::UnknownTopic(self.shared.topic.clone()))?;

        // 排队的任务只持有弱引用：引擎被释放后任务什么也不做，
        // 也不会形成 Scheduler -> Task -> Shared -> Scheduler 的引用环
        let weak = Arc::downgrade(&self.shared);
        scheduler.submit(&self.shared.topic, move || {
            let Some(shared) = weak.upgrade() else {
                debug!("Sampler dropped before version {} ran", version);
                return;
            };
            let result = shared.prepare(&config);
            let mut state = shared.state.lock();
            if let Err(e) =
                shared.complete_locked(&mut state, version, config, Outcome::Prepared(result))
            {
                state.failure = Some((version, e));
            }
        })?;

        debug!("Scheduled sample version {} on {}", version, self.shared.topic);
        Ok(())
    }

    /// 锁住引擎；持有期间不会有新的采样结果被应用
    pub fn lock(&self) -> SamplerGuard<'_, A> {
        SamplerGuard {
            source: self.shared.source.bytes(),
            state: self.shared.state.lock(),
        }
    }

    /// 异步模式下阻塞直到最新请求完成；同步模式下立即返回。
    /// 最新请求的准备阶段失败时返回该错误。
    pub fn wait(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.wait_locked(&mut state);
        self.shared.take_failure(&mut state)
    }

    pub fn wait_and_lock(&self) -> Result<SamplerGuard<'_, A>> {
        let mut guard = self.lock();
        self.shared.wait_locked(&mut guard.state);
        self.shared.take_failure(&mut guard.state)?;
        Ok(guard)
    }

    /// 不加锁，结果可能立即过期；需要可靠结果时在 `lock()` 内调用
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// (current, requested)
    pub fn versions(&self) -> (u64, u64) {
        (
            self.shared.current_version.load(Ordering::Acquire),
            self.shared.requested_version.load(Ordering::Acquire),
        )
    }

    /// 注册完成回调。回调在持有引擎锁时调用，不能再调用同一个引擎。
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        let id = CallbackId(state.next_callback_id);
        state.next_callback_id += 1;
        state.callbacks.insert(id, Box::new(callback));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.shared.state.lock().callbacks.remove(&id).is_some()
    }

    pub fn clear_callbacks(&self) {
        self.shared.state.lock().callbacks.clear();
    }

    pub fn requested_sample_size(&self) -> usize {
        self.shared.state.lock().pending.sample_size
    }

    pub fn sample_size(&self) -> usize {
        self.lock().sample_size()
    }

    pub fn byte(&self, index: usize) -> u8 {
        self.lock().byte(index)
    }

    pub fn file_offset(&self, index: usize) -> usize {
        self.lock().file_offset(index)
    }

    pub fn sample_offset(&self, address: usize) -> usize {
        self.lock().sample_offset(address)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn range(&self) -> (usize, usize) {
        self.lock().range()
    }

    pub fn metadata(&self) -> SampleMetadata {
        self.lock().metadata()
    }
}

impl Sampler<UniformSampler> {
    pub fn from_config<S: SourceView>(
        source: Arc<S>,
        config: &Config,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self> {
        let sampler = Self::with_scheduler(
            source,
            UniformSampler::with_window_size(config.window_size),
            scheduler,
            config.topic.clone(),
        );
        sampler.allow_async(config.allow_async);
        sampler.set_sample_size(config.sample_size)?;
        Ok(sampler)
    }
}

impl<A: SampleAlgorithm> Clone for Sampler<A> {
    /// 等待当前采样完成后深拷贝；回调不会被复制
    fn clone(&self) -> Self {
        let mut state = self.shared.state.lock();
        self.shared.wait_locked(&mut state);
        let version = self.shared.current_version.load(Ordering::Acquire);

        Self {
            shared: Arc::new(Shared {
                source: Arc::clone(&self.shared.source),
                algorithm: self.shared.algorithm.clone(),
                scheduler: self.shared.scheduler.clone(),
                topic: self.shared.topic.clone(),
                state: Mutex::new(EngineState {
                    pending: state.pending,
                    current: state.current,
                    live: state.live.clone(),
                    callbacks: BTreeMap::new(),
                    next_callback_id: 0,
                    allow_async: state.allow_async,
                    failure: None,
                }),
                finished: Condvar::new(),
                current_version: AtomicU64::new(version),
                requested_version: AtomicU64::new(version),
            }),
        }
    }
}

/// 引擎锁。持有期间读到的数据保持一致。
pub struct SamplerGuard<'a, A: SampleAlgorithm> {
    source: &'a [u8],
    state: MutexGuard<'a, EngineState<A::Sample>>,
}

impl<'a, A: SampleAlgorithm> SamplerGuard<'a, A> {
    fn reduced(&self) -> Option<&A::Sample> {
        if self.state.current.requires_reduction() {
            self.state.live.as_ref()
        } else {
            None
        }
    }

    pub fn range(&self) -> (usize, usize) {
        (self.state.current.start, self.state.current.end)
    }

    pub fn sample_size(&self) -> usize {
        match self.reduced() {
            Some(sample) => sample.len(),
            None => self.state.current.data_size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_size() == 0
    }

    /// 长度为 `sample_size()`；不缩减时直接是原始数据的切片
    pub fn raw_bytes(&self) -> &[u8] {
        match self.reduced() {
            Some(sample) => sample.bytes(self.source),
            None => &self.source[self.state.current.start..self.state.current.end],
        }
    }

    pub fn byte(&self, index: usize) -> u8 {
        self.raw_bytes()[index]
    }

    pub fn file_offset(&self, index: usize) -> usize {
        let SamplerConfig { start, end, .. } = self.state.current;
        let size = self.sample_size();

        // 边界固定
        if index == 0 {
            return start;
        }
        if index >= size {
            return end;
        }
        if index == size - 1 {
            return end - 1;
        }

        match self.reduced() {
            Some(sample) => sample.file_offset(index),
            None => start + index,
        }
    }

    pub fn sample_offset(&self, address: usize) -> usize {
        let SamplerConfig { start, end, .. } = self.state.current;
        let size = self.sample_size();

        if address <= start {
            return 0;
        }
        if address >= end {
            return size;
        }
        if address == end - 1 {
            return size - 1;
        }

        match self.reduced() {
            Some(sample) => sample.sample_offset(address),
            None => address - start,
        }
    }

    pub fn metadata(&self) -> SampleMetadata {
        let method = if self.reduced().is_some() { A::NAME } else { "full" };
        SampleMetadata {
            original_size: self.state.current.data_size(),
            sample_size: self.sample_size(),
            method: method.to_string(),
        }
    }
}
