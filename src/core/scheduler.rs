//! 按主题（topic）分组的后台线程池
//!
//! 每个主题拥有自己的 FIFO 任务队列和若干工作线程。mock 主题没有工作线程，
//! 任务只会排队，由调用方（通常是测试）显式执行。

use crate::config::Config;
use crate::error::SchedulingError;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicKind {
    Workers(usize),
    Manual,
}

struct Topic {
    name: String,
    kind: TopicKind,
    queue: Mutex<TopicQueue>,
    available: Condvar,
}

struct TopicQueue {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

impl Topic {
    fn new(name: &str, kind: TopicKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            queue: Mutex::new(TopicQueue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    fn push(&self, task: Task) {
        self.queue.lock().tasks.push_back(task);
        // 只唤醒一个工作线程
        self.available.notify_one();
    }

    fn drain(&self) -> Vec<Task> {
        self.queue.lock().tasks.drain(..).collect()
    }

    fn shutdown(&self) {
        self.queue.lock().shutdown = true;
        self.available.notify_all();
    }
}

pub struct Scheduler {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// 创建配置中指定的主题
    pub fn from_config(config: &Config) -> Result<Arc<Self>, SchedulingError> {
        let scheduler = Arc::new(Self::new());
        scheduler.create_topic(&config.topic, config.workers)?;
        Ok(scheduler)
    }

    /// 创建主题并启动 `workers` 个工作线程；主题已存在时什么也不做。
    pub fn create_topic(&self, name: &str, workers: usize) -> Result<(), SchedulingError> {
        let mut topics = self.topics.lock();
        if topics.contains_key(name) {
            return Ok(());
        }

        let topic = Arc::new(Topic::new(name, TopicKind::Workers(workers)));
        for index in 0..workers {
            let worker_topic = Arc::clone(&topic);
            thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker_loop(worker_topic))
                .map_err(|e| {
                    // 已启动的线程随主题一起退出
                    topic.shutdown();
                    SchedulingError::Spawn(e)
                })?;
        }

        info!("Created topic {} with {} workers", name, workers);
        topics.insert(name.to_string(), topic);
        Ok(())
    }

    /// 创建没有工作线程的主题，任务由 `run_pending` / `take_pending` 手动执行
    pub fn create_mock_topic(&self, name: &str) {
        let mut topics = self.topics.lock();
        if topics.contains_key(name) {
            return;
        }
        topics.insert(name.to_string(), Arc::new(Topic::new(name, TopicKind::Manual)));
        debug!("Created mock topic {}", name);
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.lock().contains_key(name)
    }

    pub fn submit<F>(&self, topic: &str, task: F) -> Result<(), SchedulingError>
    where
        F: FnOnce() + Send + 'static,
    {
        let topic = self.topic(topic)?;
        if topic.kind == TopicKind::Workers(0) {
            return Err(SchedulingError::NoWorkers(topic.name.clone()));
        }

        topic.push(Box::new(task));
        Ok(())
    }

    /// 在当前线程按 FIFO 顺序执行 mock 主题中排队的任务，返回执行的数量。
    /// 执行期间新提交的任务也会被执行。
    pub fn run_pending(&self, topic: &str) -> Result<usize, SchedulingError> {
        let topic = self.manual_topic(topic)?;
        let mut executed = 0;
        loop {
            let next = topic.queue.lock().tasks.pop_front();
            match next {
                Some(task) => {
                    task();
                    executed += 1;
                }
                None => return Ok(executed),
            }
        }
    }

    /// 取出 mock 主题中排队的全部任务，由调用方决定执行顺序
    pub fn take_pending(&self, topic: &str) -> Result<Vec<Task>, SchedulingError> {
        Ok(self.manual_topic(topic)?.drain())
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, SchedulingError> {
        self.topics
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownTopic(name.to_string()))
    }

    fn manual_topic(&self, name: &str) -> Result<Arc<Topic>, SchedulingError> {
        let topic = self.topic(name)?;
        if topic.kind != TopicKind::Manual {
            return Err(SchedulingError::NotManual(name.to_string()));
        }
        Ok(topic)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // 不 join：最后一个引用可能就在某个工作线程上被释放
        for topic in self.topics.get_mut().values() {
            topic.shutdown();
        }
    }
}

fn worker_loop(topic: Arc<Topic>) {
    loop {
        let task = {
            let mut queue = topic.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shutdown {
                    return;
                }
                topic.available.wait(&mut queue);
            }
        };

        // 任务 panic 不能让线程池缩小
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!("Task on topic {} panicked: {}", topic.name, panic_message(&*payload));
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
