//! 执行器与超时配置。
//!
//! # 教案式说明
//! - **意图（Why）**：构造期参数（工作线程数、连接/读/写超时）需要能嵌入宿主应用的
//!   TOML 配置，同时保留代码中逐项设置的 Builder 写法；
//! - **逻辑（How）**：配置结构派生 `serde::Deserialize` 并为每个字段提供默认值，
//!   `with_*` 方法按值返回新实例；
//! - **契约（What）**：所有毫秒值遵循“0 表示不限时”的约定，读取时统一转换为 [`Timeout`]。

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_WORKER_THREADS: usize = 5;
const DEFAULT_THREAD_NAME: &str = "tether-worker";

/// 单个异步操作的时限。`Timeout::NONE` 表示不设截止时间。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    /// 不限时。
    pub const NONE: Timeout = Timeout(None);

    /// 以毫秒构造，`0` 等价于 [`Timeout::NONE`]。
    pub const fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Timeout(None)
        } else {
            Timeout(Some(Duration::from_millis(ms)))
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        if value.is_zero() {
            Timeout(None)
        } else {
            Timeout(Some(value))
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Self {
        value.map(Timeout::from).unwrap_or(Timeout::NONE)
    }
}

/// 执行器（Tokio 多线程运行时）的构造参数。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `worker_threads`：工作线程数，至少为 1，`0` 会在构造执行器时被提升为 1；
/// - `thread_name`：工作线程名前缀，便于在线程转储中辨认；
/// - **后置条件**：`Default` 与反序列化缺省字段得到相同的默认值（5 个线程）。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    worker_threads: usize,
    thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads.max(1)
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

/// 各类操作的默认超时，单位毫秒，`0` 表示不限时。
///
/// 访问器返回 [`Timeout`]，可直接传给各操作的 `start`，例如
/// `Connection::start(&executor, host, port, timeouts.connect(), on_done)`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    connect_timeout_ms: u64,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
    request_timeout_ms: u64,
}

impl TimeoutConfig {
    pub const fn new() -> Self {
        Self {
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            request_timeout_ms: 0,
        }
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub fn with_write_timeout_ms(mut self, ms: u64) -> Self {
        self.write_timeout_ms = ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn connect(&self) -> Timeout {
        Timeout::from_millis(self.connect_timeout_ms)
    }

    pub fn read(&self) -> Timeout {
        Timeout::from_millis(self.read_timeout_ms)
    }

    pub fn write(&self) -> Timeout {
        Timeout::from_millis(self.write_timeout_ms)
    }

    pub fn request(&self) -> Timeout {
        Timeout::from_millis(self.request_timeout_ms)
    }
}
