//! 执行器：以 Tokio 多线程运行时承载全部定时器与套接字就绪回调。
//!
//! # 教案式说明
//! - **意图（Why）**：操作层只依赖“解析、连接、读写、定时、投递回调”这几项能力；
//!   将运行时封装为显式持有的 [`Executor`] 并把 [`ExecutorHandle`] 注入各操作构造函数，
//!   从而消除进程级可变全局量；
//! - **逻辑（How）**：`Executor` 独占 `tokio::runtime::Runtime`，并与所有句柄共享一个存活标志；
//!   运行时关闭后标志翻转，句柄上的 `spawn/post/after` 立即返回
//!   [`TransportError::ExecutorShutdown`]，保证在已销毁执行器上创建的操作“失败而非挂起”；
//! - **契约（What）**：[`ExecutorSlot`] 保留“首次使用时创建、失效后重建”的工厂语义，
//!   供仍需要该语义的宿主使用。
//!
//! ## 注意事项（Trade-offs）
//! - `Executor` 析构时调用 `shutdown_background`，不会阻塞调用线程，因此允许在工作线程内部
//!   销毁执行器；代价是仍在运行的任务在下一个挂起点才被回收。

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    runtime::{Builder, EnterGuard, Handle, Runtime},
    task::AbortHandle,
};

use crate::{
    config::ExecutorConfig,
    error::{EXECUTOR, TransportError, map_io_error},
};

/// 显式持有的执行器实例。
pub struct Executor {
    runtime: Option<Runtime>,
    handle: Handle,
    alive: Arc<AtomicBool>,
}

impl Executor {
    /// 按配置启动工作线程池。
    pub fn new(config: &ExecutorConfig) -> Result<Self, TransportError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads())
            .thread_name(config.thread_name())
            .enable_all()
            .build()
            .map_err(|err| map_io_error(EXECUTOR, err))?;
        tracing::debug!(
            worker_threads = config.worker_threads(),
            thread_name = config.thread_name(),
            "executor started"
        );
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    /// 返回可克隆的调度句柄。
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            handle: self.handle.clone(),
            alive: Arc::clone(&self.alive),
        }
    }

    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 在当前线程上阻塞驱动一个 Future，供同步宿主与测试使用。
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// 关闭执行器；等价于 `drop`。
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::debug!("executor shut down");
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("running", &self.is_running())
            .finish()
    }
}

/// 执行器句柄，所有操作通过它提交异步动作、定时器与延迟回调。
///
/// # 契约（What）
/// - `spawn`：提交异步动作，返回可取消的 [`AbortHandle`]；
/// - `post`：把同步回调排入运行队列，稍后在工作线程上执行；
/// - `after`：延迟 `delay` 后执行回调，`abort` 即取消定时器；
/// - `enter`：进入运行时上下文，用于同步注册套接字（例如监听器）；
/// - 执行器关闭后以上方法一律返回 [`TransportError::ExecutorShutdown`]。
#[derive(Clone, Debug)]
pub struct ExecutorHandle {
    handle: Handle,
    alive: Arc<AtomicBool>,
}

impl ExecutorHandle {
    /// 采用当前线程所在的 Tokio 运行时。
    pub fn current() -> Result<Self, TransportError> {
        Handle::try_current()
            .map(Self::from_tokio)
            .map_err(|_| TransportError::ExecutorShutdown)
    }

    /// 包装外部管理的 Tokio 运行时句柄。
    pub fn from_tokio(handle: Handle) -> Self {
        Self {
            handle,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn tokio(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> Result<AbortHandle, TransportError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_alive()?;
        Ok(self.handle.spawn(future).abort_handle())
    }

    pub fn post<F>(&self, callback: F) -> Result<AbortHandle, TransportError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move { callback() })
    }

    pub fn after<F>(&self, delay: Duration, callback: F) -> Result<AbortHandle, TransportError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        })
    }

    pub fn enter(&self) -> Result<EnterGuard<'_>, TransportError> {
        self.ensure_alive()?;
        Ok(self.handle.enter())
    }

    fn ensure_alive(&self) -> Result<(), TransportError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(TransportError::ExecutorShutdown)
        }
    }
}

/// “首次使用时创建、失效后重建”的执行器工厂。
///
/// # 教案式说明
/// - **意图（Why）**：部分宿主没有明确的启动阶段，希望在第一次需要时才拉起线程池，
///   并在测试之间销毁重建；
/// - **逻辑（How）**：内部以互斥锁保护 `Option<Executor>`，`instance` 在槽位为空或执行器已停止时
///   重新构造；`tear_down` 取走并关闭当前实例；
/// - **契约（What）**：旧实例销毁后，之前派发的句柄全部失效并返回
///   [`TransportError::ExecutorShutdown`]，不会与新实例混用。
#[derive(Debug)]
pub struct ExecutorSlot {
    config: ExecutorConfig,
    current: Mutex<Option<Executor>>,
}

impl Default for ExecutorSlot {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ExecutorSlot {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    /// 返回当前执行器句柄，必要时创建或重建。
    pub fn instance(&self) -> Result<ExecutorHandle, TransportError> {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let reusable = slot.as_ref().is_some_and(Executor::is_running);
        if !reusable {
            if slot.is_some() {
                tracing::debug!("executor found stopped, recreating");
            }
            *slot = Some(Executor::new(&self.config)?);
        }
        match slot.as_ref() {
            Some(executor) => Ok(executor.handle()),
            None => Err(TransportError::ExecutorShutdown),
        }
    }

    /// 关闭并移除当前执行器。
    pub fn tear_down(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(previous);
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Executor::is_running)
    }
}
