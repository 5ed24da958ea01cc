use std::{
    fmt,
    future::poll_fn,
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::Poll,
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tether_core::{
    ExecutorHandle, TransportError,
    error::{ACCEPT, map_io_error},
};
use tokio::{net::TcpListener as TokioTcpListener, task::AbortHandle};

use crate::{TcpChannel, TcpSocketConfig};

const BACKLOG: i32 = 1024;

type AcceptCallback = Box<dyn FnMut(Result<TcpChannel, TransportError>, &Acceptor) + Send>;

struct AcceptorInner {
    local_addr: SocketAddr,
    config: TcpSocketConfig,
    stopped: AtomicBool,
    listener: Mutex<Option<TokioTcpListener>>,
    task: Mutex<Option<AbortHandle>>,
    callback: Mutex<Option<AcceptCallback>>,
}

/// 常驻的接受循环。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端只需提供“拿到一条新连接后做什么”的回调，循环、重新布置与停止由本类型负责；
/// - 绑定失败是整个库中唯一同步返回的 IO 错误：端口被占用时调用方在构造处立即得知。
///
/// ## 逻辑（How）
/// - `bind*` 通过 `socket2` 创建监听套接字并设置 `SO_REUSEADDR`，随后注册到执行器；
/// - 监听器放在实例的槽位中，执行器上的循环任务借用它接受连接：每接受一条连接
///   （或遇到接受错误）便调用回调，若未停止则立即发起下一次接受；
/// - `stop` 从槽位取出监听器并当场丢弃，返回时端口已关闭；
/// - 回调调用前后各检查一次停止标志，回调内部调用 [`Acceptor::stop`] 不会重新布置。
///
/// ## 契约（What）
/// - 接受错误以 `Err` 交付给回调，但不会结束循环；是否终止由回调决定；
/// - `stop` 幂等，可在回调内调用；停止后监听端口被释放，回调被丢弃。
#[derive(Clone)]
pub struct Acceptor {
    inner: Arc<AcceptorInner>,
}

impl Acceptor {
    /// 在 `0.0.0.0:port` 上监听。
    pub fn bind<F>(executor: &ExecutorHandle, port: u16, on_accept: F) -> Result<Self, TransportError>
    where
        F: FnMut(Result<TcpChannel, TransportError>, &Acceptor) + Send + 'static,
    {
        Self::bind_addr(executor, SocketAddr::from(([0, 0, 0, 0], port)), on_accept)
    }

    pub fn bind_addr<F>(
        executor: &ExecutorHandle,
        addr: SocketAddr,
        on_accept: F,
    ) -> Result<Self, TransportError>
    where
        F: FnMut(Result<TcpChannel, TransportError>, &Acceptor) + Send + 'static,
    {
        Self::bind_with_config(executor, addr, TcpSocketConfig::default(), on_accept)
    }

    /// 绑定并开始接受；`config` 应用于每条接受到的连接。
    pub fn bind_with_config<F>(
        executor: &ExecutorHandle,
        addr: SocketAddr,
        config: TcpSocketConfig,
        on_accept: F,
    ) -> Result<Self, TransportError>
    where
        F: FnMut(Result<TcpChannel, TransportError>, &Acceptor) + Send + 'static,
    {
        let bind_error = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = {
            let std_listener = listen(addr).map_err(bind_error)?;
            let _context = executor.enter()?;
            TokioTcpListener::from_std(std_listener).map_err(bind_error)?
        };
        let local_addr = listener.local_addr().map_err(bind_error)?;
        tracing::debug!(%local_addr, "acceptor listening");

        let acceptor = Self {
            inner: Arc::new(AcceptorInner {
                local_addr,
                config,
                stopped: AtomicBool::new(false),
                listener: Mutex::new(Some(listener)),
                task: Mutex::new(None),
                callback: Mutex::new(Some(Box::new(on_accept))),
            }),
        };
        let task = executor.spawn(accept_loop(Arc::clone(&acceptor.inner)))?;
        *acceptor.inner.lock_task() = Some(task);
        if acceptor.is_stopped() {
            acceptor.inner.abort_task();
        }
        Ok(acceptor)
    }

    /// 实际绑定的地址（绑定端口 0 时可据此得知分配的端口）。
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// 停止接受并释放监听端口；幂等。
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(local_addr = %self.inner.local_addr, "acceptor stopped");
        self.inner.abort_task();
        drop(self.inner.lock_listener().take());
        drop(self.inner.lock_callback().take());
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.inner.local_addr)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl AcceptorInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<TokioTcpListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_callback(&self) -> MutexGuard<'_, Option<AcceptCallback>> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_task(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }

    // 回调期间槽位为空；放回前重新检查停止标志，避免复活已停止的接受器。
    fn restore_callback(&self, callback: AcceptCallback) {
        let mut slot = self.lock_callback();
        if !self.is_stopped() {
            *slot = Some(callback);
        }
    }
}

async fn accept_loop(inner: Arc<AcceptorInner>) {
    let acceptor = Acceptor {
        inner: Arc::clone(&inner),
    };
    while !inner.is_stopped() {
        // 锁只在单次轮询内持有，回调中的 `stop` 可随时取走监听器。
        let polled = poll_fn(|cx| match inner.lock_listener().as_ref() {
            Some(listener) => listener.poll_accept(cx).map(Some),
            None => Poll::Ready(None),
        })
        .await;
        let Some(polled) = polled else {
            break;
        };
        let accepted = match polled {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection accepted");
                TcpChannel::from_stream_with_config(stream, &inner.config)
                    .map_err(|err| map_io_error(ACCEPT, err))
            }
            Err(err) => Err(map_io_error(ACCEPT, err)),
        };
        if let Err(err) = &accepted {
            tracing::warn!(local_addr = %inner.local_addr, error = %err, "accept failed");
        }
        if inner.is_stopped() {
            break;
        }
        let Some(mut callback) = inner.lock_callback().take() else {
            break;
        };
        callback(accepted, &acceptor);
        inner.restore_callback(callback);
    }
    tracing::debug!(local_addr = %inner.local_addr, "accept loop exited");
}

fn listen(addr: SocketAddr) -> io::Result<StdTcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}
