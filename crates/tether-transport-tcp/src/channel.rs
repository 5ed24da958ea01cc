use bytes::BytesMut;
use socket2::SockRef;
use std::{
    io,
    net::{Shutdown as StdShutdown, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tether_core::TransportError;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream as TokioTcpStream,
    sync::Mutex as AsyncMutex,
};

const READ_CHUNK: usize = 4096;

/// TCP 套接字级配置项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `SO_LINGER`、`TCP_NODELAY` 这类内核行为显式配置化，避免调用方直接操作 `socket2`；
/// - `Connection` 与 `Acceptor` 产出的每条连接都会先应用同一份配置，再交给回调。
///
/// ## 契约（What）
/// - `with_linger(Some(dur))`：关闭时最多等待 `dur` 发送残留数据，超时后以 RST 释放；
/// - `with_nodelay(true)`：禁用 Nagle 算法；
/// - **后置条件**：`apply` 返回 `Ok(())` 时选项已落地，失败时连接不会交给调用方。
///
/// ## 注意事项（Trade-offs）
/// - `SO_LINGER` 在 Linux 上按秒取整，过小的值可能导致发送缓冲中的数据被丢弃。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
    nodelay: bool,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self {
            linger: None,
            nodelay: false,
        }
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub(crate) fn apply(&self, stream: &TokioTcpStream) -> io::Result<()> {
        SockRef::from(stream).set_linger(self.linger)?;
        stream.set_nodelay(self.nodelay)
    }
}

#[derive(Debug)]
struct TcpChannelInner {
    stream: AsyncMutex<TokioTcpStream>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

/// 共享所有权的 TCP 套接字句柄。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 同一条连接会同时被创建它的操作与接收它的回调引用，句柄以 `Arc` 共享，
///   最后一个引用释放时底层套接字随之关闭；
/// - 读写操作、HTTP 状态机都只需要 `&TcpChannel`，无须了解 Tokio 具体类型。
///
/// ## 逻辑 (How)
/// - 内部以 `tokio::sync::Mutex` 包裹 `TcpStream`，任意时刻只有一个异步动作触碰套接字；
/// - `close` 置位关闭标志并尽力执行双向半关闭，此后的读写返回 `NotConnected`。
///
/// ## 契约 (What)
/// - `read_buf`：执行一次读取，把新字节追加到 `BytesMut`，返回读到的字节数（`0` 表示 EOF）；
/// - `write_all`：写满整个切片；
/// - `shutdown`：按方向半关闭；
/// - `peer_addr`/`local_addr`：建立连接时记录的地址；
/// - 关闭后的句柄不能用于构造读写/HTTP 操作（构造期返回 `InvalidArgument`）。
///
/// ## 注意事项 (Trade-offs)
/// - 读写共享同一把锁，无法真正全双工；操作层约定每个套接字同时只有一个未完成动作，
///   因此不构成瓶颈。
#[derive(Clone, Debug)]
pub struct TcpChannel {
    inner: Arc<TcpChannelInner>,
}

impl TcpChannel {
    /// 包装一个已连接的 Tokio 流。
    pub fn from_stream(stream: TokioTcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        Ok(Self {
            inner: Arc::new(TcpChannelInner {
                stream: AsyncMutex::new(stream),
                peer_addr,
                local_addr,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn from_stream_with_config(
        stream: TokioTcpStream,
        config: &TcpSocketConfig,
    ) -> io::Result<Self> {
        config.apply(&stream)?;
        Self::from_stream(stream)
    }

    /// 读取一次数据并追加到 `buf`。
    pub async fn read_buf(&self, buf: &mut BytesMut) -> io::Result<usize> {
        self.ensure_open()?;
        buf.reserve(READ_CHUNK);
        let mut guard = self.inner.stream.lock().await;
        guard.read_buf(buf).await
    }

    /// 将整个缓冲区写入套接字。
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(());
        }
        let mut guard = self.inner.stream.lock().await;
        guard.write_all(data).await?;
        guard.flush().await
    }

    /// 根据方向执行半关闭。
    pub async fn shutdown(&self, direction: ShutdownDirection) -> io::Result<()> {
        self.ensure_open()?;
        let mut guard = self.inner.stream.lock().await;
        match direction {
            ShutdownDirection::Write => AsyncWriteExt::shutdown(&mut *guard).await,
            ShutdownDirection::Read => sync_shutdown(&guard, StdShutdown::Read),
            ShutdownDirection::Both => {
                AsyncWriteExt::shutdown(&mut *guard).await?;
                sync_shutdown(&guard, StdShutdown::Read)
            }
        }
    }

    /// 关闭句柄；幂等。
    ///
    /// 若此刻没有动作持有套接字，立即执行双向半关闭；否则正在进行的动作完成后，
    /// 后续读写均以 `NotConnected` 失败。
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(guard) = self.inner.stream.try_lock()
            && let Err(err) = sync_shutdown(&guard, StdShutdown::Both)
            && err.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(peer = %self.inner.peer_addr, error = %err, "tcp shutdown on close failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 获取对端地址。
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// 获取本地地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// 两个句柄是否指向同一条连接。
    pub fn ptr_eq(&self, other: &TcpChannel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 若当前句柄是唯一持有者，取回底层 `TcpStream`；否则原样返回。
    pub fn try_into_stream(self) -> Result<TokioTcpStream, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Ok(inner.stream.into_inner()),
            Err(inner) => Err(Self { inner }),
        }
    }

    /// 构造期校验：关闭的句柄等同于空套接字。
    pub fn require_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::invalid_argument("socket is closed"))
        } else {
            Ok(())
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.is_closed() {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "tcp channel is closed",
            ))
        } else {
            Ok(())
        }
    }
}

/// 表示半关闭的方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownDirection {
    /// 关闭写半部。
    Write,
    /// 关闭读半部。
    Read,
    /// 同时关闭读写半部。
    Both,
}

impl From<ShutdownDirection> for StdShutdown {
    fn from(value: ShutdownDirection) -> Self {
        match value {
            ShutdownDirection::Write => StdShutdown::Write,
            ShutdownDirection::Read => StdShutdown::Read,
            ShutdownDirection::Both => StdShutdown::Both,
        }
    }
}

fn sync_shutdown(stream: &TokioTcpStream, direction: StdShutdown) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.shutdown(direction)
}
