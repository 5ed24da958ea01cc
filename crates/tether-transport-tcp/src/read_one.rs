use std::{
    fmt, io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{Bytes, BytesMut};
use tether_core::{
    Buffer, ExecutorHandle, Phase, Run, Timeout, TransportError,
    error::{READ, map_io_error},
};

use crate::{TcpChannel, operation::OneShot, stop_condition::StopCondition};

#[derive(Default)]
struct ReadState {
    buffer: Buffer,
    boundary: usize,
}

struct ReadOneInner {
    op: Arc<OneShot<ReadOne>>,
    channel: TcpChannel,
    state: Mutex<ReadState>,
}

/// 读取“一个单元”的数据：累积字节直到停止条件命中或截止时间到达。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 行协议、定长帧等常见读法都可以归结为“读到谓词满足为止”，调用方只需提供
///   [`StopCondition`]，超时与取消由本操作负责。
///
/// ## 逻辑 (How)
/// - IO 链在执行器上循环：先对已缓存的未扫描字节评估停止条件，未命中再读取一次；
/// - 命中后把全部已读字节存入内部 [`Buffer`]，经执行器延迟派发成功回调；
/// - 读错误或 EOF 立即交付错误回调；截止定时器先到则交付超时。
///
/// ## 契约 (What)
/// - 构造时套接字已关闭返回 `InvalidArgument`；执行器已关闭返回 `ExecutorShutdown`；
/// - 回调在一次 `start` 中至多触发一次；`stop` 之后不会再触发；
/// - 成功后 [`ReadOne::boundary`] 给出单元边界，缓冲区可能含边界之后多读到的字节。
#[derive(Clone)]
pub struct ReadOne {
    inner: Arc<ReadOneInner>,
}

impl ReadOne {
    pub fn start<C, F>(
        executor: &ExecutorHandle,
        channel: &TcpChannel,
        condition: C,
        timeout: impl Into<Timeout>,
        on_done: F,
    ) -> Result<Self, TransportError>
    where
        C: StopCondition,
        F: FnOnce(Result<ReadOne, TransportError>) + Send + 'static,
    {
        channel.require_open()?;
        let read = Self {
            inner: Arc::new(ReadOneInner {
                op: OneShot::new(executor.clone(), Box::new(on_done)),
                channel: channel.clone(),
                state: Mutex::new(ReadState::default()),
            }),
        };
        let driver = read.clone();
        read.inner
            .op
            .launch(timeout.into(), READ, move |run| driver.drive(run, condition))?;
        Ok(read)
    }

    async fn drive<C: StopCondition>(self, run: Run, mut condition: C) {
        let mut data = BytesMut::new();
        let mut scanned = 0;
        let outcome = loop {
            let (position, matched) = condition.evaluate(&data[scanned..]);
            if matched {
                break Ok((scanned + position).min(data.len()));
            }
            scanned = (scanned + position).min(data.len());
            match self.inner.channel.read_buf(&mut data).await {
                Ok(0) => {
                    break Err(map_io_error(
                        READ,
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed before stop condition matched",
                        ),
                    ));
                }
                Ok(n) => tracing::trace!(bytes = n, buffered = data.len(), "tcp read"),
                Err(err) => break Err(map_io_error(READ, err)),
            }
        };
        match outcome {
            Ok(boundary) => {
                {
                    let mut state = self.state();
                    state.buffer = Buffer::from(data.freeze());
                    state.boundary = boundary;
                }
                tracing::debug!(boundary, "read stop condition matched");
                let op = Arc::clone(&self.inner.op);
                op.succeed_deferred(run, self);
            }
            Err(err) => self.inner.op.fail(run, err),
        }
    }

    /// 停止读取；幂等。
    pub fn stop(&self) {
        self.inner.op.stop();
    }

    pub fn phase(&self) -> Phase {
        self.inner.op.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn channel(&self) -> &TcpChannel {
        &self.inner.channel
    }

    /// 单元边界（相对缓冲区起点）。
    pub fn boundary(&self) -> usize {
        self.state().boundary
    }

    /// 缓冲区全部内容的文本快照。
    pub fn snapshot(&self) -> String {
        self.state().buffer.snapshot()
    }

    /// 缓冲区全部内容。
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.state().buffer.as_bytes())
    }

    /// 边界之前的字节，即命中的那个单元。
    pub fn unit(&self) -> Bytes {
        let state = self.state();
        let bytes = state.buffer.as_bytes();
        Bytes::copy_from_slice(&bytes[..state.boundary.min(bytes.len())])
    }

    /// 以可变引用访问内部缓冲区，例如按记号继续提取。
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut Buffer) -> R) -> R {
        f(&mut self.state().buffer)
    }

    fn state(&self) -> MutexGuard<'_, ReadState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ReadOne {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOne")
            .field("phase", &self.phase())
            .field("peer", &self.inner.channel.peer_addr())
            .finish()
    }
}
