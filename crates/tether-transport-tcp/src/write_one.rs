use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use tether_core::{
    Buffer, ExecutorHandle, Phase, Run, Timeout, TransportError,
    error::{WRITE, map_io_error},
};

use crate::{TcpChannel, operation::OneShot};

struct WriteOneInner {
    op: Arc<OneShot<WriteOne>>,
    channel: TcpChannel,
    written: AtomicUsize,
}

/// 把整个缓冲区写入套接字，受截止时间约束。
///
/// 成功回调经执行器延迟派发；写错误立即交付；`stop` 之后不再有回调。
#[derive(Clone)]
pub struct WriteOne {
    inner: Arc<WriteOneInner>,
}

impl WriteOne {
    pub fn start<F>(
        executor: &ExecutorHandle,
        channel: &TcpChannel,
        buffer: &Buffer,
        timeout: impl Into<Timeout>,
        on_done: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce(Result<WriteOne, TransportError>) + Send + 'static,
    {
        channel.require_open()?;
        let payload = Bytes::copy_from_slice(buffer.as_bytes());
        let write = Self {
            inner: Arc::new(WriteOneInner {
                op: OneShot::new(executor.clone(), Box::new(on_done)),
                channel: channel.clone(),
                written: AtomicUsize::new(0),
            }),
        };
        let driver = write.clone();
        write
            .inner
            .op
            .launch(timeout.into(), WRITE, move |run| driver.drive(run, payload))?;
        Ok(write)
    }

    async fn drive(self, run: Run, payload: Bytes) {
        match self.inner.channel.write_all(&payload).await {
            Ok(()) => {
                self.inner.written.store(payload.len(), Ordering::Release);
                tracing::trace!(bytes = payload.len(), "tcp write complete");
                let op = Arc::clone(&self.inner.op);
                op.succeed_deferred(run, self);
            }
            Err(err) => self.inner.op.fail(run, map_io_error(WRITE, err)),
        }
    }

    /// 停止写入；幂等。
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

    /// 成功后等于缓冲区长度，之前为 0。
    pub fn bytes_written(&self) -> usize {
        self.inner.written.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WriteOne {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOne")
            .field("phase", &self.phase())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}
