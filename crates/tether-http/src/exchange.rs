//! GET 与 POST 共用的请求/响应状态机。
//!
//! # 教案式说明
//! - **意图（Why）**：两种请求只有请求行与请求体不同，发送、读头、解析、读正文完全一致；
//! - **逻辑（How）**：
//!   - 每次 `start` 由 [`Lifecycle`] 颁发运行票据，并布置截止定时器与一个驱动任务；
//!   - 驱动任务按 [`Step`] 顺序推进，每步之间让出执行器，步骤记录在实例中供外部观察；
//!   - 响应在结算胜出后一次性写入，再交付回调，回调中读取访问器总能看到完整结果；
//! - **契约（What）**：
//!   - 运行中再次 `start` 返回 `InvalidState`；
//!   - 任意一步的 IO 错误、协议错误或超时都以错误交付一次；`stop` 后不再有回调。

use std::{
    fmt, io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{Bytes, BytesMut};
use tether_core::{
    ExecutorHandle, Lifecycle, OperationKind, Outcome, Phase, Run, Timeout, TransportError,
    error::{HTTP_BODY, HTTP_HEADER, HTTP_SEND, map_io_error, timeout_error},
};
use tether_transport_tcp::{StopCondition, Substring, TcpChannel};

use crate::{
    Headers,
    response::{ResponseHead, parse_head, resolve_body_length},
};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// 请求状态机当前所处的步骤。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Step {
    #[default]
    Send,
    ReadHeaderBlock,
    ParseHeader,
    ReadBody,
    Complete,
}

impl Step {
    fn operation(self) -> OperationKind {
        match self {
            Step::Send => HTTP_SEND,
            Step::ReadHeaderBlock | Step::ParseHeader => HTTP_HEADER,
            Step::ReadBody | Step::Complete => HTTP_BODY,
        }
    }
}

#[derive(Debug, Default)]
struct Response {
    step: Step,
    status_code: Option<u16>,
    headers: Headers,
    body: Bytes,
}

struct ExchangeInner {
    executor: ExecutorHandle,
    channel: TcpChannel,
    path: String,
    lifecycle: Lifecycle,
    response: Mutex<Response>,
}

/// 完成回调；跨多次 `start` 共享。
pub(crate) type OnDone<T> = Arc<dyn Fn(Result<(), TransportError>, &T) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Exchange {
    inner: Arc<ExchangeInner>,
}

impl Exchange {
    pub(crate) fn new(
        executor: &ExecutorHandle,
        channel: &TcpChannel,
        path: String,
    ) -> Result<Self, TransportError> {
        channel.require_open()?;
        Ok(Self {
            inner: Arc::new(ExchangeInner {
                executor: executor.clone(),
                channel: channel.clone(),
                path,
                lifecycle: Lifecycle::new(),
                response: Mutex::new(Response::default()),
            }),
        })
    }

    /// 请求中 `Host` 头部使用的对端地址文本。
    pub(crate) fn host(&self) -> String {
        self.inner.channel.peer_addr().ip().to_string()
    }

    pub(crate) fn start<D>(
        &self,
        timeout: Timeout,
        request: Bytes,
        deliver: D,
    ) -> Result<(), TransportError>
    where
        D: Fn(Result<(), TransportError>) + Send + Sync + 'static,
    {
        let lifecycle = &self.inner.lifecycle;
        let run = lifecycle.begin()?;
        *self.response() = Response::default();
        let deliver = Arc::new(deliver);

        if let Some(delay) = timeout.duration() {
            let this = self.clone();
            let deliver = Arc::clone(&deliver);
            let armed = self.inner.executor.after(delay, move || {
                if this.inner.lifecycle.settle(run, Outcome::TimedOut) {
                    let step = this.step();
                    tracing::debug!(path = %this.inner.path, ?step, "http request timed out");
                    deliver(Err(timeout_error(step.operation())));
                }
            });
            match armed {
                Ok(timer) => lifecycle.track(run, timer),
                Err(err) => {
                    lifecycle.stop();
                    return Err(err);
                }
            }
        }

        let this = self.clone();
        let spawned = self.inner.executor.spawn(async move {
            let outcome = this.drive(run, request).await;
            this.settle(run, outcome, deliver.as_ref());
        });
        match spawned {
            Ok(task) => {
                lifecycle.track(run, task);
                Ok(())
            }
            Err(err) => {
                lifecycle.stop();
                Err(err)
            }
        }
    }

    fn settle(
        &self,
        run: Run,
        outcome: Result<Response, TransportError>,
        deliver: &(dyn Fn(Result<(), TransportError>) + Send + Sync),
    ) {
        let lifecycle = &self.inner.lifecycle;
        match outcome {
            Ok(response) => {
                if lifecycle.settle(run, Outcome::Completed) {
                    tracing::debug!(
                        path = %self.inner.path,
                        status = ?response.status_code,
                        body = response.body.len(),
                        "http request complete"
                    );
                    *self.response() = response;
                    deliver(Ok(()));
                }
            }
            Err(err) => {
                if lifecycle.settle(run, Outcome::Failed) {
                    tracing::debug!(path = %self.inner.path, error = %err, "http request failed");
                    deliver(Err(err));
                }
            }
        }
    }

    async fn drive(&self, run: Run, request: Bytes) -> Result<Response, TransportError> {
        let channel = &self.inner.channel;
        channel
            .write_all(&request)
            .await
            .map_err(|err| map_io_error(HTTP_SEND, err))?;

        self.advance(run, Step::ReadHeaderBlock);
        let mut data = BytesMut::new();
        let mut terminator = Substring::new(HEADER_TERMINATOR)?;
        let mut scanned = 0;
        let header_end = loop {
            let (position, matched) = terminator.evaluate(&data[scanned..]);
            if matched {
                break scanned + position;
            }
            scanned += position;
            if data.len() > MAX_HEADER_BLOCK {
                return Err(TransportError::protocol(format!(
                    "response header exceeds {MAX_HEADER_BLOCK} bytes"
                )));
            }
            let read = channel
                .read_buf(&mut data)
                .await
                .map_err(|err| map_io_error(HTTP_HEADER, err))?;
            if read == 0 {
                return Err(unexpected_eof(
                    HTTP_HEADER,
                    "connection closed inside response header",
                ));
            }
        };

        self.advance(run, Step::ParseHeader);
        let mut body = data.split_off(header_end);
        let ResponseHead {
            status_code,
            headers,
        } = parse_head(&data)?;

        self.advance(run, Step::ReadBody);
        let length = resolve_body_length(&headers, body.len());
        while body.len() < length {
            let read = channel
                .read_buf(&mut body)
                .await
                .map_err(|err| map_io_error(HTTP_BODY, err))?;
            if read == 0 {
                return Err(unexpected_eof(
                    HTTP_BODY,
                    "connection closed inside response body",
                ));
            }
        }
        body.truncate(length);

        Ok(Response {
            step: Step::Complete,
            status_code: Some(status_code),
            headers,
            body: body.freeze(),
        })
    }

    fn advance(&self, run: Run, step: Step) {
        if self.inner.lifecycle.is_current(run) {
            self.response().step = step;
            tracing::debug!(path = %self.inner.path, ?step, "http step");
        }
    }

    pub(crate) fn stop(&self) {
        if self.inner.lifecycle.stop() {
            tracing::debug!(path = %self.inner.path, "http request stopped");
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.inner.lifecycle.phase()
    }

    pub(crate) fn step(&self) -> Step {
        self.response().step
    }

    pub(crate) fn status_code(&self) -> Option<u16> {
        self.response().status_code
    }

    pub(crate) fn headers(&self) -> Headers {
        self.response().headers.clone()
    }

    pub(crate) fn body(&self) -> Bytes {
        self.response().body.clone()
    }

    pub(crate) fn channel(&self) -> &TcpChannel {
        &self.inner.channel
    }

    pub(crate) fn path(&self) -> &str {
        &self.inner.path
    }

    fn response(&self) -> MutexGuard<'_, Response> {
        self.inner
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("path", &self.inner.path)
            .field("phase", &self.phase())
            .field("step", &self.step())
            .finish()
    }
}

fn unexpected_eof(operation: OperationKind, detail: &'static str) -> TransportError {
    map_io_error(operation, io::Error::new(io::ErrorKind::UnexpectedEof, detail))
}
