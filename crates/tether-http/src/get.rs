use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use tether_core::{ExecutorHandle, Phase, Timeout, TransportError};
use tether_transport_tcp::TcpChannel;

use crate::{
    Headers, Method, Step,
    exchange::{Exchange, OnDone},
    request::encode_request,
};

struct HttpGetInner {
    exchange: Exchange,
    request_headers: Mutex<Headers>,
    on_done: OnDone<HttpGet>,
}

/// 在已连接的套接字上执行 `GET` 请求。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 调用方已经持有连接（例如来自 `Connection`），只需要在其上完成一次请求/响应往返；
///   本类型不负责建连，也不复用连接。
///
/// ## 契约 (What)
/// - `new`：套接字已关闭时返回 `InvalidArgument`；
/// - `start(timeout)`：发送请求并异步读取响应，运行中再次调用返回 `InvalidState`；
///   完成、失败或超时都只回调一次；
/// - 回调内可通过 `status_code`/`headers`/`body` 读取响应，这些字段在每次 `start` 时清空；
/// - 完成后可以再次 `start`，在同一连接上发起下一次请求。
#[derive(Clone)]
pub struct HttpGet {
    inner: Arc<HttpGetInner>,
}

impl HttpGet {
    pub fn new<F>(
        executor: &ExecutorHandle,
        channel: &TcpChannel,
        path: impl Into<String>,
        on_done: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(Result<(), TransportError>, &HttpGet) + Send + Sync + 'static,
    {
        Ok(Self {
            inner: Arc::new(HttpGetInner {
                exchange: Exchange::new(executor, channel, path.into())?,
                request_headers: Mutex::new(Headers::new()),
                on_done: Arc::new(on_done),
            }),
        })
    }

    pub fn start(&self, timeout: impl Into<Timeout>) -> Result<(), TransportError> {
        let exchange = &self.inner.exchange;
        let request = encode_request(
            Method::Get,
            exchange.path(),
            &exchange.host(),
            &self.request_headers(),
            &[],
        );
        let owner = self.clone();
        exchange.start(timeout.into(), request, move |result| {
            (owner.inner.on_done)(result, &owner)
        })
    }

    /// 停止当前请求；幂等。
    pub fn stop(&self) {
        self.inner.exchange.stop();
    }

    /// 附加到后续请求的头部。
    pub fn set_request_headers(&self, headers: Headers) {
        *self
            .inner
            .request_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = headers;
    }

    pub fn request_headers(&self) -> Headers {
        self.inner
            .request_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.inner.exchange.status_code()
    }

    pub fn headers(&self) -> Headers {
        self.inner.exchange.headers()
    }

    pub fn body(&self) -> Bytes {
        self.inner.exchange.body()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    pub fn step(&self) -> Step {
        self.inner.exchange.step()
    }

    pub fn phase(&self) -> Phase {
        self.inner.exchange.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn path(&self) -> &str {
        self.inner.exchange.path()
    }

    pub fn channel(&self) -> &TcpChannel {
        self.inner.exchange.channel()
    }
}

impl fmt::Debug for HttpGet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGet")
            .field("exchange", &self.inner.exchange)
            .finish()
    }
}
