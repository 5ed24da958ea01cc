use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tether_core::{ExecutorHandle, Phase, Timeout, TransportError};
use tether_transport_tcp::TcpChannel;

use crate::{
    Headers, Method, Step,
    exchange::{Exchange, OnDone},
    request::encode_request,
};

struct Request {
    headers: Headers,
    body: Bytes,
    on_done: OnDone<HttpPost>,
}

struct HttpPostInner {
    exchange: Exchange,
    request: Mutex<Request>,
}

/// 在已连接的套接字上执行 `POST` 请求。
///
/// 与 [`crate::HttpGet`] 共享同一状态机，额外携带 `Content-Length` 与请求体。
/// 两次请求之间可以通过 setter 替换请求体、头部与回调，替换在下一次 `start` 时生效。
#[derive(Clone)]
pub struct HttpPost {
    inner: Arc<HttpPostInner>,
}

impl HttpPost {
    pub fn new<F>(
        executor: &ExecutorHandle,
        channel: &TcpChannel,
        path: impl Into<String>,
        headers: Headers,
        body: impl Into<Bytes>,
        on_done: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(Result<(), TransportError>, &HttpPost) + Send + Sync + 'static,
    {
        Ok(Self {
            inner: Arc::new(HttpPostInner {
                exchange: Exchange::new(executor, channel, path.into())?,
                request: Mutex::new(Request {
                    headers,
                    body: body.into(),
                    on_done: Arc::new(on_done),
                }),
            }),
        })
    }

    pub fn start(&self, timeout: impl Into<Timeout>) -> Result<(), TransportError> {
        let exchange = &self.inner.exchange;
        let (request, on_done) = {
            let request = self.request();
            let encoded = encode_request(
                Method::Post,
                exchange.path(),
                &exchange.host(),
                &request.headers,
                &request.body,
            );
            (encoded, Arc::clone(&request.on_done))
        };
        let owner = self.clone();
        exchange.start(timeout.into(), request, move |result| {
            on_done(result, &owner)
        })
    }

    /// 停止当前请求；幂等。
    pub fn stop(&self) {
        self.inner.exchange.stop();
    }

    pub fn set_request_body(&self, body: impl Into<Bytes>) {
        self.request().body = body.into();
    }

    pub fn set_request_headers(&self, headers: Headers) {
        self.request().headers = headers;
    }

    pub fn set_on_done<F>(&self, on_done: F)
    where
        F: Fn(Result<(), TransportError>, &HttpPost) + Send + Sync + 'static,
    {
        self.request().on_done = Arc::new(on_done);
    }

    pub fn request_body(&self) -> Bytes {
        self.request().body.clone()
    }

    pub fn request_headers(&self) -> Headers {
        self.request().headers.clone()
    }

    pub fn path(&self) -> &str {
        self.inner.exchange.path()
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

    pub fn channel(&self) -> &TcpChannel {
        self.inner.exchange.channel()
    }

    fn request(&self) -> MutexGuard<'_, Request> {
        self.inner
            .request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HttpPost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPost")
            .field("exchange", &self.inner.exchange)
            .field("body_len", &self.request().body.len())
            .finish()
    }
}
