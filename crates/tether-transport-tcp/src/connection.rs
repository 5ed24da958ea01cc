use std::{fmt, io, net::SocketAddr, sync::Arc};

use tether_core::{
    ExecutorHandle, Phase, Run, Timeout, TransportError,
    error::CONNECT,
};
use tokio::net::{TcpStream as TokioTcpStream, lookup_host};

use crate::{TcpChannel, TcpSocketConfig, operation::OneShot};

/// 带超时与多端点故障转移的出站连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 一个主机名往往解析出多个地址（IPv4/IPv6、多副本），逐个尝试比只连第一个更可靠；
/// - 整个“解析 + 逐个建连”过程共享同一个截止时间，调用方只需关心一个超时参数。
///
/// ## 逻辑（How）
/// - 执行器上的 IO 链：`lookup_host` 解析出有序端点列表，按解析顺序逐个 `connect`；
/// - 某个端点失败且仍有候选时记录原因并尝试下一个；全部失败时以最后一次原因交付
///   [`TransportError::ConnectFailed`]；
/// - 首个成功的连接应用 [`TcpSocketConfig`] 后包装为 [`TcpChannel`] 交付。
///
/// ## 契约（What）
/// - `timeout` 为 [`Timeout::NONE`]（或 0 毫秒）时不设截止时间；
/// - 解析失败或解析结果为空时交付 [`TransportError::ResolutionFailed`] 并立即结束；
/// - 回调在自然完成、超时、`stop` 三者中仅由第一个触发；在任何结果出现前 `stop`，回调不会触发。
///
/// ## 注意事项（Trade-offs）
/// - 端点是串行尝试的，未实现 Happy Eyeballs 式的并行竞速。
#[derive(Clone)]
pub struct Connection {
    op: Arc<OneShot<TcpChannel>>,
    host: Arc<str>,
    port: u16,
}

impl Connection {
    pub fn start<F>(
        executor: &ExecutorHandle,
        host: impl Into<String>,
        port: u16,
        timeout: impl Into<Timeout>,
        on_done: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce(Result<TcpChannel, TransportError>) + Send + 'static,
    {
        Self::start_with_config(
            executor,
            host,
            port,
            timeout,
            TcpSocketConfig::default(),
            on_done,
        )
    }

    /// 与 [`Connection::start`] 相同，但为建立的连接应用 `config`。
    pub fn start_with_config<F>(
        executor: &ExecutorHandle,
        host: impl Into<String>,
        port: u16,
        timeout: impl Into<Timeout>,
        config: TcpSocketConfig,
        on_done: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce(Result<TcpChannel, TransportError>) + Send + 'static,
    {
        let connection = Self {
            op: OneShot::new(executor.clone(), Box::new(on_done)),
            host: Arc::from(host.into()),
            port,
        };
        let driver = connection.clone();
        connection
            .op
            .launch(timeout.into(), CONNECT, move |run| driver.drive(run, config))?;
        Ok(connection)
    }

    async fn drive(self, run: Run, config: TcpSocketConfig) {
        let endpoints = match self.resolve().await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                tracing::debug!(host = %self.host, port = self.port, error = %err, "resolution failed");
                self.op.fail(run, err);
                return;
            }
        };

        let mut last_error = None;
        for (attempt, &endpoint) in endpoints.iter().enumerate() {
            tracing::debug!(host = %self.host, %endpoint, attempt, "attempting tcp connect");
            let established = TokioTcpStream::connect(endpoint)
                .await
                .and_then(|stream| TcpChannel::from_stream_with_config(stream, &config));
            match established {
                Ok(channel) => {
                    tracing::info!(host = %self.host, port = self.port, %endpoint, "tcp connection established");
                    self.op.succeed(run, channel);
                    return;
                }
                Err(err) => {
                    tracing::debug!(%endpoint, error = %err, "tcp connect attempt failed");
                    last_error = Some(err);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no endpoint attempted"));
        self.op.fail(
            run,
            TransportError::ConnectFailed {
                host: self.host.to_string(),
                port: self.port,
                source,
            },
        );
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let failed = |source| TransportError::ResolutionFailed {
            host: self.host.to_string(),
            port: self.port,
            source,
        };
        let endpoints: Vec<SocketAddr> = lookup_host((&*self.host, self.port))
            .await
            .map_err(failed)?
            .collect();
        if endpoints.is_empty() {
            return Err(failed(io::Error::new(
                io::ErrorKind::NotFound,
                "resolver returned no endpoints",
            )));
        }
        tracing::debug!(host = %self.host, count = endpoints.len(), "host resolved");
        Ok(endpoints)
    }

    /// 取消截止定时器与未完成的解析/建连；幂等。
    pub fn stop(&self) {
        if self.op.stop() {
            tracing::debug!(host = %self.host, port = self.port, "connection stopped before outcome");
        }
    }

    pub fn phase(&self) -> Phase {
        self.op.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("phase", &self.phase())
            .finish()
    }
}
