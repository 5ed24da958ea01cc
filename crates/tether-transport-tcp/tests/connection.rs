//! 出站连接契约：成功、故障转移、拒绝、超时、停止与执行器关闭。

use std::time::{Duration, Instant};

use anyhow::Result;
use tether_core::{
    ErrorKind, Executor, ExecutorConfig, ExecutorHandle, Phase, TimeoutConfig, TransportError,
};
use tether_transport_tcp::{Connection, TcpChannel, TcpSocketConfig};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);
// 不可路由地址：SYN 无人应答，用来制造超时。
const BLACKHOLE: &str = "10.255.255.1";

type Outcome = Result<TcpChannel, TransportError>;

fn outcome_channel() -> (oneshot::Sender<Outcome>, oneshot::Receiver<Outcome>) {
    oneshot::channel()
}

#[tokio::test(flavor = "multi_thread")]
async fn connects_to_local_listener() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = outcome_channel();
    let timeouts = TimeoutConfig::new().with_connect_timeout_ms(1_000);

    let connection = Connection::start_with_config(
        &executor,
        "127.0.0.1",
        addr.port(),
        timeouts.connect(),
        TcpSocketConfig::new().with_nodelay(true),
        move |r| {
            let _ = tx.send(r);
        },
    )?;
    let (accepted, _) = listener.accept().await?;
    let channel = timeout(WAIT, rx).await??.expect("连接成功");

    assert_eq!(channel.peer_addr(), addr);
    assert_eq!(channel.local_addr(), accepted.peer_addr()?);
    assert_eq!(connection.phase(), Phase::Completed);
    let stream = channel.try_into_stream().expect("唯一持有者");
    assert!(stream.nodelay()?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn localhost_fails_over_to_listening_family() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    // 只在 IPv4 上监听；若 `localhost` 先解析出 `::1`，首个端点被拒绝后应转向下一个。
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = outcome_channel();

    let _connection = Connection::start(&executor, "localhost", port, Duration::from_secs(2), move |r| {
        let _ = tx.send(r);
    })?;
    let accept = tokio::spawn(async move { listener.accept().await });
    let channel = timeout(WAIT, rx).await??.expect("故障转移后连接成功");
    assert!(channel.peer_addr().is_ipv4());
    accept.await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_endpoint_reports_connect_failed() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let (tx, rx) = outcome_channel();

    let connection = Connection::start(&executor, "127.0.0.1", port, Duration::from_secs(1), move |r| {
        let _ = tx.send(r);
    })?;
    let err = timeout(WAIT, rx).await??.expect_err("端口无人监听");
    assert_eq!(err.kind(), ErrorKind::ConnectFailed);
    assert_eq!(err.io_kind(), Some(std::io::ErrorKind::ConnectionRefused));
    assert_eq!(connection.phase(), Phase::Failed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolvable_host_fails_without_hanging() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let (tx, rx) = outcome_channel();

    let _connection = Connection::start(&executor, "no-such-host.invalid", 80, Duration::from_secs(3), move |r| {
        let _ = tx.send(r);
    })?;
    let err = timeout(WAIT, rx).await??.expect_err("无法解析");
    assert!(matches!(
        err.kind(),
        ErrorKind::ResolutionFailed | ErrorKind::Timeout
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_host_is_bounded_by_deadline() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let (tx, rx) = outcome_channel();
    let started = Instant::now();

    let _connection = Connection::start(&executor, BLACKHOLE, 80, Duration::from_millis(200), move |r| {
        let _ = tx.send(r);
    })?;
    let err = timeout(WAIT, rx).await??.expect_err("不可达");
    // 沙箱环境可能直接返回“网络不可达”，两种结果都满足截止时间约束。
    assert!(matches!(err.kind(), ErrorKind::Timeout | ErrorKind::ConnectFailed));
    assert!(started.elapsed() < Duration::from_millis(200) + Duration::from_secs(1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_before_outcome_is_silent() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = Connection::start(&executor, BLACKHOLE, 80, Duration::from_millis(100), move |r| {
        let _ = tx.send(r.is_ok());
    })?;
    connection.stop();
    connection.stop();
    assert!(connection.is_stopped());
    assert!(timeout(Duration::from_millis(300), rx.recv()).await?.is_none());
    Ok(())
}

#[test]
fn start_on_shut_down_executor_fails_immediately() {
    let executor = Executor::new(&ExecutorConfig::new().with_worker_threads(1)).expect("启动执行器");
    let handle = executor.handle();
    executor.shutdown();

    let err = Connection::start(&handle, "127.0.0.1", 80, Duration::from_secs(1), |_| {})
        .expect_err("执行器已关闭");
    assert_eq!(err.kind(), ErrorKind::ExecutorShutdown);
}
