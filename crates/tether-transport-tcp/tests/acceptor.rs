//! 接受循环契约：常驻接受、同步绑定失败、回调内停止与端口释放。

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tether_core::{ErrorKind, ExecutorHandle, TransportError};
use tether_transport_tcp::{Acceptor, TcpChannel};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(5);

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test(flavor = "multi_thread")]
async fn accepts_connections_until_stopped() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let (tx, mut rx) = mpsc::unbounded_channel::<TcpChannel>();
    let acceptor = Acceptor::bind_addr(&executor, loopback(0), move |accepted, _acceptor| {
        if let Ok(channel) = accepted {
            let _ = tx.send(channel);
        }
    })?;
    let addr = loopback(acceptor.local_addr().port());

    for round in 0..3u8 {
        let mut client = TcpStream::connect(addr).await?;
        let channel = timeout(WAIT, rx.recv()).await?.expect("接受到连接");
        assert_eq!(channel.peer_addr(), client.local_addr()?);
        channel.write_all(&[round]).await?;
        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await?;
        assert_eq!(reply[0], round);
    }

    acceptor.stop();
    acceptor.stop();
    assert!(acceptor.is_stopped());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn second_bind_on_live_port_fails_synchronously() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let first = Acceptor::bind_addr(&executor, loopback(0), |_, _| {})?;
    let port = first.local_addr().port();

    let err = Acceptor::bind_addr(&executor, loopback(port), |_, _| {}).expect_err("端口被占用");
    assert_eq!(err.kind(), ErrorKind::Bind);
    assert_eq!(err.io_kind(), Some(std::io::ErrorKind::AddrInUse));

    first.stop();
    let rebound = Acceptor::bind_addr(&executor, loopback(port), |_, _| {})?;
    assert_eq!(rebound.local_addr().port(), port);
    rebound.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_releases_port_before_returning() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let mut acceptor = Acceptor::bind_addr(&executor, loopback(0), |_, _| {})?;
    let port = acceptor.local_addr().port();
    for round in 0..200 {
        acceptor.stop();
        acceptor = Acceptor::bind_addr(&executor, loopback(port), |_, _| {})
            .map_err(|err| anyhow::anyhow!("第 {round} 轮停止后立即重绑失败：{err}"))?;
    }
    acceptor.stop();
    let err = TcpStream::connect(loopback(port)).await.expect_err("端口已关闭");
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_inside_callback_ends_the_loop() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<TcpChannel, TransportError>>();
    let counted = Arc::clone(&calls);
    let acceptor = Acceptor::bind_addr(&executor, loopback(0), move |accepted, acceptor| {
        counted.fetch_add(1, Ordering::SeqCst);
        acceptor.stop();
        let _ = tx.send(accepted);
    })?;
    let addr = loopback(acceptor.local_addr().port());

    let _first = TcpStream::connect(addr).await?;
    timeout(WAIT, rx.recv())
        .await?
        .expect("首个回调")
        .expect("接受成功");
    assert!(acceptor.is_stopped());

    // 回调被丢弃后发送端随之释放，不会再有第二次回调。
    assert!(timeout(WAIT, rx.recv()).await?.is_none());
    let _ = TcpStream::connect(addr).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bind_on_port_zero_listens_on_all_interfaces() -> Result<()> {
    let executor = ExecutorHandle::current()?;
    let acceptor = Acceptor::bind(&executor, 0, |_, _| {})?;
    let local = acceptor.local_addr();
    assert!(local.ip().is_unspecified());
    assert_ne!(local.port(), 0);
    let _client = TcpStream::connect(loopback(local.port())).await?;
    acceptor.stop();
    Ok(())
}
