#![doc = r#"
# tether-transport-tcp

## 设计动机（Why）
- **定位**：基于 Tokio 的 TCP 操作层：出站连接（多端点故障转移 + 截止时间）、常驻接受循环、
  以谓词驱动的单次读写。
- **架构角色**：每个操作都是“IO 链与截止定时器赛跑”的小状态机，结算由
  [`tether_core::Lifecycle`] 裁决，回调在一次启动中至多交付一次。

## 核心契约（What）
- [`TcpChannel`]：共享所有权的套接字句柄，[`TcpSocketConfig`] 控制 `SO_LINGER`/`TCP_NODELAY`；
- [`Connection`]：解析主机名后按顺序逐个尝试端点；
- [`Acceptor`]：构造即绑定，绑定失败同步返回；
- [`ReadOne`] / [`WriteOne`]：受截止时间约束的单次读写，读取以 [`StopCondition`]
  （[`ByteCount`]、[`Substring`] 或任意闭包）决定何时结束。

## 风险与考量（Trade-offs）
- 取消是协作式的：`stop` 中止尚未完成的异步动作，已经进入内核的系统调用结果会被丢弃而非打断。
"#]

mod acceptor;
mod channel;
mod connection;
mod operation;
mod read_one;
mod stop_condition;
mod write_one;

pub use acceptor::Acceptor;
pub use channel::{ShutdownDirection, TcpChannel, TcpSocketConfig};
pub use connection::Connection;
pub use read_one::ReadOne;
pub use stop_condition::{ByteCount, StopCondition, Substring};
pub use write_one::WriteOne;
