#![doc = r#"
# tether-core

## 设计动机（Why）
- **定位**：承载异步 TCP 操作层共享的基础契约：错误模型、执行器、字节暂存区、
  操作生命周期守卫与配置。
- **架构角色**：`tether-transport-tcp` 与 `tether-http` 均只依赖本 crate 暴露的类型，
  彼此之间通过 [`ExecutorHandle`] 注入调度能力，而不是访问进程级全局量。

## 核心契约（What）
- [`TransportError`]：所有异步失败经由回调交付的唯一错误类型；
- [`Executor`] / [`ExecutorHandle`] / [`ExecutorSlot`]：工作线程池、调度句柄与按需重建工厂；
- [`Buffer`]：追加写入、按记号/行提取的暂存区；
- [`Lifecycle`]：保证“至多一次回调交付”的状态机守卫；
- [`Timeout`]、[`ExecutorConfig`]、[`TimeoutConfig`]：构造期参数。

## 风险与考量（Trade-offs）
- 执行器基于 Tokio 多线程运行时；调用方若已处于 Tokio 环境，可直接通过
  [`ExecutorHandle::current`] 复用现有运行时。
"#]

mod buffer;
mod config;
pub mod error;
mod executor;
mod lifecycle;

pub use buffer::Buffer;
pub use config::{ExecutorConfig, Timeout, TimeoutConfig};
pub use error::{BufferError, ErrorKind, OperationKind, TransportError};
pub use executor::{Executor, ExecutorHandle, ExecutorSlot};
pub use lifecycle::{Lifecycle, Outcome, Phase, Run};
