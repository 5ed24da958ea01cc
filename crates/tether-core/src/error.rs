//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为连接、监听、读写与 HTTP 请求提供唯一的错误域 [`TransportError`]，
//!   让所有异步回调以同一种类型交付失败；
//! - 通过 [`OperationKind`] 为每个异步步骤附带稳定错误码，便于日志与告警聚合。
//!
//! ## 设计要求（What）
//! - 构造期参数校验（关闭的套接字、空匹配串、重复启动）同步返回；
//! - 其余失败只经由操作实例的完成回调交付一次，绝不跨越异步边界抛出；
//! - `kind()` 给出封闭的错误分类，调用方据此决定是否重试。

use std::{borrow::Cow, io};

use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const EXECUTOR: OperationKind = OperationKind {
    code: "tether.executor.start_failed",
    message: "executor start",
};
pub const RESOLVE: OperationKind = OperationKind {
    code: "tether.transport.tcp.resolve_failed",
    message: "tcp resolve",
};
pub const CONNECT: OperationKind = OperationKind {
    code: "tether.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub const BIND: OperationKind = OperationKind {
    code: "tether.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub const ACCEPT: OperationKind = OperationKind {
    code: "tether.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub const READ: OperationKind = OperationKind {
    code: "tether.transport.tcp.read_failed",
    message: "tcp read",
};
pub const WRITE: OperationKind = OperationKind {
    code: "tether.transport.tcp.write_failed",
    message: "tcp write",
};
pub const HTTP_SEND: OperationKind = OperationKind {
    code: "tether.http.send_failed",
    message: "http send request",
};
pub const HTTP_HEADER: OperationKind = OperationKind {
    code: "tether.http.header_failed",
    message: "http read header block",
};
pub const HTTP_BODY: OperationKind = OperationKind {
    code: "tether.http.body_failed",
    message: "http read body",
};

const TIMEOUT_CODE: &str = "tether.transport.timeout";
const PROTOCOL_CODE: &str = "tether.http.protocol_error";
const INVALID_ARGUMENT_CODE: &str = "tether.invalid_argument";
const INVALID_STATE_CODE: &str = "tether.invalid_state";
const EXECUTOR_SHUTDOWN_CODE: &str = "tether.executor.shutdown";

/// 错误的封闭分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ResolutionFailed,
    ConnectFailed,
    Timeout,
    Io,
    Protocol,
    InvalidArgument,
    InvalidState,
    Bind,
    ExecutorShutdown,
}

/// 传输层统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：连接、监听、读写、HTTP 各自的失败路径最终都交给同一个回调签名，
///   统一类型避免调用方为每种操作编写不同的匹配逻辑。
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可以安全地穿越执行器线程；
///   - 携带 `io::Error` 的变体通过 `#[source]` 保留原始错误链；
///   - [`TransportError::code`] 返回稳定的点分错误码。
/// - **设计权衡 (Trade-offs)**：主机名等上下文以 `String` 保存，牺牲少量分配换取可读性。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 主机名解析失败，或解析结果为空。
    #[error("无法解析地址 `{host}:{port}`: {source}")]
    ResolutionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// 全部候选端点均连接失败，`source` 为最后一次失败原因。
    #[error("无法连接到 `{host}:{port}`: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// 截止时间先于自然完成到达。
    #[error("{} timed out", .operation.message)]
    Timeout { operation: OperationKind },
    /// 传输层读写失败。
    #[error("{}: {source}", .operation.message)]
    Io {
        operation: OperationKind,
        #[source]
        source: io::Error,
    },
    /// 对端返回的报文无法按协议解析。
    #[error("协议错误: {detail}")]
    Protocol { detail: Cow<'static, str> },
    /// 构造期参数非法。
    #[error("非法参数: {detail}")]
    InvalidArgument { detail: Cow<'static, str> },
    /// 在不允许的状态下调用操作，例如重复启动仍在执行的实例。
    #[error("非法状态: {detail}")]
    InvalidState { detail: Cow<'static, str> },
    /// 监听端口绑定失败（唯一在构造期同步返回的 IO 错误）。
    #[error("无法绑定监听地址 `{addr}`: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// 执行器已被关闭，无法再调度任务。
    #[error("执行器已关闭，无法调度新的异步操作")]
    ExecutorShutdown,
}

impl TransportError {
    /// 返回错误分类。
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::ResolutionFailed { .. } => ErrorKind::ResolutionFailed,
            TransportError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            TransportError::Timeout { .. } => ErrorKind::Timeout,
            TransportError::Io { .. } => ErrorKind::Io,
            TransportError::Protocol { .. } => ErrorKind::Protocol,
            TransportError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            TransportError::InvalidState { .. } => ErrorKind::InvalidState,
            TransportError::Bind { .. } => ErrorKind::Bind,
            TransportError::ExecutorShutdown => ErrorKind::ExecutorShutdown,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::ResolutionFailed { .. } => RESOLVE.code,
            TransportError::ConnectFailed { .. } => CONNECT.code,
            TransportError::Timeout { .. } => TIMEOUT_CODE,
            TransportError::Io { operation, .. } => operation.code,
            TransportError::Protocol { .. } => PROTOCOL_CODE,
            TransportError::InvalidArgument { .. } => INVALID_ARGUMENT_CODE,
            TransportError::InvalidState { .. } => INVALID_STATE_CODE,
            TransportError::Bind { .. } => BIND.code,
            TransportError::ExecutorShutdown => EXECUTOR_SHUTDOWN_CODE,
        }
    }

    /// 若错误源自 IO，返回底层 [`io::ErrorKind`]。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            TransportError::ResolutionFailed { source, .. }
            | TransportError::ConnectFailed { source, .. }
            | TransportError::Io { source, .. }
            | TransportError::Bind { source, .. } => Some(source.kind()),
            TransportError::Timeout { .. } => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn protocol(detail: impl Into<Cow<'static, str>>) -> Self {
        TransportError::Protocol {
            detail: detail.into(),
        }
    }

    pub fn invalid_argument(detail: impl Into<Cow<'static, str>>) -> Self {
        TransportError::InvalidArgument {
            detail: detail.into(),
        }
    }

    pub fn invalid_state(detail: impl Into<Cow<'static, str>>) -> Self {
        TransportError::InvalidState {
            detail: detail.into(),
        }
    }
}

/// 将 IO 错误映射为传输错误。
pub fn map_io_error(operation: OperationKind, source: io::Error) -> TransportError {
    TransportError::Io { operation, source }
}

/// 构造超时错误。
pub fn timeout_error(operation: OperationKind) -> TransportError {
    TransportError::Timeout { operation }
}

/// [`crate::Buffer`] 提取失败的原因。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// 读区在一个完整记号形成之前耗尽。
    #[error("缓冲区已耗尽，无法提取完整记号")]
    Exhausted,
    /// 记号无法解析为目标类型。
    #[error("无法将记号 `{token}` 解析为 {target}")]
    Parse { token: String, target: &'static str },
}

impl From<BufferError> for TransportError {
    fn from(value: BufferError) -> Self {
        TransportError::protocol(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_operation_code_and_kind() {
        let err = map_io_error(READ, io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.code(), READ.code);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionReset));
        assert!(err.to_string().starts_with("tcp read"));
    }

    #[test]
    fn timeout_reports_timed_out() {
        let err = timeout_error(CONNECT);
        assert!(err.is_timeout());
        assert_eq!(err.io_kind(), Some(io::ErrorKind::TimedOut));
        assert_eq!(err.to_string(), "tcp connect timed out");
    }

    #[test]
    fn buffer_errors_become_protocol_errors() {
        let err: TransportError = BufferError::Parse {
            token: "abc".into(),
            target: "u16",
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("abc"));
    }
}
