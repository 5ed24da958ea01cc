//! 响应头解析与正文长度判定。
//!
//! # 教案式说明
//! - **意图（Why）**：响应头块在读到 `\r\n\r\n` 时已经完整，解析是纯函数，可以脱离套接字单独测试；
//! - **契约（What）**：
//!   - 状态行的首个记号必须以 `HTTP/` 开头，第二个记号必须是 `u16`，否则返回协议错误；
//!     原因短语随状态行一并消费，不会出现在头部列表里；
//!   - 头部名称去掉结尾冒号，值去掉首尾空白；遇到空行、空名称或空值即停止；
//!   - [`resolve_body_length`] 只降级不报错：`Content-Length` 缺失、无法解析或小于已读字节数时，
//!     以已读字节数为准并记录告警。

use tether_core::{Buffer, BufferError, TransportError};

use crate::Headers;

const CONTENT_LENGTH: &str = "Content-Length";

/// 解析后的响应头。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status_code: u16,
    pub headers: Headers,
}

/// 解析完整的响应头块（含结尾空行）。
pub fn parse_head(block: &[u8]) -> Result<ResponseHead, TransportError> {
    let mut buffer = Buffer::from(block);
    let version = buffer
        .extract_token()
        .ok_or_else(|| TransportError::protocol("empty response status line"))?;
    if !version.starts_with("HTTP/") {
        return Err(TransportError::protocol(format!(
            "malformed status line: `{version}` is not an HTTP version"
        )));
    }
    let status_code = buffer.extract::<u16>().map_err(|err| match err {
        BufferError::Exhausted => TransportError::protocol("status line has no status code"),
        other => TransportError::from(other),
    })?;
    // 原因短语（可能为空）只跳过，不参与解析。
    buffer.read_line().ok();
    tracing::info!(status = status_code, "http response status received");

    let mut headers = Headers::new();
    while let Ok(line) = buffer.read_line() {
        let Some((name, value)) = line.split_once(':') else {
            if line.trim().is_empty() {
                break;
            }
            return Err(TransportError::protocol(format!(
                "malformed header line `{line}`"
            )));
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            break;
        }
        tracing::debug!(name, value, "http header field");
        headers.push(name, value);
    }
    Ok(ResponseHead {
        status_code,
        headers,
    })
}

/// 依据 `Content-Length` 与已读正文字节数决定正文总长度。
pub fn resolve_body_length(headers: &Headers, already_read: usize) -> usize {
    let declared = match headers.get(CONTENT_LENGTH) {
        Some(value) => match value.trim().parse::<usize>() {
            Ok(declared) => declared,
            Err(_) => {
                tracing::warn!(
                    value,
                    already_read,
                    "unparsable Content-Length, falling back to bytes already read"
                );
                return already_read;
            }
        },
        None => {
            tracing::warn!(
                already_read,
                "response has no Content-Length, falling back to bytes already read"
            );
            return already_read;
        }
    };
    if already_read > declared {
        tracing::warn!(
            declared,
            already_read,
            "Content-Length lower than bytes already read, trusting bytes read"
        );
        return already_read;
    }
    declared
}
