use std::{any::type_name, fmt, fmt::Write as _, str::FromStr};

use bytes::{Buf, Bytes, BytesMut};

use crate::error::BufferError;

/// 追加写入、顺序消费的字节暂存区。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 读写操作与 HTTP 状态机都需要“先攒字节，再按记号/行提取”的能力，
///   统一的暂存区避免每个操作各自维护游标；
/// - 以 `BytesMut` 为底层存储，已消费的前缀直接 `advance` 释放，读游标永不回退。
///
/// ## 契约 (What)
/// - `append`：把任意 `Display` 值序列化为文本追加到写区；
/// - `extract`：跳过前导空白，提取下一个空白分隔的记号并解析为目标类型；
/// - `read_line`：提取到下一个换行符为止的内容（不含 `\r\n`/`\n`）；
/// - `snapshot`：返回全部未消费内容的文本副本，不移动游标；
/// - `reset`：丢弃全部内容。
///
/// ## 注意事项 (Trade-offs)
/// - 提取失败时游标保持在失败前的位置，调用方可以在更多字节到达后重试；
/// - `snapshot` 按 UTF-8 有损转换，二进制内容请使用 [`Buffer::as_bytes`]。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// 以一个值的文本形式初始化缓冲区。
    pub fn from_value<T: fmt::Display>(value: T) -> Self {
        let mut buffer = Self::new();
        buffer.append(value);
        buffer
    }

    /// 追加值的文本表示。
    pub fn append<T: fmt::Display>(&mut self, value: T) -> &mut Self {
        // `BytesMut` 的 `fmt::Write` 实现只会在容量溢出时失败，而它会自动扩容。
        let _ = write!(self.data, "{value}");
        self
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// 提取下一个空白分隔的记号并解析为 `T`。
    pub fn extract<T: FromStr>(&mut self) -> Result<T, BufferError> {
        let (start, end) = self.next_token_span().ok_or(BufferError::Exhausted)?;
        let token = String::from_utf8_lossy(&self.data[start..end]).into_owned();
        let value = token.parse::<T>().map_err(|_| BufferError::Parse {
            token: token.clone(),
            target: type_name::<T>(),
        })?;
        self.data.advance(end);
        Ok(value)
    }

    /// 提取下一个记号；读区只剩空白时返回 `None`。
    pub fn extract_token(&mut self) -> Option<String> {
        let (start, end) = self.next_token_span()?;
        let token = String::from_utf8_lossy(&self.data[start..end]).into_owned();
        self.data.advance(end);
        Some(token)
    }

    /// 提取一整行。
    ///
    /// 找不到换行符时返回剩余全部内容（与流式 `getline` 在 EOF 处的行为一致）；
    /// 读区为空时返回 [`BufferError::Exhausted`]。
    pub fn read_line(&mut self) -> Result<String, BufferError> {
        if self.data.is_empty() {
            return Err(BufferError::Exhausted);
        }
        let (line_end, consumed) = match self.data.iter().position(|&b| b == b'\n') {
            Some(newline) => (newline, newline + 1),
            None => (self.data.len(), self.data.len()),
        };
        let mut line = &self.data[..line_end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let line = String::from_utf8_lossy(line).into_owned();
        self.data.advance(consumed);
        Ok(line)
    }

    /// 读区是否以空行开头；若是则消费该空行。
    pub fn consume_blank_line(&mut self) -> bool {
        let len = if self.data.starts_with(b"\r\n") {
            2
        } else if self.data.starts_with(b"\n") {
            1
        } else {
            return false;
        };
        self.data.advance(len);
        true
    }

    /// 丢弃前 `n` 个字节（超过长度时清空）。
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.advance(n);
    }

    /// 未消费内容的文本快照。
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// 取出全部未消费内容，缓冲区随之清空。
    pub fn take_bytes(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    pub(crate) fn next_token_span(&self) -> Option<(usize, usize)> {
        let start = self.data.iter().position(|b| !b.is_ascii_whitespace())?;
        let len = self.data[start..]
            .iter()
            .position(u8::is_ascii_whitespace)
            .unwrap_or(self.data.len() - start);
        Some((start, start + len))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("content", &self.snapshot())
            .finish()
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.snapshot())
    }
}

impl From<&[u8]> for Buffer {
    fn from(value: &[u8]) -> Self {
        Self {
            data: BytesMut::from(value),
        }
    }
}

impl From<&str> for Buffer {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes())
    }
}

impl From<Bytes> for Buffer {
    fn from(value: Bytes) -> Self {
        Self::from(value.as_ref())
    }
}
