//! 读取停止条件。
//!
//! # 教案式说明
//! - **意图（Why）**：`ReadOne` 不关心“一条消息”长什么样，只在每次读取后询问停止条件
//!   “未消费字节里是否已凑够一个单元”；
//! - **契约（What）**：`evaluate(unconsumed)` 返回 `(position, matched)`：
//!   - `matched == true` 时，`position` 是相对 `unconsumed` 起点的单元边界（不超过切片长度）；
//!   - `matched == false` 时，`position` 是续扫提示：下一次评估从该位置开始传入切片，
//!     已确认不可能命中的前缀不会被重复扫描；
//! - **实现（How）**：任何 `FnMut(&[u8]) -> (usize, bool)` 闭包都自动实现 [`StopCondition`]，
//!   无需继承体系。

use tether_core::TransportError;

/// 决定一次读取何时结束的谓词。
pub trait StopCondition: Send + 'static {
    fn evaluate(&mut self, unconsumed: &[u8]) -> (usize, bool);
}

impl<F> StopCondition for F
where
    F: FnMut(&[u8]) -> (usize, bool) + Send + 'static,
{
    fn evaluate(&mut self, unconsumed: &[u8]) -> (usize, bool) {
        self(unconsumed)
    }
}

/// 累积到至少 `n` 个字节即命中，边界为起点后第 `n` 个字节。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteCount(usize);

impl ByteCount {
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    pub const fn get(&self) -> usize {
        self.0
    }
}

impl StopCondition for ByteCount {
    fn evaluate(&mut self, unconsumed: &[u8]) -> (usize, bool) {
        if unconsumed.len() >= self.0 {
            (self.0, true)
        } else {
            (0, false)
        }
    }
}

/// 扫描首个完整出现的分隔串，边界为匹配末字节之后。
///
/// 未命中时返回可能构成部分匹配的最早位置，跨越多次读取的分隔串也能被识别。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Substring {
    token: Vec<u8>,
}

impl Substring {
    /// 空分隔串没有意义，构造期即返回 `InvalidArgument`。
    pub fn new(token: impl AsRef<[u8]>) -> Result<Self, TransportError> {
        let token = token.as_ref();
        if token.is_empty() {
            return Err(TransportError::invalid_argument(
                "substring stop condition requires a non-empty token",
            ));
        }
        Ok(Self {
            token: token.to_vec(),
        })
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }
}

impl StopCondition for Substring {
    fn evaluate(&mut self, unconsumed: &[u8]) -> (usize, bool) {
        let width = self.token.len();
        match unconsumed
            .windows(width)
            .position(|window| window == self.token.as_slice())
        {
            Some(start) => (start + width, true),
            None => (unconsumed.len().saturating_sub(width - 1), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tether_core::ErrorKind;

    #[test]
    fn byte_count_matches_at_exact_length() {
        let mut condition = ByteCount::new(5);
        assert_eq!(condition.evaluate(b"abcd"), (0, false));
        assert_eq!(condition.evaluate(b"abcde"), (5, true));
        assert_eq!(condition.evaluate(b"abcdefg"), (5, true));
        assert_eq!(ByteCount::new(0).evaluate(b""), (0, true));
    }

    #[test]
    fn substring_reports_boundary_after_token() {
        let mut condition = Substring::new("\n").expect("非空分隔串");
        assert_eq!(condition.evaluate(b"Hello World!\n"), (13, true));
        assert_eq!(condition.evaluate(b"Hello"), (5, false));
    }

    #[test]
    fn substring_resume_hint_keeps_partial_match() {
        let mut condition = Substring::new("\r\n\r\n").expect("非空分隔串");
        let (hint, matched) = condition.evaluate(b"HTTP/1.1 200 OK\r\n\r");
        assert!(!matched);
        let resumed = b"HTTP/1.1 200 OK\r\n\r\n";
        assert_eq!(condition.evaluate(&resumed[hint..]), (resumed.len() - hint, true));
    }

    #[test]
    fn empty_substring_is_rejected() {
        let err = Substring::new("").expect_err("空分隔串应被拒绝");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn closures_are_stop_conditions() {
        let mut calls = 0;
        let mut condition = move |bytes: &[u8]| {
            calls += 1;
            (bytes.len(), calls > 1)
        };
        assert_eq!(StopCondition::evaluate(&mut condition, b"ab"), (2, false));
        assert_eq!(StopCondition::evaluate(&mut condition, b"ab"), (2, true));
    }

    proptest! {
        #[test]
        fn substring_split_anywhere_finds_same_boundary(
            prefix in "[a-z ]{0,32}",
            split in 0usize..64,
        ) {
            let stream = format!("{prefix}\r\n\r\nbody");
            let bytes = stream.as_bytes();
            let expected = prefix.len() + 4;
            let split = split.min(bytes.len());

            let mut condition = Substring::new("\r\n\r\n").expect("非空分隔串");
            let (hint, matched) = condition.evaluate(&bytes[..split]);
            let boundary = if matched {
                hint
            } else {
                let (rest, matched) = condition.evaluate(&bytes[hint..]);
                prop_assert!(matched);
                hint + rest
            };
            prop_assert_eq!(boundary, expected);
        }
    }
}
