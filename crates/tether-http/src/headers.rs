use std::fmt;

use tether_core::TransportError;

/// 有序的 HTTP 头部列表。
///
/// 保留插入顺序，允许重复名称；按名称查找时忽略 ASCII 大小写并返回第一个匹配。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// 第一个名称匹配的值。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 与 [`Headers::get`] 相同，缺失时返回协议错误。
    pub fn require(&self, name: &str) -> Result<&str, TransportError> {
        self.get(name)
            .ok_or_else(|| TransportError::protocol(format!("header `{name}` not found")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::ErrorKind;

    #[test]
    fn lookup_is_case_insensitive_and_returns_first_match() {
        let headers: Headers = [
            ("Set-Cookie", "a=1"),
            ("content-length", "5"),
            ("Set-Cookie", "b=2"),
        ]
        .into_iter()
        .collect();
        assert_eq!(headers.get("Content-Length"), Some("5"));
        assert_eq!(headers.get("set-cookie"), Some("a=1"));
        assert_eq!(headers.len(), 3);
        let err = headers.require("Host").expect_err("缺失的头部");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn display_renders_wire_lines_in_order() {
        let mut headers = Headers::new();
        headers.push("Accept", "*/*").push("X-Trace", "1");
        assert_eq!(headers.to_string(), "Accept: */*\r\nX-Trace: 1\r\n");
    }
}
