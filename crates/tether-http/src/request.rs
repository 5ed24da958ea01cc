use std::fmt;

use bytes::Bytes;
use tether_core::Buffer;

use crate::Headers;

/// 支持的请求方法。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 序列化一条完整请求。
///
/// 头部顺序固定为 `Host`、（POST）`Content-Length`、`Connection: Keep-Alive`，
/// 随后是调用方头部、空行与（POST）请求体。
pub fn encode_request(
    method: Method,
    path: &str,
    host: &str,
    headers: &Headers,
    body: &[u8],
) -> Bytes {
    let mut buffer = Buffer::with_capacity(128 + body.len());
    buffer
        .append(method)
        .append(' ')
        .append(path)
        .append(" HTTP/1.1\r\n");
    buffer.append("Host: ").append(host).append("\r\n");
    if method == Method::Post {
        buffer
            .append("Content-Length: ")
            .append(body.len())
            .append("\r\n");
    }
    buffer.append("Connection: Keep-Alive\r\n");
    buffer.append(headers).append("\r\n");
    if method == Method::Post {
        buffer.append_bytes(body);
    }
    buffer.take_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_request_has_no_content_length() {
        let mut headers = Headers::new();
        headers.push("Accept", "text/plain");
        let request = encode_request(Method::Get, "/status", "127.0.0.1", &headers, b"");
        assert_eq!(
            &request[..],
            b"GET /status HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: Keep-Alive\r\nAccept: text/plain\r\n\r\n"
        );
    }

    #[test]
    fn post_request_carries_length_and_body() {
        let request = encode_request(Method::Post, "/submit", "10.0.0.2", &Headers::new(), b"a=1");
        assert_eq!(
            &request[..],
            b"POST /submit HTTP/1.1\r\nHost: 10.0.0.2\r\nContent-Length: 3\r\nConnection: Keep-Alive\r\n\r\na=1"
        );
    }
}
