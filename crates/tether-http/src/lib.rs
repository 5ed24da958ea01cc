#![doc = r#"
# tether-http

## 设计动机（Why）
- **定位**：在调用方提供的已连接 [`TcpChannel`](tether_transport_tcp::TcpChannel) 上完成一次
  HTTP/1.1 请求/响应往返，正文按 `Content-Length` 定界。
- **架构角色**：与 `ReadOne`/`WriteOne` 并列而非叠加，直接驱动套接字读写；
  超时、停止与“至多一次回调”沿用 [`tether_core::Lifecycle`]。

## 核心契约（What）
- [`HttpGet`] / [`HttpPost`]：`start(timeout)` 依次经过 [`Step::Send`]、[`Step::ReadHeaderBlock`]、
  [`Step::ParseHeader`]、[`Step::ReadBody`]、[`Step::Complete`]；
- [`Headers`]：保持顺序、允许重复、按名称大小写不敏感查找；
- [`parse_head`]、[`resolve_body_length`]、[`encode_request`]：可独立测试的纯函数。

## 风险与考量（Trade-offs）
- 不支持分块传输编码、TLS 与连接复用；缺失或非法的 `Content-Length` 以已读字节数降级处理。
"#]

mod exchange;
mod get;
mod headers;
mod post;
mod request;
mod response;

pub use exchange::Step;
pub use get::HttpGet;
pub use headers::Headers;
pub use post::HttpPost;
pub use request::{Method, encode_request};
pub use response::{ResponseHead, parse_head, resolve_body_length};
