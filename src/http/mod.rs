//! Minimal HTTP surface
//!
//! Just enough HTTP/1.1 for a browser to render an MJPEG stream: one request
//! line per connection, a handful of fixed routes, and `Connection: close` on
//! everything except the stream itself.

pub mod pages;
pub mod request;
pub mod response;

pub use pages::Pages;
pub use request::{read_request_line, route, RequestLine, Route};
pub use response::{part_header, stream_header, Response, Status, BOUNDARY};
