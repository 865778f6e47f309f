//! Response encoding and MJPEG framing
//!
//! Short-lived responses are built in one buffer and written at once. The
//! stream response is a preamble followed by one multipart part per frame:
//!
//! ```text
//! HTTP/1.1 200 OK
//! Content-Type: multipart/x-mixed-replace; boundary=<BOUNDARY>
//! ...
//!
//! --<BOUNDARY>
//! Content-Type: image/jpeg
//! Content-Length: <n>
//!
//! <n bytes of JPEG>
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary shared by the stream header and every part
pub const BOUNDARY: &str = "y5exa7CYPPqoASFONZJMz4Ky";

/// Bytes written after each part's payload
pub const PART_TRAILER: &[u8] = b"\r\n";

const CRLF: &[u8] = b"\r\n";

/// Status lines this server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    MovedPermanently,
    Forbidden,
}

impl Status {
    /// Full status line without the trailing CRLF
    pub fn line(self) -> &'static str {
        match self {
            Status::Ok => "HTTP/1.1 200 OK",
            Status::MovedPermanently => "HTTP/1.1 301 Moved Permanently",
            Status::Forbidden => "HTTP/1.1 403 Forbidden",
        }
    }
}

/// A complete response for a short-lived connection
#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
}

impl Response {
    /// Create an empty response
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// HTML page
    pub fn html(status: Status, page: Bytes) -> Self {
        Self::new(status)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(page)
    }

    /// PNG image
    pub fn png(image: Bytes) -> Self {
        Self::new(Status::Ok)
            .header("Content-Type", "image/png")
            .body(image)
    }

    /// Single JPEG image, never cached
    pub fn jpeg(image: Bytes) -> Self {
        Self::new(Status::Ok)
            .header("Content-Type", "image/jpeg")
            .header("Cache-Control", "no-store, no-cache, must-revalidate")
            .body(image)
    }

    /// Permanent redirect to `location`
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(Status::MovedPermanently).header("Location", location)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Serialize into wire bytes
    ///
    /// `Content-Length` and `Connection: close` are always appended.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());

        buf.put_slice(self.status.line().as_bytes());
        buf.put_slice(CRLF);
        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(CRLF);
        }
        buf.put_slice(format!("Content-Length: {}", self.body.len()).as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(b"Connection: close");
        buf.put_slice(CRLF);
        buf.put_slice(CRLF);
        buf.put_slice(&self.body);

        buf.freeze()
    }
}

/// Preamble that turns a connection into an MJPEG stream
pub fn stream_header() -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={}\r\n\
         Cache-Control: no-store, no-cache, must-revalidate, pre-check=0, post-check=0, max-age=0\r\n\
         Pragma: no-cache\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        BOUNDARY
    ))
}

/// Headers preceding a part of `len` JPEG bytes
pub fn part_header(len: usize) -> Bytes {
    Bytes::from(format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY, len
    ))
}
