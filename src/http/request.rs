//! Request-line parsing and routing
//!
//! Only the request line matters. Headers are read and discarded so that
//! closing the socket does not reset the connection under the client.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::{Error, Result};
use crate::security::address::{AddressScheme, FAVICON_PATH, ROOT_PATH};

/// Upper bound on the request head (request line + headers)
pub const MAX_REQUEST_HEAD: u64 = 8 * 1024;

/// Method and target of an HTTP request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Request method (e.g. `GET`)
    pub method: String,
    /// Request target as sent (path plus query)
    pub target: String,
}

impl RequestLine {
    /// Parse `METHOD SP TARGET [SP VERSION]`
    ///
    /// Returns `None` for blank or single-token lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let method = parts.next()?;
        let target = parts.next()?;

        Some(Self {
            method: method.to_string(),
            target: target.to_string(),
        })
    }

    /// Whether this is a `GET` request
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// What to do with an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Serve the landing page with the stream embedded
    Index,
    /// Serve the PIN entry form
    PinForm,
    /// A PIN was submitted; `accepted` tells whether it was the right one
    PinSubmit {
        /// Whether the submitted PIN matched
        accepted: bool,
    },
    /// Upgrade to a live MJPEG stream
    Stream,
    /// Serve the most recent frame as a single JPEG
    Snapshot,
    /// Serve the favicon
    Favicon,
    /// Anything else: redirect to the server root
    Redirect,
}

/// Classify a request against the current address scheme
///
/// Missing, malformed and non-`GET` requests are redirected.
pub fn route(request: Option<&RequestLine>, scheme: &AddressScheme) -> Route {
    let request = match request {
        Some(request) if request.is_get() => request,
        _ => return Route::Redirect,
    };
    let target = request.target.as_str();

    if target == ROOT_PATH {
        return if scheme.pin_enabled() {
            Route::PinForm
        } else {
            Route::Index
        };
    }

    if scheme.pin_enabled() && scheme.is_pin_submission(target) {
        return Route::PinSubmit {
            accepted: scheme.matches_pin(target),
        };
    }

    if target == scheme.stream_path() {
        return Route::Stream;
    }
    if target == scheme.snapshot_path() {
        return Route::Snapshot;
    }
    if target == FAVICON_PATH {
        return Route::Favicon;
    }

    Route::Redirect
}

/// Read the request head from `stream` and return its request line
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything, sent a blank line, or sent something that is not text.
pub async fn read_request_line<R>(stream: R, timeout: Duration) -> Result<Option<RequestLine>>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_head(stream)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "request head not received in time",
        ))),
    }
}

async fn read_head<R>(stream: R) -> Result<Option<RequestLine>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream).take(MAX_REQUEST_HEAD);

    let mut request_line = String::new();
    match reader.read_line(&mut request_line).await {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if request_line.trim().is_empty() {
        return Ok(None);
    }

    // Drain headers up to the blank line
    let mut header = String::new();
    loop {
        header.clear();
        match reader.read_line(&mut header).await {
            Ok(0) => break,
            Ok(_) if header.trim_end().is_empty() => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(RequestLine::parse(&request_line))
}
