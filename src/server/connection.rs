//! Per-connection handling
//!
//! Each accepted socket runs in its own task: read the request head, route,
//! then either answer and close or hand the socket to a [`ClientSession`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::http::{read_request_line, route, Pages, Response, Route, Status};
use crate::security::{AddressScheme, PinGuard};
use crate::server::distributor::Distributor;
use crate::session::{ClientSession, SessionSet};

/// Everything a connection needs from the current run
#[derive(Debug)]
pub(crate) struct RunContext {
    pub scheme: AddressScheme,
    pub pages: Pages,
    pub guard: PinGuard,
    pub sessions: Arc<SessionSet>,
    pub distributor: Arc<Distributor>,
    pub send_timeout: Duration,
    pub request_timeout: Duration,
}

/// What the router decided for one connection
#[derive(Debug)]
enum Outcome {
    Respond(Response),
    Stream,
}

impl RunContext {
    fn decide(&self, route: Route, peer: SocketAddr, location: &str) -> Outcome {
        let ip = peer.ip();
        let blocked = self.guard.is_blocked(ip);

        let response = match route {
            Route::Index => Response::html(Status::Ok, self.pages.index.clone()),
            Route::PinForm if blocked => self.forbidden(),
            Route::PinForm => Response::html(Status::Ok, self.pages.pin_request.clone()),
            Route::PinSubmit { .. } if blocked => self.forbidden(),
            Route::PinSubmit { accepted } => {
                if self.guard.record(ip, accepted) {
                    self.forbidden()
                } else if accepted {
                    Response::html(Status::Ok, self.pages.index.clone())
                } else {
                    tracing::warn!(peer = %peer, "Wrong PIN");
                    Response::html(Status::Ok, self.pages.pin_error.clone())
                }
            }
            Route::Stream if blocked => Response::redirect(location),
            Route::Stream => return Outcome::Stream,
            Route::Snapshot if blocked => Response::redirect(location),
            Route::Snapshot => match self.distributor.last_frame() {
                Some(frame) => Response::jpeg(frame.data().clone()),
                None => Response::redirect(location),
            },
            Route::Favicon => Response::png(Pages::favicon()),
            Route::Redirect => Response::redirect(location),
        };

        Outcome::Respond(response)
    }

    fn forbidden(&self) -> Response {
        Response::html(Status::Forbidden, self.pages.blocked.clone())
    }
}

/// Serve one accepted connection
pub(crate) async fn handle<S>(
    ctx: Arc<RunContext>,
    mut socket: S,
    peer: SocketAddr,
    local: SocketAddr,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let request = read_request_line(&mut socket, ctx.request_timeout).await?;
    let route = route(request.as_ref(), &ctx.scheme);
    tracing::debug!(
        peer = %peer,
        target = request.as_ref().map(|r| r.target.as_str()).unwrap_or(""),
        route = ?route,
        "Request"
    );

    let location = format!("http://{}/", local);
    match ctx.decide(route, peer, &location) {
        Outcome::Respond(response) => respond(socket, &response, ctx.send_timeout).await,
        Outcome::Stream => {
            let session = Arc::new(ClientSession::new(
                ctx.sessions.next_id(),
                peer,
                socket,
                ctx.send_timeout,
            ));
            session.send_header().await?;
            if let Err(e) = ctx.sessions.insert(Arc::clone(&session)) {
                session.close().await;
                return Err(e);
            }
            catch_up(&ctx, &session).await;
            Ok(())
        }
    }
}

/// Send the last distributed frame to a client that just joined
///
/// Skipped if the distributor is already sending to it.
async fn catch_up(ctx: &RunContext, session: &Arc<ClientSession>) {
    let Some(frame) = ctx.distributor.last_frame() else {
        return;
    };
    let Some(permit) = session.try_begin_send() else {
        return;
    };

    let id = session.id();
    match permit.send(&frame, false).await {
        Ok(written) => ctx.sessions.stats().on_bytes(id, written as u64),
        Err(_) => ctx.sessions.teardown(id).await,
    }
}

async fn respond<S>(mut socket: S, response: &Response, timeout: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let wire = response.encode();
    let write = async {
        socket.write_all(&wire).await?;
        socket.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(crate::error::Error::SendTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameQueue};
    use crate::server::events::ServerEvent;
    use crate::stats::StatsCollector;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;
    use tokio::sync::broadcast;

    fn context(scheme: AddressScheme, block: bool) -> Arc<RunContext> {
        context_with_queue(scheme, block, Arc::new(FrameQueue::new()))
    }

    fn context_with_queue(
        scheme: AddressScheme,
        block: bool,
        queue: Arc<FrameQueue>,
    ) -> Arc<RunContext> {
        let (events, _) = broadcast::channel::<ServerEvent>(16);
        let sessions = Arc::new(SessionSet::new(Arc::new(StatsCollector::new()), events));
        sessions.open();
        let distributor = Arc::new(Distributor::new(queue, Arc::clone(&sessions)));

        Arc::new(RunContext {
            pages: Pages::render(&scheme, 0),
            guard: PinGuard::with_limits(block, 2, Duration::from_secs(60)),
            scheme,
            sessions,
            distributor,
            send_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        })
    }

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7)), 50000)
    }

    fn local() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2)), 8080)
    }

    /// Run one request through `handle` and return everything written back
    async fn exchange(ctx: &Arc<RunContext>, request: &str) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(request.as_bytes()).await.unwrap();

        handle(Arc::clone(ctx), server, peer(), local()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_index_and_favicon() {
        let ctx = context(AddressScheme::open(), false);

        let index = exchange(&ctx, "GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(index.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(index.contains("/screen_stream.mjpeg"));

        let favicon = exchange(&ctx, "GET /favicon.ico HTTP/1.1\r\n\r\n").await;
        assert!(favicon.contains("Content-Type: image/png\r\n"));
    }

    #[tokio::test]
    async fn test_unknown_path_redirects_to_root() {
        let ctx = context(AddressScheme::open(), false);

        let response = exchange(&ctx, "GET /admin HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(response.contains("Location: http://192.168.0.2:8080/\r\n"));

        let response = exchange(&ctx, "\r\n").await;
        assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
    }

    #[tokio::test]
    async fn test_snapshot_without_frame_redirects() {
        let ctx = context(AddressScheme::open(), false);

        let response = exchange(&ctx, "GET /screen_stream.jpeg HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
    }

    #[tokio::test]
    async fn test_pin_flow() {
        let scheme = AddressScheme::new("1234", true).unwrap();
        let stream_path = scheme.stream_path().to_string();
        let ctx = context(scheme, false);

        let form = exchange(&ctx, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(form.contains("name=\"pin\""));
        assert!(!form.contains(&stream_path));

        let wrong = exchange(&ctx, "GET /?pin=9999 HTTP/1.1\r\n\r\n").await;
        assert!(wrong.contains("Wrong PIN"));

        let index = exchange(&ctx, "GET /?pin=1234 HTTP/1.1\r\n\r\n").await;
        assert!(index.contains(&stream_path));
    }

    #[tokio::test]
    async fn test_blocked_address() {
        let ctx = context(AddressScheme::new("1234", true).unwrap(), true);

        let first = exchange(&ctx, "GET /?pin=0001 HTTP/1.1\r\n\r\n").await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        let second = exchange(&ctx, "GET /?pin=0002 HTTP/1.1\r\n\r\n").await;
        assert!(second.starts_with("HTTP/1.1 403 Forbidden\r\n"));

        // Even the right PIN is refused while blocked
        let right = exchange(&ctx, "GET /?pin=1234 HTTP/1.1\r\n\r\n").await;
        assert!(right.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        let form = exchange(&ctx, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(form.starts_with("HTTP/1.1 403 Forbidden\r\n"));

        let stream = format!("GET {} HTTP/1.1\r\n\r\n", ctx.scheme.stream_path());
        let stream = exchange(&ctx, &stream).await;
        assert!(stream.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
    }

    #[tokio::test]
    async fn test_stream_request_joins_session_set() {
        let ctx = context(AddressScheme::open(), false);
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client
            .write_all(b"GET /screen_stream.mjpeg HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        handle(Arc::clone(&ctx), server, peer(), local()).await.unwrap();
        assert_eq!(ctx.sessions.len(), 1);

        let mut header = vec![0; crate::http::stream_header().len()];
        client.read_exact(&mut header).await.unwrap();
        assert!(String::from_utf8(header)
            .unwrap()
            .contains("multipart/x-mixed-replace"));

        ctx.distributor.stop(&Frame::from_static(b"bye")).await;
        assert!(ctx.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_new_client_gets_last_frame() {
        let queue = Arc::new(FrameQueue::new());
        let ctx = context_with_queue(AddressScheme::open(), false, Arc::clone(&queue));

        // Long heartbeat: anything arriving soon comes from the join itself
        queue.push(Frame::from_static(b"current"));
        ctx.distributor.start(Duration::from_millis(10), 10_000);
        while ctx.distributor.last_frame().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client
            .write_all(b"GET /screen_stream.mjpeg HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        handle(Arc::clone(&ctx), server, peer(), local()).await.unwrap();

        let expected = [
            &crate::http::stream_header()[..],
            &crate::http::part_header(7)[..],
            b"current\r\n",
        ]
        .concat();
        let mut received = vec![0; expected.len()];
        tokio::time::timeout(Duration::from_millis(500), client.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);
        let stats = ctx.sessions.stats().tick();
        let part_len = expected.len() - crate::http::stream_header().len();
        assert_eq!(stats.clients[0].bytes_sent, part_len as u64);

        ctx.distributor.stop(&Frame::from_static(b"bye")).await;
    }

    #[tokio::test]
    async fn test_stream_after_stop_is_closed() {
        let ctx = context(AddressScheme::open(), false);
        ctx.sessions.drain();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client
            .write_all(b"GET /screen_stream.mjpeg HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let result = handle(Arc::clone(&ctx), server, peer(), local()).await;
        assert!(result.is_err());

        // Header, then EOF
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), crate::http::stream_header().len());
    }
}
