//! MJPEG stream server
//!
//! Owns the listening socket, the frame queue, the distributor and the
//! session set, and drives them through start, stop and restart.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameQueue, FrameSink, NotifyFrameGenerator, NotifyKind};
use crate::http::Pages;
use crate::security::{validate_pin, AddressScheme, PinGuard};
use crate::server::config::ServerConfig;
use crate::server::connection::{self, RunContext};
use crate::server::distributor::Distributor;
use crate::server::events::{ServerEvent, EVENT_CHANNEL_CAPACITY};
use crate::server::state::{ServerState, StateCell, StopReason};
use crate::session::SessionSet;
use crate::stats::StatsCollector;

/// Pause after a failed `accept()` before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to an MJPEG stream server
///
/// Cheap to clone; all clones control the same server.
#[derive(Clone)]
pub struct StreamServer {
    shared: Arc<Shared>,
}

struct Shared {
    config: StdMutex<ServerConfig>,
    notify: Arc<dyn NotifyFrameGenerator>,
    state: StateCell,
    run: Mutex<Option<Run>>,
    generation: AtomicU64,
    local_addr: StdMutex<Option<SocketAddr>>,
    queue: Arc<FrameQueue>,
    sessions: Arc<SessionSet>,
    distributor: Arc<Distributor>,
    stats: Arc<StatsCollector>,
    events: broadcast::Sender<ServerEvent>,
    failures_tx: mpsc::UnboundedSender<String>,
    failures_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Resources of one server run
struct Run {
    generation: u64,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    stats_task: JoinHandle<()>,
}

impl StreamServer {
    /// Create a stopped server
    pub fn new<N>(config: ServerConfig, notify: N) -> Self
    where
        N: NotifyFrameGenerator,
    {
        let config = config.sanitized();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(FrameQueue::with_capacity(config.queue_capacity));
        let stats = Arc::new(StatsCollector::new());
        let sessions = Arc::new(SessionSet::new(Arc::clone(&stats), events.clone()));
        let distributor = Arc::new(Distributor::new(Arc::clone(&queue), Arc::clone(&sessions)));

        Self {
            shared: Arc::new(Shared {
                config: StdMutex::new(config),
                notify: Arc::new(notify),
                state: StateCell::new(ServerState::Stopped),
                run: Mutex::new(None),
                generation: AtomicU64::new(0),
                local_addr: StdMutex::new(None),
                queue,
                sessions,
                distributor,
                stats,
                events,
                failures_tx,
                failures_rx: Mutex::new(failures_rx),
            }),
        }
    }

    fn config_lock(&self) -> MutexGuard<'_, ServerConfig> {
        self.shared
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current configuration
    pub fn config(&self) -> ServerConfig {
        self.config_lock().clone()
    }

    /// Current run state
    pub fn state(&self) -> ServerState {
        self.shared.state.get()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .shared
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connected stream clients
    pub fn client_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Producer handle for a [`FrameSource`](crate::FrameSource)
    ///
    /// The sink stays valid across restarts; frames pushed while the server
    /// is stopped are discarded at the next start.
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink::new(
            Arc::clone(&self.shared.queue),
            self.config_lock().jpeg_quality,
            self.shared.failures_tx.clone(),
        )
    }

    fn set_state(&self, state: ServerState) {
        self.shared.state.set(state);
        // No subscribers is fine
        let _ = self.shared.events.send(ServerEvent::StateChanged(state));
    }

    /// Bind the listener and start streaming
    ///
    /// Returns the bound address. Fails with [`Error::AlreadyRunning`] unless
    /// the server is stopped, [`Error::PortInUse`] if the port is taken, and
    /// [`Error::Startup`] for any other bind failure.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut run = self.shared.run.lock().await;
        if run.is_some() || self.state() != ServerState::Stopped {
            return Err(Error::AlreadyRunning);
        }

        self.set_state(ServerState::Starting);
        let config = self.config().sanitized();
        let (listener, local_addr, scheme) = match bind(&config).await {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(addr = %config.bind_addr, error = %e, "Server start failed");
                self.set_state(ServerState::Stopped);
                return Err(e);
            }
        };

        let shared = &self.shared;
        shared.queue.set_capacity(config.queue_capacity);
        shared.queue.clear();
        shared.queue.push(shared.notify.notify_frame(NotifyKind::Idle));
        shared.stats.clear();
        shared.sessions.open();
        shared
            .distributor
            .start(config.tick_interval, config.heartbeat_ticks);

        let ctx = Arc::new(RunContext {
            pages: Pages::render(&scheme, config.html_back_color),
            guard: PinGuard::new(config.pin_enabled && config.block_address),
            scheme,
            sessions: Arc::clone(&shared.sessions),
            distributor: Arc::clone(&shared.distributor),
            send_timeout: config.send_timeout,
            request_timeout: config.request_timeout,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            config.tcp_nodelay,
            shutdown_rx.clone(),
        ));
        let stats_task = shared
            .stats
            .spawn_stats_task(config.stats_interval, shared.events.clone());

        // Failures reported while stopped belong to an earlier run
        {
            let mut failures = shared.failures_rx.lock().await;
            while failures.try_recv().is_ok() {}
        }
        let generation = shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::spawn(supervise(self.clone(), generation, shutdown_rx));

        *run = Some(Run {
            generation,
            shutdown,
            accept_task,
            stats_task,
        });
        *shared
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        self.set_state(ServerState::Running);

        tracing::info!(addr = %local_addr, pin_enabled = config.pin_enabled, "MJPEG server listening");
        Ok(local_addr)
    }

    /// Stop streaming; lingering clients see the idle frame
    ///
    /// No-op when already stopped.
    pub async fn stop(&self) {
        self.stop_run(StopReason::Stop, None, None).await;
    }

    /// Stop for `reason`, showing the matching notify frame
    pub async fn stop_with_reason(&self, reason: StopReason) {
        self.stop_run(reason, None, None).await;
    }

    /// Stop for `reason`, showing `frame` to lingering clients
    pub async fn stop_with_frame(&self, reason: StopReason, frame: Frame) {
        self.stop_run(reason, Some(frame), None).await;
    }

    /// Stop for `reason` and start again with the current configuration
    pub async fn restart(&self, reason: StopReason) -> Result<SocketAddr> {
        self.stop_run(reason, None, None).await;
        self.start().await
    }

    /// Replace the configuration
    ///
    /// A running server restarts; clients are told to go to the new address
    /// if the PIN settings changed and to reload otherwise.
    pub async fn update_config(&self, config: ServerConfig) -> Result<()> {
        let config = config.sanitized();
        if config.pin_enabled {
            validate_pin(&config.pin)?;
        }

        let reason = {
            let mut current = self.config_lock();
            let reason = if current.pin != config.pin || current.pin_enabled != config.pin_enabled {
                StopReason::PinChanged
            } else {
                StopReason::SettingsChanged
            };
            *current = config;
            reason
        };

        self.restart_if_running(reason).await
    }

    /// Change the PIN
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        validate_pin(pin)?;

        let enabled = {
            let mut config = self.config_lock();
            if config.pin == pin {
                return Ok(());
            }
            config.pin = pin.to_string();
            config.pin_enabled
        };

        if enabled {
            self.restart_if_running(StopReason::PinChanged).await
        } else {
            Ok(())
        }
    }

    /// Turn the PIN gate on or off
    pub async fn set_pin_enabled(&self, enabled: bool) -> Result<()> {
        {
            let mut config = self.config_lock();
            if config.pin_enabled == enabled {
                return Ok(());
            }
            if enabled {
                validate_pin(&config.pin)?;
            }
            config.pin_enabled = enabled;
        }

        self.restart_if_running(StopReason::PinChanged).await
    }

    async fn restart_if_running(&self, reason: StopReason) -> Result<()> {
        if self.state() == ServerState::Stopped {
            return Ok(());
        }
        self.restart(reason).await.map(|_| ())
    }

    /// Stop run `generation` and publish the failure
    ///
    /// Ignored if that run already ended, e.g. a user stop won the race.
    async fn on_source_failure(&self, generation: u64, reason: String) {
        let stopped = self
            .stop_run(StopReason::SourceFailed, None, Some(generation))
            .await;
        if stopped {
            tracing::warn!(reason = %reason, "Stopped after frame source failure");
            let _ = self.shared.events.send(ServerEvent::SourceFailed(reason));
        } else {
            tracing::debug!(reason = %reason, "Source failure after run ended");
        }
    }

    /// Returns `false` if there was no matching run to stop
    async fn stop_run(
        &self,
        reason: StopReason,
        frame: Option<Frame>,
        generation: Option<u64>,
    ) -> bool {
        let mut run = self.shared.run.lock().await;
        let current = match run.take() {
            Some(current) if generation.map_or(true, |g| g == current.generation) => current,
            other => {
                *run = other;
                return false;
            }
        };

        self.set_state(ServerState::Stopping);
        tracing::info!(reason = ?reason, "Stopping MJPEG server");

        let _ = current.shutdown.send(true);
        if let Err(e) = current.accept_task.await {
            tracing::error!(error = %e, "Accept task failed");
        }
        current.stats_task.abort();

        let frame = frame.unwrap_or_else(|| self.shared.notify.notify_frame(reason.notify_kind()));
        self.shared.distributor.stop(&frame).await;

        *self
            .shared
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.set_state(ServerState::Stopped);
        tracing::info!("MJPEG server stopped");
        true
    }
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("clients", &self.client_count())
            .finish()
    }
}

async fn bind(config: &ServerConfig) -> Result<(TcpListener, SocketAddr, AddressScheme)> {
    let scheme = AddressScheme::new(&config.pin, config.pin_enabled)?;

    let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            Error::PortInUse(config.bind_addr)
        } else {
            Error::Startup(e)
        }
    })?;
    let local_addr = listener.local_addr().map_err(Error::Startup)?;

    Ok((listener, local_addr, scheme))
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<RunContext>,
    tcp_nodelay: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => spawn_connection(Arc::clone(&ctx), socket, peer, tcp_nodelay),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }
    tracing::debug!("Accept loop stopped");
}

fn spawn_connection(ctx: Arc<RunContext>, socket: TcpStream, peer: SocketAddr, tcp_nodelay: bool) {
    if tcp_nodelay {
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
    }
    let local = match socket.local_addr() {
        Ok(local) => local,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Connection dropped before routing");
            return;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = connection::handle(ctx, socket, peer, local).await {
            tracing::debug!(peer = %peer, error = %e, "Connection error");
        }
    });
}

/// Stop the run if the frame source reports a failure
async fn supervise(server: StreamServer, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let reason = {
        let mut failures = server.shared.failures_rx.lock().await;
        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            reason = failures.recv() => match reason {
                Some(reason) => reason,
                None => return,
            },
        }
    };

    server.on_source_failure(generation, reason).await;
}
