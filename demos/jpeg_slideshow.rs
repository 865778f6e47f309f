//! MJPEG slideshow example
//!
//! Streams every `.jpg` file in a directory, one after another, to any
//! browser that opens the printed address.
//!
//! Run with: cargo run --example jpeg_slideshow DIR [BIND_ADDR] [PIN]
//!
//! Examples:
//!   cargo run --example jpeg_slideshow ./frames                        # binds to 0.0.0.0:8080
//!   cargo run --example jpeg_slideshow ./frames localhost:9000         # binds to 127.0.0.1:9000
//!   cargo run --example jpeg_slideshow ./frames 0.0.0.0:8080 4321      # PIN-gated stream

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mjpeg_rs::{
    Frame, FrameSink, FrameSource, ServerConfig, ServerEvent, StaticNotifyFrames, StreamServer,
};
use tokio::task::JoinHandle;

const FRAME_INTERVAL: Duration = Duration::from_millis(500);

/// Cycles through the JPEG files of a directory
struct Slideshow {
    frames: Vec<PathBuf>,
    task: Option<JoinHandle<()>>,
}

impl Slideshow {
    fn open(dir: &Path) -> std::io::Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        Ok(Self { frames, task: None })
    }
}

impl FrameSource for Slideshow {
    fn start(&mut self, sink: FrameSink) -> mjpeg_rs::Result<()> {
        self.stop();

        let frames = self.frames.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(FRAME_INTERVAL);
            for path in frames.iter().cycle() {
                interval.tick().await;
                match tokio::fs::read(path).await {
                    Ok(jpeg) => sink.push_jpeg(jpeg),
                    Err(e) => {
                        sink.report_failure(format!("{}: {}", path.display(), e));
                        return;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Parse bind address from command line argument.
///
/// Accepts `IP:PORT`, `IP` (port 8080) or `localhost[:PORT]`.
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8080;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: jpeg_slideshow DIR [BIND_ADDR] [PIN]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  DIR          Directory with .jpg files to stream");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
    eprintln!("  PIN          Four digit PIN protecting the stream address");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let dir = PathBuf::from(&args[1]);
    let bind_addr = match args.get(2) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse()?)
                .add_directive("jpeg_slideshow=debug".parse()?),
        )
        .init();

    let mut source = Slideshow::open(&dir)?;
    let first = match source.frames.first() {
        Some(path) => std::fs::read(path)?,
        None => {
            eprintln!("Error: no .jpg files in {}", dir.display());
            std::process::exit(1);
        }
    };

    let mut config = ServerConfig::with_addr(bind_addr);
    if let Some(pin) = args.get(3) {
        config = config.pin(pin.as_str()).block_address(true);
    }

    // The first slide doubles as every notify frame
    let server = StreamServer::new(config, StaticNotifyFrames::uniform(Frame::new(first)));
    let addr = server.start().await?;
    source.start(server.frame_sink())?;

    println!("Streaming {} slides from {}", source.frames.len(), dir.display());
    println!("Open http://{}/ in a browser", addr);
    println!();

    let mut events = server.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ServerEvent::ClientCount(n)) => println!("Clients: {}", n),
                Ok(ServerEvent::Statistics(stats)) => tracing::debug!(
                    clients = stats.active_clients(),
                    bytes = stats.total_traffic(),
                    "Statistics"
                ),
                Ok(ServerEvent::SourceFailed(reason)) => {
                    eprintln!("Source failed: {}", reason);
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "Event stream lagged"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    source.stop();
    server.stop().await;

    Ok(())
}
