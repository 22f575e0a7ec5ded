//! TCP accept loop and per-connection tasks.
//!
//! Each accepted connection gets its own Tokio task running a
//! [`FrameAssembler`].  Requests are dispatched one at a time, in arrival
//! order, on the blocking thread pool: SPI transfers and the settle sleeps
//! of programming scripts must not stall the async runtime.  Across
//! connections the only ordering is the one imposed by the bus lock.
//!
//! A dispatched request runs to completion even if its connection closes
//! meanwhile; only the pending socket read is abandoned.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use sigma_core::device::{profile_by_name, DeviceProfile};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::bus_transport::BusTransport;
use crate::application::device_control::DeviceController;
use crate::application::dispatch::RequestDispatcher;
use crate::infrastructure::bus::open_driver;
use crate::infrastructure::network::framing::FrameAssembler;
use crate::infrastructure::storage::config::ServerConfig;

/// Socket read size per `read()` call.
const READ_CHUNK: usize = 64 * 1024;

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// A bound listener plus everything a connection needs to serve requests.
pub struct SigmaServer {
    listener: TcpListener,
    dispatcher: Arc<RequestDispatcher>,
    max_frame_len: usize,
}

impl SigmaServer {
    /// Binds `addr` and serves requests through `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<RequestDispatcher>,
        max_frame_len: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind SigmaTCP listener on {addr}"))?;
        Ok(Self {
            listener,
            dispatcher,
            max_frame_len,
        })
    }

    /// Builds the full stack described by `config`: device profile, bus
    /// driver, transport, sequencer, dispatcher and listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile is unknown, the bus cannot be opened
    /// or the listener cannot be bound.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let profile: Arc<dyn DeviceProfile> = Arc::from(
            profile_by_name(&config.device.profile).context("invalid [device] profile")?,
        );
        let stride = profile.word_length();
        info!("device profile {}", profile.name());

        let driver = open_driver(&config.bus, stride).context("failed to open bus")?;
        let bus = BusTransport::new(driver, config.bus.max_transfer_len, stride)
            .context("invalid [bus] settings")?;

        let mut device = DeviceController::new(
            bus.clone(),
            profile,
            config.timing.to_timing(),
            config.device.program_file.clone(),
        );
        if let Some(dir) = &config.device.staging_dir {
            device = device.with_staging_dir(dir);
        }

        let dispatcher = Arc::new(RequestDispatcher::new(
            bus,
            device,
            config.network.max_read_len,
        ));
        let addr = format!("{}:{}", config.network.bind_address, config.network.port);
        Self::bind(&addr, dispatcher, config.network.max_frame_len).await
    }

    /// Address the listener is bound to.  Useful when binding port 0.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    /// Runs the accept loop until `running` is set to `false`.
    ///
    /// Connections already accepted keep running until their peer closes.
    ///
    /// # Errors
    ///
    /// Currently never fails once bound; accept errors are logged and the
    /// loop continues.
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!("SigmaTCP bridge listening on {addr}");
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    info!("connection from {peer_addr}");
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let max_frame_len = self.max_frame_len;
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, dispatcher, max_frame_len).await;
                    });
                }
                Ok(Err(e)) => {
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // No connection within the poll interval.
                }
            }
        }

        Ok(())
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Wraps [`run_connection`] and logs how the connection ended.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<RequestDispatcher>,
    max_frame_len: usize,
) {
    match run_connection(stream, peer_addr, dispatcher, max_frame_len).await {
        Ok(()) => info!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

/// Reads frames from `stream` until the peer disconnects.
///
/// Undecodable frames are logged and dropped; the connection stays open.
async fn run_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<RequestDispatcher>,
    max_frame_len: usize,
) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let mut assembler = FrameAssembler::new(max_frame_len);
    let mut read_buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match stream.read(&mut read_buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if is_disconnect(&e) => {
                debug!("{peer_addr}: {e}");
                return Ok(());
            }
            Err(e) => return Err(e).context("socket read failed"),
        };
        assembler.push(&read_buf[..n]);

        while let Some(decoded) = assembler.next_frame() {
            let request = match decoded {
                Ok(request) => request,
                Err(e) => {
                    warn!("{peer_addr}: dropping frame: {e}");
                    continue;
                }
            };

            let dispatcher = Arc::clone(&dispatcher);
            let reply = tokio::task::spawn_blocking(move || dispatcher.handle(request))
                .await
                .context("request task failed")?;

            if let Some(reply) = reply {
                match stream.write_all(&reply).await {
                    Ok(()) => {}
                    Err(e) if is_disconnect(&e) => {
                        debug!("{peer_addr}: {e}");
                        return Ok(());
                    }
                    Err(e) => return Err(e).context("socket write failed"),
                }
            }
        }
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
