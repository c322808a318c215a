//! WebSocket front end
//!
//! Accepts client connections, upgrades them to WebSocket and runs one
//! [`Session`] per connection. Sessions share one router behind an async
//! mutex, so only one client drives the devices at a time.
//!
//! # Connection flow
//!
//! ```text
//! accept ──► handshake ──► lock router ──► Session::begin
//!                                             │
//!             frames ──► handle_frame ◄───────┘
//!                                             │
//!     close / error / engine fault / ctrl-c ──► Session::close ──► unlock
//! ```

use crate::config::ServerConfig;
use crate::device::DeviceError;
use crate::router::CommandRouter;
use crate::session::{Serving, Session, SessionEnd};
use color_eyre::eyre::{Result, WrapErr};
use futures_util::StreamExt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Session ended on device failure: {0}")]
    Device(#[from] DeviceError),
}

pub struct BridgeServer {
    config: ServerConfig,
    router: Arc<Mutex<CommandRouter>>,
    shutdown: CancellationToken,
}

impl BridgeServer {
    pub fn new(config: ServerConfig, router: CommandRouter, shutdown: CancellationToken) -> Self {
        Self {
            config,
            router: Arc::new(Mutex::new(router)),
            shutdown,
        }
    }

    /// Binds the listener and serves until the shutdown token fires
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((self.config.bind.as_str(), self.config.port))
            .await
            .wrap_err_with(|| {
                format!(
                    "Failed to bind {}:{}",
                    self.config.bind, self.config.port
                )
            })?;
        info!(
            "Listening on {}:{} (LAN address {})",
            self.config.bind,
            self.config.port,
            local_address()
        );

        let mut connections = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, closing listener");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    let router = self.router.clone();
                    let shutdown = self.shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(stream, peer, router, shutdown).await {
                            error!("Connection {} failed: {}", peer, e);
                        }
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        }

        // sessions see the same token and clean up before returning
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task panicked: {}", e);
            }
        }

        self.router.lock().await.reset().await?;
        info!("Server stopped, all input released");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Mutex<CommandRouter>>,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    debug!("WebSocket handshake completed with {}", peer);

    let guard = tokio::select! {
        guard = router.lock_owned() => guard,
        _ = shutdown.cancelled() => return Ok(()),
    };

    let mut session = Session::open(peer.to_string(), guard).begin();
    let end = drive_session(&mut session, &mut ws, &shutdown).await;
    let (_closed, cleanup) = session.close(&end).await;

    if let Err(e) = ws.close(None).await {
        debug!("Closing WebSocket to {} failed: {}", peer, e);
    }

    match end {
        SessionEnd::Device(e) => Err(e.into()),
        _ => cleanup.map_err(ConnectionError::from),
    }
}

async fn drive_session(
    session: &mut Session<Serving>,
    ws: &mut WebSocketStream<TcpStream>,
    shutdown: &CancellationToken,
) -> SessionEnd {
    loop {
        let fault = session.engine_fault();
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            _ = wait_for_fault(fault) => return SessionEnd::EngineFault,
            frame = ws.next() => frame,
        };

        let result = match frame {
            Some(Ok(Message::Text(text))) => session.handle_frame(text.as_bytes()).await,
            Some(Ok(Message::Binary(bytes))) => session.handle_frame(&bytes).await,
            Some(Ok(Message::Close(_))) | None => return SessionEnd::ClientClosed,
            // pings are answered by tungstenite itself
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => return SessionEnd::Transport(e.to_string()),
        };

        if let Err(e) = result {
            return SessionEnd::Device(e);
        }
    }
}

async fn wait_for_fault(fault: Option<CancellationToken>) {
    match fault {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Address the phone should connect to
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface.
pub fn local_address() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
