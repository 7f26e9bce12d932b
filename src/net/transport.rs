//! WebTransport server
//!
//! Each connection gets an id, one bidirectional stream for framed messages,
//! a reader that awaits every dispatch in arrival order, and a writer that
//! drains the connection's hub queue. Whichever of the two stops first ends
//! the connection.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};
use wtransport::endpoint::IncomingSession;
use wtransport::{Endpoint, RecvStream, SendStream};

use crate::config::ServerConfig;
use crate::game::state::PlayerId;
use crate::lobby::outbound::Outbound;
use crate::metrics::Metrics;
use crate::net::dispatch::Dispatcher;
use crate::net::framing::{read_frame, write_message, FramingError};
use crate::net::hub::ConnectionHub;
use crate::net::protocol::{decode, encode, ClientMessage, ErrorCode, Failure, ServerMessage};
use crate::net::tls::TlsConfig;

pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<ConnectionHub>,
    metrics: Arc<Metrics>,
}

impl WebTransportServer {
    pub async fn new(
        config: ServerConfig,
        dispatcher: Arc<Dispatcher>,
        hub: Arc<ConnectionHub>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;
        Ok(Self {
            config,
            tls_config,
            dispatcher,
            hub,
            metrics,
        })
    }

    /// Certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Accept connections until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        let bind_addr = self.bind_addr();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_address(bind_addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;
        info!("WebTransport server listening on {}", bind_addr);

        loop {
            let incoming = server.accept().await;
            let dispatcher = self.dispatcher.clone();
            let hub = self.hub.clone();
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, dispatcher, hub, metrics).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

async fn handle_connection(
    incoming: IncomingSession,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<ConnectionHub>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    debug!(
        "Incoming session from {:?}, path: {}",
        session_request.authority(),
        session_request.path()
    );
    let connection = session_request.accept().await?;

    // Protocol traffic rides on the first bidirectional stream
    let (send, recv) = connection.accept_bi().await?;

    let connection_id: PlayerId = uuid::Uuid::new_v4();
    let queue = hub.register(connection_id);
    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    info!("Connection {} opened", connection_id);

    let mut writer = tokio::spawn(write_loop(send, queue, metrics.clone()));
    hub.send(connection_id, ServerMessage::Welcome { player_id: connection_id });

    let mut writer_joined = None;
    tokio::select! {
        result = read_loop(recv, connection_id, &dispatcher, &hub, &metrics) => match result {
            Ok(()) | Err(FramingError::ConnectionClosed) => {}
            Err(e) => debug!("Connection {} read ended: {}", connection_id, e),
        },
        // Evicted by the hub for falling behind, or the stream broke
        joined = &mut writer => {
            debug!("Connection {} writer stopped, closing", connection_id);
            writer_joined = Some(joined);
        }
    }

    // Leave sessions before the queue goes away so others hear playerLeft
    dispatcher.disconnect(connection_id).await;
    hub.unregister(connection_id);
    let joined = match writer_joined {
        Some(joined) => joined,
        None => writer.await,
    };
    if let Err(e) = joined {
        debug!("Writer for {} ended abnormally: {}", connection_id, e);
    }

    metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    info!("Connection {} closed", connection_id);
    Ok(())
}

/// Read frames until the stream ends. Messages of one connection are
/// dispatched strictly in order.
async fn read_loop(
    mut recv: RecvStream,
    connection_id: PlayerId,
    dispatcher: &Dispatcher,
    hub: &ConnectionHub,
    metrics: &Metrics,
) -> Result<(), FramingError> {
    let mut buffer = Vec::with_capacity(4096);

    loop {
        let len = read_frame(&mut recv, &mut buffer).await?;
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics.bytes_received.fetch_add(len as u64 + 4, Ordering::Relaxed);

        let message: ClientMessage = match decode(&buffer[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Undecodable message from {}: {}", connection_id, e);
                metrics.messages_rejected.fetch_add(1, Ordering::Relaxed);
                hub.send(
                    connection_id,
                    ServerMessage::Rejected(Failure::new(ErrorCode::BadRequest, "Malformed message")),
                );
                continue;
            }
        };

        if let Some(reply) = dispatcher.handle(connection_id, message).await {
            hub.send(connection_id, reply);
        }
    }
}

/// Drain the connection's queue onto the stream until the hub drops it
async fn write_loop(mut send: SendStream, mut queue: Receiver<ServerMessage>, metrics: Arc<Metrics>) {
    while let Some(message) = queue.recv().await {
        let bytes = match encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode outbound message: {}", e);
                continue;
            }
        };

        if let Err(e) = write_message(&mut send, &bytes).await {
            debug!("Stream write failed: {}", e);
            break;
        }
        metrics.bytes_sent.fetch_add(bytes.len() as u64 + 4, Ordering::Relaxed);
    }
}
