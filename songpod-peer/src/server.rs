//! Song server: accept inbound peers, wait on their readiness, dispatch requests to
//! handlers under a concurrency bound.
//!
//! Accepted sockets are nonblocking and registered with the runtime's reactor; a
//! connection waiting for its request costs a registration, not a worker. Once the
//! request is decoded the handler runs as its own task while holding one of
//! `max_handlers` permits, so a slow file read never delays dispatch to other peers.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use songpod_core::{CatalogError, SongCatalog};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::handler::{self, HandlerError};

/// Pause after a failed accept (e.g. out of descriptors) before polling again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_handlers: usize,
    /// How long a connection may sit idle, either before its request is complete or
    /// while the requester is not draining the song.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_handlers: 64,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Listening,
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered for readability, request not yet complete.
    AwaitingRequest,
    /// Request decoded, handler running.
    Serving,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: u64,
    pub addr: SocketAddr,
    pub role: ConnectionRole,
    pub state: ConnectionState,
}

/// Registration table of live connections. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTable {
    entries: Arc<Mutex<HashMap<u64, ConnectionInfo>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTable {
    /// Register a connection; it stays in the table until the returned guard is dropped.
    fn register(&self, addr: SocketAddr, role: ConnectionRole) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            ConnectionInfo {
                id,
                addr,
                role,
                state: ConnectionState::AwaitingRequest,
            },
        );
        Registration {
            table: self.clone(),
            id,
        }
    }

    fn set_state(&self, id: u64, state: ConnectionState) {
        if let Some(info) = self.entries.lock().get_mut(&id) {
            info.state = state;
        }
    }

    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<_> = self.entries.lock().values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Accepted connections currently open (the listener is not counted).
    pub fn accepted(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|c| c.role == ConnectionRole::Accepted)
            .count()
    }

    pub fn serving(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|c| c.state == ConnectionState::Serving && c.role == ConnectionRole::Accepted)
            .count()
    }
}

struct Registration {
    table: ConnectionTable,
    id: u64,
}

impl Registration {
    fn set_state(&self, state: ConnectionState) {
        self.table.set_state(self.id, state);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.table.entries.lock().remove(&self.id);
    }
}

pub struct Server {
    listener: TcpListener,
    catalog: Arc<SongCatalog>,
    config: ServerConfig,
    connections: ConnectionTable,
    permits: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal to the peer.
    pub async fn bind(
        addr: SocketAddr,
        catalog: Arc<SongCatalog>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let permits = Arc::new(Semaphore::new(config.max_handlers.max(1)));
        Ok(Self {
            listener,
            catalog,
            config,
            connections: ConnectionTable::default(),
            permits,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connections(&self) -> ConnectionTable {
        self.connections.clone()
    }

    /// Accept and dispatch until `shutdown` completes. Handlers already running finish on their own.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let listening = match self.listener.local_addr() {
            Ok(addr) => {
                info!("serving songs on {}", addr);
                Some(self.connections.register(addr, ConnectionRole::Listening))
            }
            Err(_) => None,
        };
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.dispatch(stream, addr),
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        drop(listening);
        info!("song server stopped");
    }

    fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        debug!("accepted {}", addr);
        let registration = self.connections.register(addr, ConnectionRole::Accepted);
        let catalog = self.catalog.clone();
        let permits = self.permits.clone();
        let request_timeout = self.config.request_timeout;
        tokio::spawn(async move {
            match serve_connection(stream, &registration, &catalog, &permits, request_timeout).await
            {
                Ok(sent) => debug!("closed {} after {} bytes", addr, sent),
                Err(HandlerError::Catalog(CatalogError::SongNotFound(id))) => {
                    warn!("{} asked for unknown song {}", addr, id)
                }
                Err(e) => warn!("connection {} dropped: {}", addr, e),
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    registration: &Registration,
    catalog: &SongCatalog,
    permits: &Semaphore,
    request_timeout: Duration,
) -> Result<u64, HandlerError> {
    stream.set_nodelay(true)?;
    let msg = handler::read_request(&stream, request_timeout).await?;
    // The semaphore is never closed.
    let Ok(_permit) = permits.acquire().await else {
        return Ok(0);
    };
    registration.set_state(ConnectionState::Serving);
    handler::handle_request(stream, msg, catalog, request_timeout).await
}
