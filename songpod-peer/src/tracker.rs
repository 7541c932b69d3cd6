//! Tracker client: register, fetch the master list, deregister.
//! Every call dials a fresh connection; there is no session with the tracker.

use std::time::Duration;

use songpod_core::catalog::{decode_master, encode_advert};
use songpod_core::{CatalogAdvert, CatalogEntry, CatalogError, Message, MessageType};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::conn::{self, WireError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tracker exchange failed: {0}")]
    Wire(#[from] WireError),
    #[error("unexpected {0} reply from tracker")]
    UnexpectedReply(MessageType),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: String,
    timeout: Duration,
}

impl TrackerClient {
    /// `timeout` bounds the dial and, for LIST, the wait for the reply.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send INIT with this peer's catalog.
    pub async fn announce(&self, advert: &CatalogAdvert) -> Result<(), TrackerError> {
        let payload = encode_advert(advert)?;
        let stream = self.send(&Message::Init { payload }).await?;
        finish(stream).await?;
        info!(
            "announced {} songs to tracker {}",
            advert.entries.len(),
            self.addr
        );
        Ok(())
    }

    /// Send LIST and decode the reply as the master catalog.
    pub async fn fetch_list(&self) -> Result<Vec<CatalogEntry>, TrackerError> {
        let mut stream = self.send(&Message::list_request()).await?;
        let reply = conn::read_message(&mut stream, self.timeout).await?;
        match reply {
            Message::List { payload } => {
                let entries = decode_master(&payload)?;
                debug!("tracker listed {} songs", entries.len());
                Ok(entries)
            }
            other => Err(TrackerError::UnexpectedReply(other.message_type())),
        }
    }

    /// Send QUIT.
    pub async fn leave(&self) -> Result<(), TrackerError> {
        let stream = self.send(&Message::Quit).await?;
        finish(stream).await?;
        info!("left tracker {}", self.addr);
        Ok(())
    }

    async fn send(&self, msg: &Message) -> Result<TcpStream, TrackerError> {
        let mut stream = conn::dial(self.addr.as_str(), self.timeout)
            .await
            .map_err(|source| TrackerError::Unreachable {
                addr: self.addr.clone(),
                source,
            })?;
        conn::send_message(&mut stream, msg).await?;
        Ok(stream)
    }
}

/// Close our write half so the tracker sees a complete exchange.
async fn finish(mut stream: TcpStream) -> Result<(), WireError> {
    stream.shutdown().await?;
    Ok(())
}
