//! The cluster listener: accepts sibling cosigner connections, verifies
//! envelope signatures against the registry, and dispatches requests to
//! the node handler. One task per inbound connection; a connection may
//! carry any number of request/response exchanges.

use crate::cluster::client::{read_frame, write_frame};
use crate::cluster::messages::{decode_envelope, encode_envelope, seal_envelope, PeerPayload, PeerRequest, PeerResponse};
use crate::cluster::registry::Registry;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use log::{debug, info, warn};
use std::sync::Arc;
use tessera_core::foundation::{Result, ShardId, SignerError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[async_trait]
pub trait ClusterHandler: Send + Sync {
    async fn handle(&self, sender: ShardId, request: PeerRequest) -> PeerResponse;
}

pub struct ClusterServer {
    registry: Arc<Registry>,
    identity: Arc<SigningKey>,
    handler: Arc<dyn ClusterHandler>,
}

impl ClusterServer {
    pub fn new(registry: Arc<Registry>, identity: Arc<SigningKey>, handler: Arc<dyn ClusterHandler>) -> Arc<Self> {
        Arc::new(Self { registry, identity, handler })
    }

    /// Bind and return the listener; useful for ephemeral-port tests.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|err| SignerError::transport("cluster bind", format!("{}: {}", addr, err)))
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        info!("cluster listener started shard_id={}", self.registry.own_shard());
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cluster listener stopping shard_id={}", self.registry.own_shard());
                        return;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("cluster connection from {}", peer_addr);
                            let server = Arc::clone(&self);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(err) = server.serve_connection(stream, shutdown).await {
                                    debug!("cluster connection closed: {}", err);
                                }
                            });
                        }
                        Err(err) => {
                            warn!("cluster accept failed: {}", err);
                        }
                    }
                }
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream, shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let frame = read_frame(&mut stream).await?;
            let envelope = decode_envelope(&frame)?;
            self.registry.verify(envelope.sender, &envelope.payload_hash, &envelope.signature)?;
            let computed = crate::cluster::messages::payload_hash(&envelope.payload)?;
            if computed != envelope.payload_hash {
                return Err(SignerError::InvalidPeerIdentity { shard_id: envelope.sender });
            }

            let request = match envelope.payload {
                PeerPayload::Request(request) => request,
                PeerPayload::Response(_) => {
                    return Err(SignerError::DecodeError("unsolicited response on cluster listener".to_string()));
                }
            };

            let response = self.handler.handle(envelope.sender, request).await;
            let sealed =
                seal_envelope(&self.identity, self.registry.own_shard(), PeerPayload::Response(response))?;
            write_frame(&mut stream, &encode_envelope(&sealed)?).await?;
        }
    }
}
