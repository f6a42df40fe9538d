//! Per-sentry connector: dial, handshake, serve requests FIFO, and
//! reconnect on any failure.
//!
//! The consensus node expects a connection shortly after it starts, so
//! the dial timeout is short (2 s) and retries are frequent (3 s apart).
//! Every transport or decode error discards the channel and returns to
//! dialing; every request that arrives is answered, even with an error.

use ed25519_dalek::SigningKey;
use log::{debug, error, info};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::application::PrivvalService;
use tessera_core::foundation::{Result, SignerError};
use tessera_core::infrastructure::privval::{decode_message, encode_message};
use tessera_core::infrastructure::transport::{Role, SecretConnection};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
pub const RETRY_SLEEP: Duration = Duration::from_secs(3);

pub struct SentryConnector {
    address: String,
    service: Arc<PrivvalService>,
    identity: SigningKey,
    shutdown: watch::Receiver<bool>,
}

impl SentryConnector {
    /// The connection identity is ephemeral: sentries authenticate the
    /// signer by its consensus public key, not its transport key.
    pub fn new(address: String, service: Arc<PrivvalService>, shutdown: watch::Receiver<bool>) -> Self {
        Self { address, service, identity: SigningKey::generate(&mut OsRng), shutdown }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("sentry connector starting address={}", self.address);
        loop {
            if *self.shutdown.borrow() {
                info!("sentry connector stopping address={}", self.address);
                return;
            }
            match self.connect_and_serve().await {
                Ok(()) => return,
                Err(err) => {
                    error!("sentry connection failed address={} error={}", self.address, err);
                }
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = sleep(RETRY_SLEEP) => {}
            }
        }
    }

    /// Returns Ok(()) only on shutdown; any connection error propagates so
    /// the outer loop sleeps and redials.
    async fn connect_and_serve(&mut self) -> Result<()> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SignerError::transport("dial", format!("{} timed out", self.address)))?
            .map_err(|err| SignerError::transport("dial", format!("{}: {}", self.address, err)))?;
        stream.set_nodelay(true).ok();

        let mut conn = SecretConnection::handshake(stream, &self.identity, Role::Dialer).await?;
        info!("connected to sentry address={}", self.address);

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }
            let frame = {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return Ok(());
                        }
                        continue;
                    }
                    frame = conn.recv_frame() => frame?,
                }
            };

            let request = decode_message(&frame)?;
            debug!("privval request received address={}", self.address);
            let response = self.service.handle(request).await;
            conn.send_frame(&encode_message(&response)?).await?;
        }
    }
}
