use anyhow::{Context, Result};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tracing::{error, info, warn};

use crate::engine::{EngineConfig, ForwardRule};
use crate::gate::AdmissionGate;
use crate::session::Session;

/// Pause after a failed accept so a persistent error such as EMFILE does not spin.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop for one forwarding rule.
pub struct Listener {
    listener: TcpListener,
    rule: ForwardRule,
    config: Arc<EngineConfig>,
    gate: Arc<AdmissionGate>,
}

impl Listener {
    /// Binds the rule's listen endpoint. A failure here is a startup error.
    pub async fn bind(
        rule: ForwardRule,
        config: Arc<EngineConfig>,
        gate: Arc<AdmissionGate>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(rule.listen)
            .await
            .with_context(|| format!("Failed to bind to address {}", rule.listen))?;

        let local = listener.local_addr().unwrap_or(rule.listen);
        info!(listen_addr = %local, target_addr = %rule.target, "Listening");

        Ok(Self {
            listener,
            rule,
            config,
            gate,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get bound listener local address")
    }

    #[must_use]
    pub fn rule(&self) -> ForwardRule {
        self.rule
    }

    /// Accepts forever. Sessions run on their own tasks; accept errors and
    /// rejected connections never stop the loop.
    pub async fn run(self) {
        let listen_addr = self.local_addr().unwrap_or(self.rule.listen);
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    accept_failed(listen_addr, &e).await;
                    continue;
                }
            };

            let Some(permit) = self.gate.try_acquire() else {
                warn!(
                    listen_addr = %listen_addr,
                    client_addr = %peer,
                    max_connections = self.gate.capacity(),
                    "Max connections reached, rejecting new connection"
                );
                drop(stream);
                continue;
            };

            info!(
                listen_addr = %listen_addr,
                client_addr = %peer,
                active = self.gate.active(),
                "Accepted new connection"
            );
            Session::new(
                stream,
                peer,
                self.rule.target,
                Arc::clone(&self.config),
                permit,
            )
            .spawn();
        }
    }
}

async fn accept_failed(listen_addr: SocketAddr, e: &io::Error) {
    error!(listen_addr = %listen_addr, error = %e, "Accept error");
    sleep(ACCEPT_ERROR_BACKOFF).await;
}
