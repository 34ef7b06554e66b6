use anyhow::Result;
use futures_util::future::join_all;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};

use crate::gate::AdmissionGate;
use crate::listener::Listener;
use crate::relay::DEFAULT_BUFFER_SIZE;
use crate::retry::RetryPolicy;

/// A concrete listen endpoint paired with the endpoint it forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardRule {
    pub listen: SocketAddr,
    pub target: SocketAddr,
}

/// Settings shared read-only by every listener and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub buffer_size: usize,
    pub tcp_no_delay: bool,
    pub retry: RetryPolicy,
    pub max_connections: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            tcp_no_delay: true,
            retry: RetryPolicy::default(),
            max_connections: 100,
        }
    }
}

/// One listener per rule, all sharing a single admission gate.
pub struct ForwardingEngine {
    listeners: Vec<Listener>,
    gate: Arc<AdmissionGate>,
}

impl ForwardingEngine {
    /// Binds every rule up front. The first bind failure aborts startup and
    /// drops the listeners bound so far.
    pub async fn bind(rules: &[ForwardRule], config: EngineConfig) -> Result<Self> {
        let gate = Arc::new(AdmissionGate::new(config.max_connections));
        let config = Arc::new(config);

        info!(
            rules = rules.len(),
            max_connections = config.max_connections,
            buffer_size = config.buffer_size,
            retry_attempts = config.retry.attempts,
            "Starting forwarding engine"
        );

        let mut listeners = Vec::with_capacity(rules.len());
        for rule in rules {
            let listener = Listener::bind(*rule, Arc::clone(&config), Arc::clone(&gate)).await?;
            listeners.push(listener);
        }

        Ok(Self { listeners, gate })
    }

    #[must_use]
    pub fn gate(&self) -> Arc<AdmissionGate> {
        Arc::clone(&self.gate)
    }

    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    /// Runs every accept loop on its own task. Only returns if all of them
    /// stop, which happens only if they panic.
    pub async fn run(self) {
        let (rules, tasks): (Vec<_>, Vec<_>) = self
            .listeners
            .into_iter()
            .map(|listener| (listener.rule(), tokio::spawn(listener.run())))
            .unzip();
        for (rule, result) in rules.iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                error!(listen_addr = %rule.listen, error = %e, "Listener task failed");
            }
        }
    }
}
