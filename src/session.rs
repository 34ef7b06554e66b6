use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    task::JoinHandle,
};
use tracing::{debug, error, info, trace};

use crate::engine::EngineConfig;
use crate::gate::AdmissionPermit;
use crate::relay::{Direction, PumpEnd, RelayPump, is_benign};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Relaying,
    Closed,
}

/// What a finished session did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub connected: bool,
    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
}

/// Relay of one inbound connection to the rule's target.
///
/// A session owns its admission permit, so the slot is released when the
/// session is dropped, which happens once its task finishes.
pub struct Session {
    id: u64,
    inbound: TcpStream,
    peer: SocketAddr,
    target: SocketAddr,
    config: Arc<EngineConfig>,
    state: SessionState,
    _permit: AdmissionPermit,
}

impl Session {
    #[must_use]
    pub fn new(
        inbound: TcpStream,
        peer: SocketAddr,
        target: SocketAddr,
        config: Arc<EngineConfig>,
        permit: AdmissionPermit,
    ) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            inbound,
            peer,
            target,
            config,
            state: SessionState::Connecting,
            _permit: permit,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves the session onto its own task. Nothing else keeps a handle to it.
    pub fn spawn(self) -> JoinHandle<SessionReport> {
        tokio::spawn(self.run())
    }

    #[tracing::instrument(
        name = "session",
        skip(self),
        fields(session_id = self.id, client_addr = %self.peer, target_addr = %self.target)
    )]
    pub async fn run(mut self) -> SessionReport {
        let mut report = SessionReport::default();
        trace!("Starting session");
        set_nodelay(&self.inbound, self.config.tcp_no_delay, "inbound");

        let target = self.target;
        let retry = self.config.retry;
        let connected = retry
            .run(|attempt| {
                trace!(attempt = attempt + 1, "Attempting to connect to target");
                TcpStream::connect(target)
            })
            .await;

        let mut outbound = match connected {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    tries = retry.max_tries(),
                    error = %e,
                    "Max retry attempts reached, connection failed"
                );
                self.close(None).await;
                return report;
            }
        };

        info!("Connected to target");
        set_nodelay(&outbound, self.config.tcp_no_delay, "outbound");
        report.connected = true;
        self.transition(SessionState::Relaying);

        let buffer_size = self.config.buffer_size;
        let mut upstream = RelayPump::new(Direction::Upstream, buffer_size);
        let mut downstream = RelayPump::new(Direction::Downstream, buffer_size);
        let (direction, end) = {
            let (mut in_read, mut in_write) = self.inbound.split();
            let (mut out_read, mut out_write) = outbound.split();

            // The first pump to stop wins; the other is dropped mid-flight.
            tokio::select! {
                end = upstream.run(&mut in_read, &mut out_write) => (Direction::Upstream, end),
                end = downstream.run(&mut out_read, &mut in_write) => (Direction::Downstream, end),
            }
        };
        report.upstream_bytes = upstream.bytes();
        report.downstream_bytes = downstream.bytes();

        match &end {
            PumpEnd::Eof => info!(%direction, "Connection closed by peer"),
            end if end.is_benign() => debug!(%direction, reason = %end, "Relay cancelled"),
            end => error!(%direction, error = %end, "Relay failed"),
        }

        self.close(Some(outbound)).await;
        info!(
            upstream_bytes = report.upstream_bytes,
            downstream_bytes = report.downstream_bytes,
            "Session finished"
        );
        report
    }

    /// Shuts down both connections. Calling it again is a no-op.
    async fn close(&mut self, outbound: Option<TcpStream>) {
        if self.state == SessionState::Closed {
            return;
        }

        shutdown(&mut self.inbound, "inbound").await;
        if let Some(mut outbound) = outbound {
            shutdown(&mut outbound, "outbound").await;
        }

        self.transition(SessionState::Closed);
        info!("Sockets closed");
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }
}

fn set_nodelay(stream: &TcpStream, enabled: bool, side: &'static str) {
    match stream.set_nodelay(enabled) {
        Ok(()) => debug!(side, enabled, "TCP nodelay set"),
        Err(e) => error!(side, error = %e, "Setting TCP nodelay failed"),
    }
}

async fn shutdown(stream: &mut TcpStream, side: &'static str) {
    if let Err(e) = stream.shutdown().await {
        if is_benign(&e) {
            trace!(side, "Socket already closed");
        } else {
            debug!(side, error = %e, "Socket shutdown failed");
        }
    }
}
