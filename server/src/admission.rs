//! Connection admission
//!
//! A connection request is screened synchronously (throttle, capacity) and
//! then verified on a background task. The verdict comes back over a channel
//! that the dispatcher drains at the top of every pump, so the session table
//! is only ever touched from the pump.
//!
//! Each accepted request gets a token that is remembered per peer. A verdict
//! whose token no longer matches, because the peer disconnected or asked
//! again in the meantime, is thrown away.

use crate::auth::{IdentityVerifier, VerifiedIdentity};
use crate::error::AuthError;
use crate::session::AuthTicket;
use crate::throttle::ConnectionThrottle;
use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DENY_THROTTLED: &str = "Too many connection attempts. Please wait before trying again.";
pub const DENY_FULL: &str = "Server is full, try again later.";
pub const DENY_UNAUTHORIZED: &str = "You are not authorized under Steam.";

#[derive(Debug)]
pub enum AuthOutcome {
    Approved(VerifiedIdentity),
    Denied(AuthError),
}

/// A finished verification for a still-pending peer.
#[derive(Debug)]
pub struct AdmissionResult {
    pub peer: SocketAddr,
    pub ticket: AuthTicket,
    pub outcome: AuthOutcome,
}

struct Verdict {
    token: u64,
    result: AdmissionResult,
}

pub struct AdmissionQueue {
    verifier: Arc<dyn IdentityVerifier>,
    throttle: ConnectionThrottle,
    pending: HashMap<SocketAddr, u64>,
    next_token: u64,
    verdict_tx: mpsc::UnboundedSender<Verdict>,
    verdict_rx: mpsc::UnboundedReceiver<Verdict>,
}

impl AdmissionQueue {
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        let (verdict_tx, verdict_rx) = mpsc::unbounded_channel();
        Self {
            verifier,
            throttle: ConnectionThrottle::new(),
            pending: HashMap::new(),
            next_token: 0,
            verdict_tx,
            verdict_rx,
        }
    }

    /// Screens a connection request and starts verifying it.
    ///
    /// Returns the denial reason when the request is refused up front. Must
    /// be called from within a tokio runtime.
    pub fn request(
        &mut self,
        peer: SocketAddr,
        ticket: &[u8],
        table_full: bool,
    ) -> Result<(), &'static str> {
        if !self.throttle.is_admissible(peer.ip()) {
            info!("Throttling connection attempt from {}", peer);
            return Err(DENY_THROTTLED);
        }
        self.throttle.record_attempt(peer.ip());

        if table_full {
            info!("Refusing {}: server full", peer);
            return Err(DENY_FULL);
        }

        let ticket = AuthTicket::from_bytes(ticket);
        let token = self.next_token;
        self.next_token += 1;
        self.pending.insert(peer, token);
        info!("Verifying {} with ticket {}", peer, ticket);

        let verifier = Arc::clone(&self.verifier);
        let verdict_tx = self.verdict_tx.clone();
        tokio::spawn(async move {
            let outcome = match verifier.verify(&ticket).await {
                Ok(identity) => AuthOutcome::Approved(identity),
                Err(e) => AuthOutcome::Denied(e),
            };
            let verdict = Verdict {
                token,
                result: AdmissionResult {
                    peer,
                    ticket,
                    outcome,
                },
            };
            if verdict_tx.send(verdict).is_err() {
                debug!("Admission queue gone, dropping verdict for {}", peer);
            }
        });
        Ok(())
    }

    /// Forgets the pending request for `peer`; its verdict will be discarded.
    pub fn cancel(&mut self, peer: SocketAddr) -> bool {
        self.pending.remove(&peer).is_some()
    }

    pub fn is_pending(&self, peer: SocketAddr) -> bool {
        self.pending.contains_key(&peer)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Collects every verdict that has arrived for a still-pending request.
    pub fn drain(&mut self) -> Vec<AdmissionResult> {
        let mut ready = Vec::new();
        while let Ok(verdict) = self.verdict_rx.try_recv() {
            let peer = verdict.result.peer;
            if self.pending.get(&peer) == Some(&verdict.token) {
                self.pending.remove(&peer);
                ready.push(verdict.result);
            } else {
                debug!("Discarding stale verdict for {}", peer);
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SteamId;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Approve;

    #[async_trait]
    impl IdentityVerifier for Approve {
        async fn verify(&self, _ticket: &AuthTicket) -> Result<VerifiedIdentity, AuthError> {
            Ok(VerifiedIdentity {
                identity: SteamId(76561198000000001),
                name: "tester".to_string(),
            })
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, port as u8], port))
    }

    async fn settle(queue: &mut AdmissionQueue) -> Vec<AdmissionResult> {
        for _ in 0..50 {
            let ready = queue.drain();
            if !ready.is_empty() {
                return ready;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_verdict_arrives() {
        let mut queue = AdmissionQueue::new(Arc::new(Approve));
        queue.request(peer(1), &[1, 2], false).unwrap();
        assert!(queue.is_pending(peer(1)));

        let ready = settle(&mut queue).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].ticket.as_hex(), "0102");
        assert!(matches!(ready[0].outcome, AuthOutcome::Approved(_)));
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_is_discarded() {
        let mut queue = AdmissionQueue::new(Arc::new(Approve));
        queue.request(peer(1), &[1], false).unwrap();
        assert!(queue.cancel(peer(1)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn test_throttle_and_capacity() {
        let mut queue = AdmissionQueue::new(Arc::new(Approve));
        assert_eq!(queue.request(peer(1), &[1], true), Err(DENY_FULL));
        // The refused attempt still counts against the host.
        assert_eq!(queue.request(peer(1), &[1], false), Err(DENY_THROTTLED));
        assert!(queue.request(peer(2), &[1], false).is_ok());
    }
}
