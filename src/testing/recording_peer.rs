//! Peer connection double that records what a view does with it

use crate::config::IceServer;
use crate::errors::CallError;
use crate::peer::{PeerConnection, PeerConnectionFactory};
use crate::types::MediaStream;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

pub struct RecordingPeer {
    id: String,
    ice_servers: Vec<IceServer>,
    added: Mutex<Vec<String>>,
    closed: AtomicBool,
    reject_streams: bool,
    remote_tx: mpsc::UnboundedSender<MediaStream>,
    remote_rx: Mutex<Option<mpsc::UnboundedReceiver<MediaStream>>>,
}

impl RecordingPeer {
    /// Ids of streams attached as outgoing streams
    pub fn added_streams(&self) -> Vec<String> {
        self.added.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pretend the remote peer started sending `stream`
    pub fn announce_remote_stream(&self, stream: MediaStream) -> bool {
        self.remote_tx.send(stream).is_ok()
    }
}

#[async_trait]
impl PeerConnection for RecordingPeer {
    fn id(&self) -> &str {
        &self.id
    }

    fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    async fn add_stream(&self, stream: &MediaStream) -> Result<(), CallError> {
        if self.reject_streams {
            return Err(CallError::PeerConnection("add_stream rejected".to_string()));
        }
        if let Ok(mut added) = self.added.lock() {
            added.push(stream.id.clone());
        }
        Ok(())
    }

    fn take_remote_streams(&self) -> Option<mpsc::UnboundedReceiver<MediaStream>> {
        self.remote_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) -> Result<(), CallError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that keeps every peer it creates
#[derive(Default)]
pub struct RecordingPeerFactory {
    peers: Mutex<Vec<Arc<RecordingPeer>>>,
    reject_streams: bool,
    fail_create: bool,
    gate: Option<Arc<Notify>>,
}

impl RecordingPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers created by this factory refuse outgoing streams
    pub fn rejecting_streams() -> Self {
        Self {
            reject_streams: true,
            ..Self::default()
        }
    }

    /// Peer creation fails
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// Peer creation waits until the returned gate is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn peers(&self) -> Vec<Arc<RecordingPeer>> {
        self.peers.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PeerConnectionFactory for RecordingPeerFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_create {
            return Err(CallError::PeerConnection("creation refused".to_string()));
        }

        let mut peers = self
            .peers
            .lock()
            .map_err(|_| CallError::PeerConnection("lock poisoned".to_string()))?;
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let peer = Arc::new(RecordingPeer {
            id: format!("recording_peer_{}", peers.len()),
            ice_servers: ice_servers.to_vec(),
            added: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            reject_streams: self.reject_streams,
            remote_tx,
            remote_rx: Mutex::new(Some(remote_rx)),
        });
        peers.push(Arc::clone(&peer));
        Ok(peer)
    }
}
