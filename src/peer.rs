//! Peer connection contract and its webrtc-rs implementation
//!
//! Local tracks are `TrackLocalStaticSample`s fed from each track's encoded
//! sample feed. Remote tracks are grouped by stream id and announced on a
//! channel the view listens to.

use crate::config::IceServer;
use crate::errors::CallError;
use crate::types::{MediaKind, MediaSample, MediaStream, MediaStreamTrack};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// One end of a call, as far as the view needs it
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> &str;

    /// ICE servers this connection was built with
    fn ice_servers(&self) -> &[IceServer];

    /// Attach a local stream as an outgoing stream
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), CallError>;

    /// Receiver of streams announced by the remote peer. Yields `Some` once.
    fn take_remote_streams(&self) -> Option<mpsc::UnboundedReceiver<MediaStream>>;

    async fn close(&self) -> Result<(), CallError>;
}

/// Builds peer connections for a view
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, ice_servers: &[IceServer])
        -> Result<Arc<dyn PeerConnection>, CallError>;
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Peer connection statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConnectionStats {
    pub peer_id: String,
    pub ice_server_count: usize,
    pub local_stream_count: usize,
    pub local_track_count: usize,
    /// Local tracks whose encoded samples are being written to the connection
    pub fed_track_count: usize,
    pub samples_written: u64,
}

/// webrtc-rs backed peer connection
pub struct RtcPeerConnection {
    id: String,
    ice_servers: Vec<IceServer>,
    peer_connection: Arc<RTCPeerConnection>,
    local_tracks: RwLock<Vec<Arc<TrackLocalStaticSample>>>,
    local_streams: RwLock<HashSet<String>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    samples_written: Arc<AtomicU64>,
    remote_rx: Mutex<Option<mpsc::UnboundedReceiver<MediaStream>>>,
}

impl RtcPeerConnection {
    /// Create a new peer connection
    pub async fn new(id: String, ice_servers: &[IceServer]) -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::PeerConnection(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                CallError::PeerConnection(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            CallError::PeerConnection(format!("Failed to create peer connection: {}", e))
        })?);

        let (tx, rx) = mpsc::unbounded_channel();

        // Remote tracks arrive one at a time; a stream is announced on its first track
        let announced = Arc::new(Mutex::new(HashSet::<String>::new()));
        let peer_id = id.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let stream_id = track.stream_id();
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                log::info!(
                    "Remote {} track {} for stream {} on peer {}",
                    kind,
                    track.id(),
                    stream_id,
                    peer_id
                );

                let first = match announced.lock() {
                    Ok(mut seen) => seen.insert(stream_id.clone()),
                    Err(_) => false,
                };
                if first {
                    let remote_track = MediaStreamTrack::new(kind, track.id());
                    let stream = MediaStream::with_id(stream_id, vec![remote_track]);
                    if tx.send(stream).is_err() {
                        log::debug!("Remote stream receiver dropped for peer {}", peer_id);
                    }
                }
                Box::pin(async {})
            },
        ));

        log::info!(
            "Created peer connection {} with {} ICE server(s)",
            id,
            ice_servers.len()
        );

        Ok(Self {
            id,
            ice_servers: ice_servers.to_vec(),
            peer_connection,
            local_tracks: RwLock::new(Vec::new()),
            local_streams: RwLock::new(HashSet::new()),
            forwarders: Mutex::new(Vec::new()),
            samples_written: Arc::new(AtomicU64::new(0)),
            remote_rx: Mutex::new(Some(rx)),
        })
    }

    /// Get connection statistics
    pub async fn get_stats(&self) -> PeerConnectionStats {
        PeerConnectionStats {
            peer_id: self.id.clone(),
            ice_server_count: self.ice_servers.len(),
            local_stream_count: self.local_streams.read().await.len(),
            local_track_count: self.local_tracks.read().await.len(),
            fed_track_count: self
                .forwarders
                .lock()
                .map(|f| f.iter().filter(|h| !h.is_finished()).count())
                .unwrap_or(0),
            samples_written: self.samples_written.load(Ordering::Relaxed),
        }
    }

    /// Codec of the samples native capture publishes for `kind`
    fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
        match kind {
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_owned(),
                ..Default::default()
            },
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    async fn add_stream(&self, stream: &MediaStream) -> Result<(), CallError> {
        let mut streams = self.local_streams.write().await;
        if streams.contains(&stream.id) {
            return Err(CallError::PeerConnection(format!(
                "Stream {} already attached to peer {}",
                stream.id, self.id
            )));
        }

        log::info!(
            "Attaching stream {} ({} tracks) to peer {}",
            stream.id,
            stream.tracks.len(),
            self.id
        );

        let mut local_tracks = self.local_tracks.write().await;
        for track in &stream.tracks {
            let local = Arc::new(TrackLocalStaticSample::new(
                Self::codec_for(track.kind),
                track.id.clone(),
                stream.id.clone(),
            ));

            self.peer_connection
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| {
                    CallError::PeerConnection(format!(
                        "Failed to add {} track {}: {}",
                        track.kind, track.id, e
                    ))
                })?;

            log::debug!("Added {} track {} to peer {}", track.kind, track.id, self.id);

            if let Some(samples) = track.subscribe_samples() {
                let handle = tokio::spawn(forward_samples(
                    Arc::clone(&local),
                    samples,
                    Arc::clone(&self.samples_written),
                ));
                if let Ok(mut forwarders) = self.forwarders.lock() {
                    forwarders.push(handle);
                }
            }
            local_tracks.push(local);
        }

        streams.insert(stream.id.clone());
        Ok(())
    }

    fn take_remote_streams(&self) -> Option<mpsc::UnboundedReceiver<MediaStream>> {
        self.remote_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) -> Result<(), CallError> {
        log::info!("Closing peer connection {}", self.id);

        if let Ok(mut forwarders) = self.forwarders.lock() {
            for handle in forwarders.drain(..) {
                handle.abort();
            }
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| CallError::PeerConnection(format!("Failed to close peer connection: {}", e)))
    }
}

/// Write every sample of a local track's feed until the feed closes
async fn forward_samples(
    track: Arc<TrackLocalStaticSample>,
    mut samples: broadcast::Receiver<MediaSample>,
    written: Arc<AtomicU64>,
) {
    loop {
        match samples.recv().await {
            Ok(sample) => {
                let sample = Sample {
                    data: sample.data,
                    duration: sample.duration,
                    timestamp: SystemTime::now(),
                    ..Default::default()
                };
                match track.write_sample(&sample).await {
                    Ok(()) => {
                        written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => log::warn!("Failed to write sample to track {}: {}", track.id(), e),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Track {} skipped {} samples", track.id(), skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    log::debug!("Sample feed for track {} closed", track.id());
}

/// Factory producing [`RtcPeerConnection`]s with fresh ids
#[derive(Debug, Default, Clone)]
pub struct RtcPeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for RtcPeerConnectionFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let id = format!("peer_{}", uuid::Uuid::new_v4());
        let peer = RtcPeerConnection::new(id, ice_servers).await?;
        Ok(Arc::new(peer))
    }
}
