//! Video call view
//!
//! Mount creates one peer connection and starts a task that acquires local
//! audio/video and attaches it to that connection. Render always yields two
//! stacked surfaces: remote on top, local below. Unmount releases every
//! stream the view holds and closes the connection.

use crate::config::{CallConfig, MediaConfig};
use crate::devices::{build_constraints, MediaDevices};
use crate::errors::CallError;
use crate::peer::{PeerConnection, PeerConnectionFactory};
use crate::types::{MediaStream, StreamUrl};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Where a view is in its single mount-time transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewPhase {
    Unmounted,
    AcquiringMedia,
    MediaAttached,
    MediaFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceRole {
    Remote,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutDirection {
    Column,
}

/// One video surface bound to a stream URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSurface {
    pub role: SurfaceRole,
    pub stream_url: Option<StreamUrl>,
    pub flex: f32,
}

/// Render output handed to the frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLayout {
    pub view_id: String,
    pub phase: ViewPhase,
    pub direction: LayoutDirection,
    pub surfaces: [VideoSurface; 2],
}

impl CallLayout {
    pub fn surface(&self, role: SurfaceRole) -> &VideoSurface {
        match role {
            SurfaceRole::Remote => &self.surfaces[0],
            SurfaceRole::Local => &self.surfaces[1],
        }
    }
}

struct ViewState {
    /// Bumped on every mount and unmount; completions carry the value they started with
    generation: u64,
    phase: ViewPhase,
    peer: Option<Arc<dyn PeerConnection>>,
    local_stream: Option<MediaStream>,
    local_url: Option<StreamUrl>,
    remote_stream: Option<MediaStream>,
    remote_url: Option<StreamUrl>,
    remote_listener: Option<JoinHandle<()>>,
}

impl ViewState {
    fn new() -> Self {
        Self {
            generation: 0,
            phase: ViewPhase::Unmounted,
            peer: None,
            local_stream: None,
            local_url: None,
            remote_stream: None,
            remote_url: None,
            remote_listener: None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase != ViewPhase::Unmounted
    }

    fn release_streams(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            stream.release();
        }
        if let Some(stream) = self.remote_stream.take() {
            stream.release();
        }
        self.local_url = None;
        self.remote_url = None;
    }
}

/// Peer-to-peer video call view
pub struct VideoCallView {
    id: String,
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    state: Arc<RwLock<ViewState>>,
}

impl VideoCallView {
    pub fn new(
        id: impl Into<String>,
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            devices,
            peers,
            state: Arc::new(RwLock::new(ViewState::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Create the peer connection and start acquiring local media
    ///
    /// The returned handle resolves once the capture attempt has been settled.
    /// Capture failures never surface here; they are logged and reflected in
    /// [`ViewPhase::MediaFailed`].
    pub async fn mount(&self) -> Result<JoinHandle<()>, CallError> {
        let mut state = self.state.write().await;
        if state.phase != ViewPhase::Unmounted {
            return Err(CallError::AlreadyMounted);
        }

        let peer = self.peers.create(&self.config.ice.servers).await?;
        log::info!("Mounted call view {} with peer {}", self.id, peer.id());

        state.generation += 1;
        state.phase = ViewPhase::AcquiringMedia;
        state.peer = Some(Arc::clone(&peer));
        let generation = state.generation;

        if let Some(remote_rx) = peer.take_remote_streams() {
            state.remote_listener = Some(tokio::spawn(listen_for_remote_streams(
                Arc::downgrade(&self.state),
                generation,
                remote_rx,
                self.config.media.url_scheme.clone(),
            )));
        }
        drop(state);

        let weak = Arc::downgrade(&self.state);
        let devices = Arc::clone(&self.devices);
        let media = self.config.media.clone();
        let view_id = self.id.clone();

        Ok(tokio::spawn(async move {
            let result = acquire_local_media(devices.as_ref(), &media).await;
            complete_capture(&view_id, weak, generation, result, &media.url_scheme, peer).await;
        }))
    }

    /// Two surfaces stacked vertically: remote first, local second
    pub async fn render(&self) -> CallLayout {
        let state = self.state.read().await;
        CallLayout {
            view_id: self.id.clone(),
            phase: state.phase,
            direction: LayoutDirection::Column,
            surfaces: [
                VideoSurface {
                    role: SurfaceRole::Remote,
                    stream_url: state.remote_url.clone(),
                    flex: self.config.layout.remote_flex,
                },
                VideoSurface {
                    role: SurfaceRole::Local,
                    stream_url: state.local_url.clone(),
                    flex: self.config.layout.local_flex,
                },
            ],
        }
    }

    /// Bind a remote stream to the remote surface
    ///
    /// Returns false when the view is not mounted; the stream is released then.
    pub async fn attach_remote_stream(&self, stream: MediaStream) -> bool {
        let mut state = self.state.write().await;
        let generation = state.generation;
        store_remote_stream(&mut state, generation, stream, &self.config.media.url_scheme)
    }

    /// Release local and remote media and close the peer connection
    pub async fn unmount(&self) -> Result<(), CallError> {
        let mut state = self.state.write().await;
        if state.phase == ViewPhase::Unmounted {
            return Ok(());
        }

        state.generation += 1;
        state.phase = ViewPhase::Unmounted;
        state.release_streams();
        if let Some(listener) = state.remote_listener.take() {
            listener.abort();
        }
        let peer = state.peer.take();
        drop(state);

        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                log::warn!("Failed to close peer for view {}: {}", self.id, e);
            }
        }

        log::info!("Unmounted call view {}", self.id);
        Ok(())
    }

    pub async fn phase(&self) -> ViewPhase {
        self.state.read().await.phase
    }

    pub async fn local_stream(&self) -> Option<MediaStream> {
        self.state.read().await.local_stream.clone()
    }

    pub async fn remote_stream(&self) -> Option<MediaStream> {
        self.state.read().await.remote_stream.clone()
    }

    pub async fn peer(&self) -> Option<Arc<dyn PeerConnection>> {
        self.state.read().await.peer.clone()
    }
}

impl Drop for VideoCallView {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.try_write() else {
            return;
        };
        if state.phase != ViewPhase::Unmounted {
            log::warn!("Call view {} dropped while mounted", self.id);
        }
        state.release_streams();
        if let Some(listener) = state.remote_listener.take() {
            listener.abort();
        }

        let Some(peer) = state.peer.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let view_id = self.id.clone();
                runtime.spawn(async move {
                    if let Err(e) = peer.close().await {
                        log::warn!("Failed to close peer for dropped view {}: {}", view_id, e);
                    }
                });
            }
            Err(_) => log::warn!(
                "Call view {} dropped outside a runtime; peer {} left open",
                self.id,
                peer.id()
            ),
        }
    }
}

/// Enumerate sources, pick the video source and request audio plus video
pub async fn acquire_local_media(
    devices: &dyn MediaDevices,
    media: &MediaConfig,
) -> Result<MediaStream, CallError> {
    let sources = devices.enumerate_sources().await?;
    log::debug!("Enumerated {} media sources", sources.len());

    let constraints = build_constraints(&sources, media.preferred_facing)?;
    log::info!(
        "Requesting capture from source {:?} (audio: {})",
        constraints.video_source_id(),
        constraints.audio
    );

    devices.get_user_media(&constraints).await
}

async fn complete_capture(
    view_id: &str,
    weak: Weak<RwLock<ViewState>>,
    generation: u64,
    result: Result<MediaStream, CallError>,
    scheme: &str,
    peer: Arc<dyn PeerConnection>,
) {
    let Some(shared) = weak.upgrade() else {
        if let Ok(stream) = result {
            stream.release();
        }
        log::debug!("Call view {} gone before capture completed", view_id);
        return;
    };

    let mut state = shared.write().await;
    if !state.is_current(generation) {
        if let Ok(stream) = result {
            stream.release();
        }
        log::debug!("Call view {} unmounted before capture completed", view_id);
        return;
    }

    let stream = match result {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Failed to acquire local media for view {}: {}", view_id, e);
            state.phase = ViewPhase::MediaFailed;
            return;
        }
    };

    state.local_url = Some(stream.to_url(scheme));
    state.local_stream = Some(stream.clone());

    match peer.add_stream(&stream).await {
        Ok(()) => {
            log::info!("Local stream {} attached for view {}", stream.id, view_id);
            state.phase = ViewPhase::MediaAttached;
        }
        Err(e) => {
            log::error!("Failed to attach local stream for view {}: {}", view_id, e);
            stream.release();
            state.local_stream = None;
            state.local_url = None;
            state.phase = ViewPhase::MediaFailed;
        }
    }
}

async fn listen_for_remote_streams(
    weak: Weak<RwLock<ViewState>>,
    generation: u64,
    mut remote_rx: mpsc::UnboundedReceiver<MediaStream>,
    scheme: String,
) {
    while let Some(stream) = remote_rx.recv().await {
        let Some(shared) = weak.upgrade() else {
            stream.release();
            return;
        };
        let mut state = shared.write().await;
        if !store_remote_stream(&mut state, generation, stream, &scheme) {
            return;
        }
    }
}

/// Caller holds the write guard across the generation check and the store
fn store_remote_stream(
    state: &mut ViewState,
    generation: u64,
    stream: MediaStream,
    scheme: &str,
) -> bool {
    if !state.is_current(generation) {
        stream.release();
        return false;
    }

    if state.remote_stream.as_ref().map(|s| s.id.as_str()) == Some(stream.id.as_str()) {
        return true;
    }

    log::info!("Remote stream {} attached", stream.id);
    state.remote_url = Some(stream.to_url(scheme));
    if let Some(previous) = state.remote_stream.replace(stream) {
        previous.release();
    }
    true
}
