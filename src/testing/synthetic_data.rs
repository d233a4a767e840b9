//! Synthetic capture provider
//!
//! Behaves like a phone with a back camera, a front camera and a built-in
//! microphone, so views can be mounted without hardware.

use crate::devices::MediaDevices;
use crate::errors::CallError;
use crate::types::{
    CaptureSource, Facing, MediaConstraints, MediaKind, MediaStream, MediaStreamTrack, SourceInfo,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Sources a typical handset reports, in platform order
pub fn handset_sources() -> Vec<SourceInfo> {
    vec![
        SourceInfo::new("synthetic-mic", MediaKind::Audio, "Built-in microphone"),
        SourceInfo::new("synthetic-cam-back", MediaKind::Video, "Back camera")
            .with_facing(Facing::Back),
        SourceInfo::new("synthetic-cam-front", MediaKind::Video, "Front camera")
            .with_facing(Facing::Front),
    ]
}

/// Counts how many synthetic capture resources were stopped
#[derive(Debug, Default)]
pub struct StopCounter(AtomicUsize);

impl StopCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct SyntheticCapture {
    stops: Arc<StopCounter>,
}

impl CaptureSource for SyntheticCapture {
    fn stop(&self) {
        self.stops.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory [`MediaDevices`] implementation
pub struct SyntheticMediaDevices {
    sources: Vec<SourceInfo>,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
    requests: Mutex<Vec<MediaConstraints>>,
    issued: Mutex<Vec<MediaStream>>,
    stops: Arc<StopCounter>,
}

impl Default for SyntheticMediaDevices {
    fn default() -> Self {
        Self::with_sources(handset_sources())
    }
}

impl SyntheticMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<SourceInfo>) -> Self {
        Self {
            sources,
            failure: None,
            gate: None,
            requests: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
            stops: Arc::new(StopCounter::default()),
        }
    }

    /// Every capture request fails with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Capture requests wait until the returned handle is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Constraints received so far, in order
    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Streams handed out so far
    pub fn issued_streams(&self) -> Vec<MediaStream> {
        self.issued.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn stop_counter(&self) -> Arc<StopCounter> {
        Arc::clone(&self.stops)
    }

    fn track(&self, kind: MediaKind, source: &SourceInfo) -> MediaStreamTrack {
        MediaStreamTrack::new(kind, source.label.clone())
            .with_source_id(source.id.clone())
            .with_capture_source(Arc::new(SyntheticCapture {
                stops: Arc::clone(&self.stops),
            }))
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn enumerate_sources(&self) -> Result<Vec<SourceInfo>, CallError> {
        Ok(self.sources.clone())
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, CallError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(constraints.clone());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(message) = &self.failure {
            return Err(CallError::MediaAcquisition(message.clone()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            let mic = self
                .sources
                .iter()
                .find(|s| s.kind == MediaKind::Audio)
                .ok_or_else(|| CallError::MediaAcquisition("no audio source".to_string()))?;
            tracks.push(self.track(MediaKind::Audio, mic));
        }
        if let Some(source_id) = constraints.video_source_id() {
            let camera = self
                .sources
                .iter()
                .find(|s| s.is_video() && s.id == source_id)
                .ok_or_else(|| {
                    CallError::MediaAcquisition(format!("unknown video source {}", source_id))
                })?;
            tracks.push(self.track(MediaKind::Video, camera));
        }

        let stream = MediaStream::new(tracks);
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(stream.clone());
        }
        Ok(stream)
    }
}
