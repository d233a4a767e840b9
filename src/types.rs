//! Media source descriptors, capture constraints and stream handles

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Samples buffered per track before slow subscribers start lagging
pub const SAMPLE_FEED_CAPACITY: usize = 64;

/// Kind of media a source or track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a camera faces, when the platform reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    External,
}

/// Descriptor of one capture source as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
    pub facing: Option<Facing>,
}

impl SourceInfo {
    pub fn new(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            facing: None,
        }
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = Some(facing);
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Pins a capture request to a specific source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConstraint {
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub mandatory: Vec<SourceConstraint>,
    pub optional: Vec<SourceConstraint>,
}

/// Capture request handed to a [`crate::devices::MediaDevices`] provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    /// Audio plus video pinned to `source`, which is listed as both a
    /// mandatory and an optional constraint.
    pub fn for_video_source(source: &SourceInfo) -> Self {
        let pin = SourceConstraint {
            source_id: source.id.clone(),
        };
        Self {
            audio: true,
            video: Some(VideoConstraints {
                mandatory: vec![pin.clone()],
                optional: vec![pin],
            }),
        }
    }

    /// Source id the video part of this request is pinned to
    pub fn video_source_id(&self) -> Option<&str> {
        self.video
            .as_ref()
            .and_then(|v| v.mandatory.first().or_else(|| v.optional.first()))
            .map(|c| c.source_id.as_str())
    }
}

/// Native resource behind a live track
pub trait CaptureSource: Send + Sync {
    /// Stop producing media. Called at most once per track.
    fn stop(&self);
}

/// One encoded unit of media (an H.264 access unit or an Opus packet)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Bytes,
    pub duration: Duration,
}

impl MediaSample {
    pub fn new(data: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            data: data.into(),
            duration,
        }
    }
}

/// Sender side of a track's encoded sample feed
pub type SampleFeed = broadcast::Sender<MediaSample>;

/// New feed for a capture source to publish into
pub fn sample_feed() -> SampleFeed {
    broadcast::channel(SAMPLE_FEED_CAPACITY).0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

/// One audio or video track of a [`MediaStream`]
#[derive(Clone)]
pub struct MediaStreamTrack {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
    pub source_id: Option<String>,
    ended: Arc<AtomicBool>,
    source: Option<Arc<dyn CaptureSource>>,
    /// Dropped on stop so subscribers see the feed close
    feed: Arc<Mutex<Option<SampleFeed>>>,
}

impl MediaStreamTrack {
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            source_id: None,
            ended: Arc::new(AtomicBool::new(false)),
            source: None,
            feed: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_capture_source(mut self, source: Arc<dyn CaptureSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Publish encoded samples for this track through `feed`
    pub fn with_sample_feed(self, feed: SampleFeed) -> Self {
        if let Ok(mut slot) = self.feed.lock() {
            *slot = Some(feed);
        }
        self
    }

    /// Subscribe to the encoded samples of a live track
    ///
    /// `None` when the track carries no feed or has already ended.
    pub fn subscribe_samples(&self) -> Option<broadcast::Receiver<MediaSample>> {
        if self.state() == TrackState::Ended {
            return None;
        }
        self.feed
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|feed| feed.subscribe()))
    }

    pub fn state(&self) -> TrackState {
        if self.ended.load(Ordering::Acquire) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    /// End the track and release its capture resource. Idempotent.
    pub fn stop(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(source) = &self.source {
            source.stop();
        }
        if let Ok(mut slot) = self.feed.lock() {
            slot.take();
        }
        log::debug!("Stopped {} track {}", self.kind, self.id);
    }
}

impl fmt::Debug for MediaStreamTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("source_id", &self.source_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle to a set of audio/video tracks
///
/// Clones share track state, so releasing any clone ends the tracks for all.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaStreamTrack>,
    pub acquired_at: DateTime<Utc>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaStreamTrack>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaStreamTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
            acquired_at: Utc::now(),
        }
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.tracks.iter().filter(|t| t.kind == MediaKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaStreamTrack> {
        self.tracks.iter().filter(|t| t.kind == MediaKind::Audio)
    }

    /// True while at least one track is live
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.state() == TrackState::Live)
    }

    /// Playable URL for a rendering surface
    pub fn to_url(&self, scheme: &str) -> StreamUrl {
        StreamUrl(format!("{}://{}", scheme, self.id))
    }

    /// Stop every track. Safe to call more than once.
    pub fn release(&self) {
        log::debug!("Releasing media stream {}", self.id);
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// URL a rendering surface resolves to a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamUrl(pub String);

impl StreamUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
