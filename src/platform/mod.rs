//! Native capture provider
//!
//! Cameras come from nokhwa, microphones from cpal. Device work runs on the
//! blocking pool so the view's mount task never stalls the runtime.
//!
//! Each opened device runs a capture thread that encodes what it captures
//! (H.264 through openh264, Opus through libopus) and publishes the samples
//! on its track's feed. The peer connection writes that feed to its local
//! tracks.

pub mod camera;
pub mod encoder;
pub mod microphone;

use crate::devices::MediaDevices;
use crate::errors::CallError;
use crate::types::{MediaConstraints, MediaStream, SourceInfo};
use async_trait::async_trait;

pub use camera::{facing_from_name, list_cameras, NativeCamera};
pub use microphone::{list_microphones, NativeMicrophone};

/// [`MediaDevices`] backed by the host's cameras and microphones
#[derive(Debug, Default, Clone)]
pub struct NativeMediaDevices;

impl NativeMediaDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for NativeMediaDevices {
    async fn enumerate_sources(&self) -> Result<Vec<SourceInfo>, CallError> {
        tokio::task::spawn_blocking(|| -> Result<Vec<SourceInfo>, CallError> {
            let mut sources = list_cameras()?;
            match list_microphones() {
                Ok(mics) => sources.extend(mics),
                Err(e) => log::warn!("Failed to list microphones: {}", e),
            }
            Ok(sources)
        })
        .await
        .map_err(|e| CallError::MediaAcquisition(format!("Enumeration task failed: {}", e)))?
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, CallError> {
        let constraints = constraints.clone();
        tokio::task::spawn_blocking(move || -> Result<MediaStream, CallError> {
            let mut tracks = Vec::new();

            if let Some(source_id) = constraints.video_source_id() {
                tracks.push(NativeCamera::open(source_id)?);
            }

            if constraints.audio {
                match NativeMicrophone::open() {
                    Ok(track) => tracks.push(track),
                    Err(e) => {
                        for track in &tracks {
                            track.stop();
                        }
                        return Err(e);
                    }
                }
            }

            let stream = MediaStream::new(tracks);
            log::info!(
                "Acquired native stream {} with {} track(s)",
                stream.id,
                stream.tracks.len()
            );
            Ok(stream)
        })
        .await
        .map_err(|e| CallError::MediaAcquisition(format!("Capture task failed: {}", e)))?
    }
}
