use super::encoder::H264Encoder;
use crate::errors::CallError;
use crate::types::{
    sample_feed, CaptureSource, Facing, MediaKind, MediaSample, MediaStreamTrack, SampleFeed,
    SourceInfo,
};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    Buffer, CallbackCamera,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// Assumed duration of the first frame, before an interval can be measured
const FIRST_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Decoded frames waiting for the encoder; newer frames are dropped when full
const FRAME_QUEUE_DEPTH: usize = 2;

/// List available cameras
pub fn list_cameras() -> Result<Vec<SourceInfo>, CallError> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| CallError::MediaAcquisition(format!("Failed to query cameras: {}", e)))?;

    let sources = cameras
        .into_iter()
        .map(|info| {
            let name = info.human_name();
            let source = SourceInfo::new(info.index().to_string(), MediaKind::Video, name.clone());
            match facing_from_name(&name) {
                Some(facing) => source.with_facing(facing),
                None => source,
            }
        })
        .collect::<Vec<_>>();

    log::debug!("Found {} camera(s)", sources.len());
    Ok(sources)
}

/// Desktop backends do not report facing, so it is inferred from the device name
pub fn facing_from_name(name: &str) -> Option<Facing> {
    let name = name.to_lowercase();
    if name.contains("rear") || name.contains("back") {
        Some(Facing::Back)
    } else if ["front", "facetime", "integrated", "built-in", "user-facing"]
        .iter()
        .any(|hint| name.contains(hint))
    {
        Some(Facing::Front)
    } else if name.contains("usb") || name.contains("external") {
        Some(Facing::External)
    } else {
        None
    }
}

struct RgbFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Open camera held for the lifetime of a video track
pub struct NativeCamera {
    camera: Mutex<Option<CallbackCamera>>,
    device_id: String,
}

impl NativeCamera {
    /// Open `source_id` and start streaming H.264 samples into the track's feed
    pub fn open(source_id: &str) -> Result<MediaStreamTrack, CallError> {
        let index = match source_id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(source_id.to_string()),
        };

        let feed = sample_feed();
        let (frame_tx, frame_rx) = mpsc::sync_channel::<RgbFrame>(FRAME_QUEUE_DEPTH);

        let encoder_feed = feed.clone();
        let encoder_device = source_id.to_string();
        std::thread::Builder::new()
            .name("crabcall-video-encoder".to_string())
            .spawn(move || encode_frames(frame_rx, encoder_feed, encoder_device))?;

        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        // The encoder thread exits once this callback, and with it frame_tx, is dropped
        let mut camera = CallbackCamera::new(index, requested, move |buffer: Buffer| {
            match buffer.decode_image::<RgbFormat>() {
                Ok(image) => {
                    let frame = RgbFrame {
                        width: image.width(),
                        height: image.height(),
                        data: image.into_raw(),
                    };
                    let _ = frame_tx.try_send(frame);
                }
                Err(e) => log::debug!("Dropped undecodable camera frame: {}", e),
            }
        })
        .map_err(|e| {
            CallError::MediaAcquisition(format!("Failed to open camera {}: {}", source_id, e))
        })?;

        camera.open_stream().map_err(|e| {
            CallError::MediaAcquisition(format!("Failed to start camera {}: {}", source_id, e))
        })?;

        log::info!("Camera {} streaming", source_id);

        let label = format!("Camera {}", source_id);
        let source = Arc::new(NativeCamera {
            camera: Mutex::new(Some(camera)),
            device_id: source_id.to_string(),
        });

        Ok(MediaStreamTrack::new(MediaKind::Video, label)
            .with_source_id(source_id)
            .with_capture_source(source)
            .with_sample_feed(feed))
    }
}

fn encode_frames(frames: mpsc::Receiver<RgbFrame>, feed: SampleFeed, device_id: String) {
    let mut encoder: Option<H264Encoder> = None;
    let mut last_frame: Option<Instant> = None;

    for frame in frames {
        let now = Instant::now();
        let duration = last_frame.map_or(FIRST_FRAME_DURATION, |t| now - t);
        last_frame = Some(now);

        if encoder.as_ref().map(H264Encoder::dimensions) != Some((frame.width, frame.height)) {
            match H264Encoder::new(frame.width, frame.height) {
                Ok(e) => {
                    log::info!(
                        "Encoding camera {} at {}x{}",
                        device_id,
                        frame.width,
                        frame.height
                    );
                    encoder = Some(e);
                }
                Err(e) => {
                    log::error!("Camera {}: {}", device_id, e);
                    return;
                }
            }
        }
        let Some(active) = encoder.as_mut() else {
            continue;
        };

        match active.encode_rgb(&frame.data) {
            // Err only means nobody is subscribed yet
            Ok(data) => {
                let _ = feed.send(MediaSample::new(data, duration));
            }
            Err(e) => log::warn!("Camera {}: {}", device_id, e),
        }
    }

    log::debug!("Video encoder for camera {} stopped", device_id);
}

impl CaptureSource for NativeCamera {
    fn stop(&self) {
        let camera = match self.camera.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                log::warn!("Camera {} lock poisoned", self.device_id);
                return;
            }
        };

        if let Some(mut camera) = camera {
            if let Err(e) = camera.stop_stream() {
                log::warn!("Failed to stop camera {}: {}", self.device_id, e);
            } else {
                log::info!("Camera {} released", self.device_id);
            }
        }
    }
}
