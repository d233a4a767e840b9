use super::encoder::{OpusEncoder, OPUS_FRAME_DURATION, OPUS_SAMPLE_RATE};
use crate::errors::CallError;
use crate::types::{sample_feed, CaptureSource, MediaKind, MediaSample, MediaStreamTrack, SourceInfo};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

/// List audio input devices, default device first
pub fn list_microphones() -> Result<Vec<SourceInfo>, CallError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut names: Vec<String> = host
        .input_devices()
        .map_err(|e| CallError::MediaAcquisition(format!("Failed to list microphones: {}", e)))?
        .filter_map(|d| d.name().ok())
        .collect();

    names.sort_by_key(|name| Some(name) != default_name.as_ref());

    Ok(names
        .into_iter()
        .map(|name| SourceInfo::new(format!("audio:{}", name), MediaKind::Audio, name))
        .collect())
}

/// Default input device held open for the lifetime of an audio track
///
/// cpal streams are not `Send` on every host, so the stream and its Opus
/// encoder live on their own thread until stopped.
pub struct NativeMicrophone {
    name: String,
    events: Mutex<Option<mpsc::Sender<MicEvent>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

enum MicEvent {
    Pcm(Vec<f32>),
    Stop,
}

const OPUS_BITRATE: u32 = 64_000;

impl NativeMicrophone {
    pub fn open() -> Result<MediaStreamTrack, CallError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String, CallError>>();
        let (event_tx, event_rx) = mpsc::channel::<MicEvent>();
        let feed = sample_feed();

        let stream_events = event_tx.clone();
        let thread_feed = feed.clone();
        let thread = std::thread::Builder::new()
            .name("crabcall-microphone".to_string())
            .spawn(move || {
                let (name, stream, mut encoder) = match open_default_input(stream_events) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(name.clone()));

                while let Ok(event) = event_rx.recv() {
                    let pcm = match event {
                        MicEvent::Pcm(pcm) => pcm,
                        MicEvent::Stop => break,
                    };
                    match encoder.encode(&pcm) {
                        Ok(packets) => {
                            for packet in packets {
                                // Err only means nobody is subscribed yet
                                let sample = MediaSample::new(packet, OPUS_FRAME_DURATION);
                                let _ = thread_feed.send(sample);
                            }
                        }
                        Err(e) => log::warn!("Microphone {}: {}", name, e),
                    }
                }
                drop(stream);
            })?;

        let name = ready_rx
            .recv()
            .map_err(|_| CallError::MediaAcquisition("Microphone thread exited".to_string()))??;

        log::info!("Microphone {} capturing", name);

        let source = Arc::new(NativeMicrophone {
            name: name.clone(),
            events: Mutex::new(Some(event_tx)),
            thread: Mutex::new(Some(thread)),
        });

        Ok(MediaStreamTrack::new(MediaKind::Audio, name.clone())
            .with_source_id(format!("audio:{}", name))
            .with_capture_source(source)
            .with_sample_feed(feed))
    }
}

/// Open the default input at 48 kHz, mono or stereo, as Opus requires
fn open_default_input(
    events: mpsc::Sender<MicEvent>,
) -> Result<(String, cpal::Stream, OpusEncoder), CallError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CallError::MediaAcquisition("No default microphone".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "default".to_string());

    let rate = cpal::SampleRate(OPUS_SAMPLE_RATE);
    let supported = device
        .supported_input_configs()
        .map_err(|e| CallError::MediaAcquisition(format!("No supported input config: {}", e)))?
        .filter(|range| range.channels() <= 2)
        .find(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .ok_or_else(|| {
            CallError::MediaAcquisition(format!("Microphone {} cannot capture at 48 kHz", name))
        })?
        .with_sample_rate(rate);

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let encoder = OpusEncoder::new(config.channels, OPUS_BITRATE)?;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, events),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, events),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, events),
        other => Err(CallError::MediaAcquisition(format!(
            "Unsupported microphone sample format {:?}",
            other
        ))),
    }?;

    stream
        .play()
        .map_err(|e| CallError::MediaAcquisition(format!("Failed to start microphone: {}", e)))?;

    Ok((name, stream, encoder))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    events: mpsc::Sender<MicEvent>,
) -> Result<cpal::Stream, CallError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let pcm = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                let _ = events.send(MicEvent::Pcm(pcm));
            },
            |err| log::error!("Microphone error: {}", err),
            None,
        )
        .map_err(|e| CallError::MediaAcquisition(format!("Failed to open microphone: {}", e)))
}

impl CaptureSource for NativeMicrophone {
    fn stop(&self) {
        if let Ok(mut events) = self.events.lock() {
            if let Some(events) = events.take() {
                let _ = events.send(MicEvent::Stop);
            }
        }
        if let Ok(mut thread) = self.thread.lock() {
            if let Some(handle) = thread.take() {
                if handle.join().is_err() {
                    log::warn!("Microphone thread for {} panicked", self.name);
                }
            }
        }
        log::info!("Microphone {} released", self.name);
    }
}
