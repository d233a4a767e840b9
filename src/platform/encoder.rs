//! H.264 and Opus encoders for native capture
//!
//! Both encoders are created on, and never leave, the capture thread that
//! feeds them.

use crate::errors::CallError;
use openh264::encoder::Encoder;
use openh264::formats::YUVBuffer;
use std::time::Duration;

/// Samples per channel in one 20 ms Opus frame at 48 kHz
const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_VOIP from opus.h
const OPUS_APPLICATION_VOIP: i32 = 2048;

/// Largest packet opus_encode_float may produce
const OPUS_MAX_PACKET: usize = 4000;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

pub const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

/// RGB24 to H.264 Annex B access units
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
}

impl H264Encoder {
    pub fn new(width: u32, height: u32) -> Result<Self, CallError> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(CallError::MediaAcquisition(format!(
                "H.264 needs even frame dimensions, got {}x{}",
                width, height
            )));
        }

        let encoder = Encoder::new().map_err(|e| {
            CallError::MediaAcquisition(format!("Failed to create H.264 encoder: {}", e))
        })?;

        Ok(Self {
            encoder,
            width,
            height,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn encode_rgb(&mut self, rgb: &[u8]) -> Result<Vec<u8>, CallError> {
        let expected = (self.width * self.height * 3) as usize;
        if rgb.len() != expected {
            return Err(CallError::MediaAcquisition(format!(
                "Invalid frame size: expected {} bytes, got {}",
                expected,
                rgb.len()
            )));
        }

        let yuv = YUVBuffer::from_vec(
            rgb_to_yuv420(rgb, self.width, self.height),
            self.width as usize,
            self.height as usize,
        );

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CallError::MediaAcquisition(format!("H.264 encoding failed: {}", e)))?;

        Ok(bitstream.to_vec())
    }
}

/// BT.601 RGB24 to planar YUV 4:2:0
fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 3;
            let r = rgb[i] as i32;
            let g = rgb[i + 1] as i32;
            let b = rgb[i + 2] as i32;

            y_plane[y * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv = (y / 2) * (w / 2) + (x / 2);
                u_plane[uv] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
                v_plane[uv] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// Interleaved f32 PCM at 48 kHz to 20 ms Opus packets
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    pending: Vec<f32>,
}

impl OpusEncoder {
    pub fn new(channels: u16, bitrate: u32) -> Result<Self, CallError> {
        if channels != 1 && channels != 2 {
            return Err(CallError::MediaAcquisition(format!(
                "Opus supports mono or stereo, not {} channels",
                channels
            )));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                OPUS_SAMPLE_RATE as i32,
                channels as i32,
                OPUS_APPLICATION_VOIP,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(CallError::MediaAcquisition(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(CallError::MediaAcquisition(format!(
                "Failed to set Opus bitrate: error code {}",
                result
            )));
        }

        Ok(Self {
            encoder,
            channels,
            pending: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
        })
    }

    /// Buffer `pcm` and encode every complete frame. Leftovers wait for the next call.
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<Vec<u8>>, CallError> {
        self.pending.extend_from_slice(pcm);

        let frame_len = OPUS_FRAME_SAMPLES * self.channels as usize;
        let mut packets = Vec::new();
        while self.pending.len() >= frame_len {
            let mut output = vec![0u8; OPUS_MAX_PACKET];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    self.pending.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            self.pending.drain(..frame_len);

            if len < 0 {
                return Err(CallError::MediaAcquisition(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }
            output.truncate(len as usize);
            packets.push(output);
        }
        Ok(packets)
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv420_size() {
        let yuv = rgb_to_yuv420(&vec![128u8; 64 * 48 * 3], 64, 48);
        assert_eq!(yuv.len(), 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_h264_rejects_odd_dimensions() {
        assert!(H264Encoder::new(641, 480).is_err());
    }

    #[test]
    fn test_h264_first_frame_is_annex_b() {
        let mut encoder = H264Encoder::new(64, 48).unwrap();
        let encoded = encoder.encode_rgb(&vec![90u8; 64 * 48 * 3]).unwrap();
        assert!(
            encoded.starts_with(&[0, 0, 0, 1]) || encoded.starts_with(&[0, 0, 1]),
            "missing start code"
        );
    }

    #[test]
    fn test_opus_packets_per_complete_frame() {
        let mut encoder = OpusEncoder::new(2, 64_000).unwrap();

        // One and a half stereo frames: one packet now, the rest buffered
        let packets = encoder.encode(&vec![0.0f32; OPUS_FRAME_SAMPLES * 3]).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].is_empty());

        let packets = encoder.encode(&vec![0.0f32; OPUS_FRAME_SAMPLES]).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_opus_rejects_surround() {
        assert!(OpusEncoder::new(6, 64_000).is_err());
    }
}
