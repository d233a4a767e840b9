//! Capture provider contract and source selection

use crate::errors::CallError;
use crate::types::{Facing, MediaConstraints, MediaStream, SourceInfo};
use async_trait::async_trait;

/// Platform media capture provider
///
/// Both operations may complete on another thread once the driver finishes;
/// callers await them from the view's mount task.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Enumerate audio and video capture sources
    async fn enumerate_sources(&self) -> Result<Vec<SourceInfo>, CallError>;

    /// Acquire a stream satisfying `constraints`
    async fn get_user_media(&self, constraints: &MediaConstraints)
        -> Result<MediaStream, CallError>;
}

/// First video-capable source in enumeration order
pub fn select_video_source(sources: &[SourceInfo]) -> Option<&SourceInfo> {
    sources.iter().find(|s| s.is_video())
}

/// First video source facing `facing`, falling back to [`select_video_source`]
pub fn select_video_source_facing(
    sources: &[SourceInfo],
    facing: Option<Facing>,
) -> Option<&SourceInfo> {
    facing
        .and_then(|wanted| {
            sources
                .iter()
                .find(|s| s.is_video() && s.facing == Some(wanted))
        })
        .or_else(|| select_video_source(sources))
}

/// Build the capture request for the preferred video source
///
/// Audio is always requested alongside video.
pub fn build_constraints(
    sources: &[SourceInfo],
    facing: Option<Facing>,
) -> Result<MediaConstraints, CallError> {
    let source = select_video_source_facing(sources, facing).ok_or(CallError::NoVideoSource)?;
    Ok(MediaConstraints::for_video_source(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaKind;

    fn sources() -> Vec<SourceInfo> {
        vec![
            SourceInfo::new("mic-0", MediaKind::Audio, "Built-in microphone"),
            SourceInfo::new("cam-back", MediaKind::Video, "Back camera").with_facing(Facing::Back),
            SourceInfo::new("cam-front", MediaKind::Video, "Front camera")
                .with_facing(Facing::Front),
        ]
    }

    #[test]
    fn test_first_video_source_wins() {
        let sources = sources();
        let selected = select_video_source(&sources).unwrap();
        assert_eq!(selected.id, "cam-back");
    }

    #[test]
    fn test_facing_preference() {
        let sources = sources();
        let front = select_video_source_facing(&sources, Some(Facing::Front)).unwrap();
        assert_eq!(front.id, "cam-front");

        let external = select_video_source_facing(&sources, Some(Facing::External)).unwrap();
        assert_eq!(external.id, "cam-back");
    }

    #[test]
    fn test_no_video_source() {
        let sources = vec![SourceInfo::new("mic-0", MediaKind::Audio, "Microphone")];
        assert!(select_video_source(&sources).is_none());
        assert!(matches!(
            build_constraints(&sources, None),
            Err(CallError::NoVideoSource)
        ));
    }

    #[test]
    fn test_constraints_always_request_audio() {
        let sources = sources();
        for facing in [None, Some(Facing::Front), Some(Facing::External)] {
            let constraints = build_constraints(&sources, facing).unwrap();
            assert!(constraints.audio);
            assert!(constraints.video.is_some());
        }
    }
}
