//! Call view lifecycle tests
//!
//! Covers mount-time capture, rendering of both surfaces, remote stream
//! attachment, teardown and completions that arrive after teardown.

use crabcall::testing::{handset_sources, RecordingPeerFactory, SyntheticMediaDevices};
use crabcall::types::{MediaKind, MediaStreamTrack, SourceInfo};
use crabcall::{
    CallConfig, CallError, MediaStream, PeerConnection, SurfaceRole, VideoCallView, ViewPhase,
    DEFAULT_STUN_SERVER,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn view_with(
    devices: Arc<SyntheticMediaDevices>,
    peers: Arc<RecordingPeerFactory>,
) -> VideoCallView {
    VideoCallView::new("test_view", CallConfig::default(), devices, peers)
}

async fn settle(handle: tokio::task::JoinHandle<()>) {
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("capture task timed out")
        .expect("capture task panicked");
}

#[tokio::test]
async fn test_capture_pins_first_video_source() {
    let devices = Arc::new(SyntheticMediaDevices::new());
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(devices.clone(), peers.clone());

    settle(view.mount().await.unwrap()).await;

    let requests = devices.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.audio, "audio is always requested alongside video");
    let video = request.video.as_ref().unwrap();
    assert_eq!(video.mandatory.len(), 1);
    assert_eq!(video.optional.len(), 1);
    assert_eq!(video.mandatory[0].source_id, "synthetic-cam-back");
    assert_eq!(video.optional[0].source_id, "synthetic-cam-back");
}

#[tokio::test]
async fn test_local_surface_shows_acquired_stream() {
    let devices = Arc::new(SyntheticMediaDevices::new());
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(devices.clone(), peers.clone());

    settle(view.mount().await.unwrap()).await;

    let stream = devices.issued_streams().pop().unwrap();
    let layout = view.render().await;
    assert_eq!(layout.phase, ViewPhase::MediaAttached);
    assert_eq!(
        layout.surface(SurfaceRole::Local).stream_url,
        Some(stream.to_url("mediastream"))
    );

    let peer = &peers.peers()[0];
    assert_eq!(peer.added_streams(), vec![stream.id.clone()]);
}

#[tokio::test]
async fn test_render_stacks_remote_above_local() {
    let view = view_with(
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(RecordingPeerFactory::new()),
    );

    // Rendering before mount still yields both surfaces, both blank
    let layout = view.render().await;
    assert_eq!(layout.phase, ViewPhase::Unmounted);
    assert_eq!(layout.surfaces[0].role, SurfaceRole::Remote);
    assert_eq!(layout.surfaces[1].role, SurfaceRole::Local);
    assert!(layout.surfaces.iter().all(|s| s.stream_url.is_none()));
    assert_eq!(layout.surfaces[0].flex, layout.surfaces[1].flex);
}

#[tokio::test]
async fn test_local_capture_never_sets_remote_surface() {
    let view = view_with(
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(RecordingPeerFactory::new()),
    );

    settle(view.mount().await.unwrap()).await;

    let layout = view.render().await;
    assert!(layout.surface(SurfaceRole::Local).stream_url.is_some());
    assert!(layout.surface(SurfaceRole::Remote).stream_url.is_none());
    assert!(view.remote_stream().await.is_none());
}

#[tokio::test]
async fn test_capture_failure_leaves_surfaces_blank() {
    let devices = Arc::new(SyntheticMediaDevices::new().failing("camera busy"));
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(devices.clone(), peers.clone());

    settle(view.mount().await.unwrap()).await;

    assert_eq!(view.phase().await, ViewPhase::MediaFailed);
    assert!(view.local_stream().await.is_none());
    let layout = view.render().await;
    assert!(layout.surfaces.iter().all(|s| s.stream_url.is_none()));
    assert!(peers.peers()[0].added_streams().is_empty());
}

#[tokio::test]
async fn test_one_peer_per_mount_with_default_stun() {
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(Arc::new(SyntheticMediaDevices::new()), peers.clone());

    settle(view.mount().await.unwrap()).await;
    assert!(matches!(view.mount().await, Err(CallError::AlreadyMounted)));

    let created = peers.peers();
    assert_eq!(created.len(), 1);
    let servers = created[0].ice_servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].urls, vec![DEFAULT_STUN_SERVER.to_string()]);
}

#[tokio::test]
async fn test_no_video_source_skips_capture() {
    let devices = Arc::new(SyntheticMediaDevices::with_sources(vec![SourceInfo::new(
        "mic",
        MediaKind::Audio,
        "Microphone",
    )]));
    let view = view_with(devices.clone(), Arc::new(RecordingPeerFactory::new()));

    settle(view.mount().await.unwrap()).await;

    assert!(devices.requests().is_empty());
    assert_eq!(view.phase().await, ViewPhase::MediaFailed);
    assert!(view.local_stream().await.is_none());
}

#[tokio::test]
async fn test_peer_creation_failure_is_returned() {
    let view = view_with(
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(RecordingPeerFactory::failing()),
    );

    assert!(matches!(view.mount().await, Err(CallError::PeerConnection(_))));
    assert_eq!(view.phase().await, ViewPhase::Unmounted);
}

#[tokio::test]
async fn test_attach_failure_releases_stream() {
    let devices = Arc::new(SyntheticMediaDevices::new());
    let view = view_with(
        devices.clone(),
        Arc::new(RecordingPeerFactory::rejecting_streams()),
    );

    settle(view.mount().await.unwrap()).await;

    assert_eq!(view.phase().await, ViewPhase::MediaFailed);
    assert!(view.local_stream().await.is_none());
    assert!(!devices.issued_streams()[0].is_active());
}

#[tokio::test]
async fn test_unmount_releases_media_and_closes_peer() {
    let devices = Arc::new(SyntheticMediaDevices::new());
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(devices.clone(), peers.clone());

    settle(view.mount().await.unwrap()).await;
    view.unmount().await.unwrap();

    let stream = devices.issued_streams().pop().unwrap();
    assert!(!stream.is_active());
    assert_eq!(devices.stop_counter().count(), 2);
    assert!(peers.peers()[0].is_closed());
    assert_eq!(view.phase().await, ViewPhase::Unmounted);
    assert!(view.peer().await.is_none());

    let layout = view.render().await;
    assert!(layout.surfaces.iter().all(|s| s.stream_url.is_none()));

    // Second unmount is a no-op
    view.unmount().await.unwrap();
}

#[tokio::test]
async fn test_late_capture_after_unmount_is_released() {
    let (devices, gate) = SyntheticMediaDevices::new().gated();
    let devices = Arc::new(devices);
    let view = view_with(devices.clone(), Arc::new(RecordingPeerFactory::new()));

    let handle = view.mount().await.unwrap();
    assert_eq!(view.phase().await, ViewPhase::AcquiringMedia);

    view.unmount().await.unwrap();
    gate.notify_one();
    settle(handle).await;

    let stream = devices.issued_streams().pop().unwrap();
    assert!(!stream.is_active());
    assert!(view.local_stream().await.is_none());
    assert_eq!(view.phase().await, ViewPhase::Unmounted);
}

#[tokio::test]
async fn test_late_capture_after_drop_is_released() {
    let (devices, gate) = SyntheticMediaDevices::new().gated();
    let devices = Arc::new(devices);
    let view = view_with(devices.clone(), Arc::new(RecordingPeerFactory::new()));

    let handle = view.mount().await.unwrap();
    drop(view);
    gate.notify_one();
    settle(handle).await;

    assert!(!devices.issued_streams()[0].is_active());
}

#[tokio::test]
async fn test_remount_creates_fresh_peer() {
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(Arc::new(SyntheticMediaDevices::new()), peers.clone());

    settle(view.mount().await.unwrap()).await;
    view.unmount().await.unwrap();
    settle(view.mount().await.unwrap()).await;

    assert_eq!(peers.peers().len(), 2);
    assert_eq!(view.phase().await, ViewPhase::MediaAttached);
}

#[tokio::test]
async fn test_remote_stream_from_peer_binds_remote_surface() {
    let peers = Arc::new(RecordingPeerFactory::new());
    let view = view_with(Arc::new(SyntheticMediaDevices::new()), peers.clone());
    settle(view.mount().await.unwrap()).await;

    let remote = MediaStream::with_id(
        "remote-1",
        vec![MediaStreamTrack::new(MediaKind::Video, "remote video")],
    );
    assert!(peers.peers()[0].announce_remote_stream(remote));

    let bound = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(url) = view.render().await.surface(SurfaceRole::Remote).stream_url.clone() {
                return url;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("remote stream never bound");

    assert_eq!(bound.as_str(), "mediastream://remote-1");
}

#[tokio::test]
async fn test_attach_remote_replaces_previous() {
    let view = view_with(
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(RecordingPeerFactory::new()),
    );
    settle(view.mount().await.unwrap()).await;

    let first = MediaStream::with_id("r1", vec![MediaStreamTrack::new(MediaKind::Video, "a")]);
    let second = MediaStream::with_id("r2", vec![MediaStreamTrack::new(MediaKind::Video, "b")]);
    assert!(view.attach_remote_stream(first.clone()).await);
    assert!(view.attach_remote_stream(second.clone()).await);

    assert!(!first.is_active());
    assert!(second.is_active());
    assert_eq!(view.remote_stream().await.unwrap().id, "r2");

    view.unmount().await.unwrap();
    assert!(!second.is_active());

    let late = MediaStream::with_id("r3", vec![MediaStreamTrack::new(MediaKind::Video, "c")]);
    assert!(!view.attach_remote_stream(late.clone()).await);
    assert!(!late.is_active());
}

#[tokio::test]
async fn test_preferred_facing_selects_front_camera() {
    let mut config = CallConfig::default();
    config.media.preferred_facing = Some(crabcall::types::Facing::Front);
    let devices = Arc::new(SyntheticMediaDevices::with_sources(handset_sources()));
    let view = VideoCallView::new(
        "front_view",
        config,
        devices.clone(),
        Arc::new(RecordingPeerFactory::new()),
    );

    settle(view.mount().await.unwrap()).await;

    assert_eq!(
        devices.requests()[0].video_source_id(),
        Some("synthetic-cam-front")
    );
}

#[tokio::test]
async fn test_config_file_cannot_disable_audio() {
    // Older files may still carry an audio switch; it is ignored
    let config: CallConfig = toml::from_str(
        r#"
[ice]
[[ice.servers]]
urls = ["stun:stun.example.org:3478"]

[media]
audio = false
url_scheme = "mediastream"

[layout]
remote_flex = 0.5
local_flex = 0.5
"#,
    )
    .unwrap();
    assert!(config.validate().is_ok());

    let devices = Arc::new(SyntheticMediaDevices::new());
    let view = VideoCallView::new(
        "audio_view",
        config,
        devices.clone(),
        Arc::new(RecordingPeerFactory::new()),
    );
    settle(view.mount().await.unwrap()).await;

    let request = &devices.requests()[0];
    assert!(request.audio);
    assert!(request.video.is_some());
    assert_eq!(view.local_stream().await.unwrap().audio_tracks().count(), 1);
}

#[tokio::test]
async fn test_attach_remote_after_remount() {
    let view = view_with(
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(RecordingPeerFactory::new()),
    );
    settle(view.mount().await.unwrap()).await;
    view.unmount().await.unwrap();
    settle(view.mount().await.unwrap()).await;

    let remote = MediaStream::with_id(
        "after-remount",
        vec![MediaStreamTrack::new(MediaKind::Video, "r")],
    );
    assert!(view.attach_remote_stream(remote.clone()).await);
    assert!(remote.is_active());
    let layout = view.render().await;
    let bound = layout.surface(SurfaceRole::Remote).stream_url.as_ref();
    assert_eq!(bound.map(|u| u.as_str()), Some("mediastream://after-remount"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attach_racing_remount_binds_to_live_mount() {
    let view = Arc::new(view_with(
        Arc::new(SyntheticMediaDevices::new()),
        Arc::new(RecordingPeerFactory::new()),
    ));
    settle(view.mount().await.unwrap()).await;

    let cycler = {
        let view = Arc::clone(&view);
        tokio::spawn(async move {
            for _ in 0..50 {
                view.unmount().await.unwrap();
                settle(view.mount().await.unwrap()).await;
            }
        })
    };

    // Each stream is either stored or rejected and released, never dropped live
    for i in 0..200 {
        let remote = MediaStream::with_id(
            format!("race-{}", i),
            vec![MediaStreamTrack::new(MediaKind::Video, "r")],
        );
        let attached = view.attach_remote_stream(remote.clone()).await;
        if !attached {
            assert!(!remote.is_active());
        }
        tokio::task::yield_now().await;
    }
    cycler.await.unwrap();

    let last = MediaStream::with_id("settled", vec![MediaStreamTrack::new(MediaKind::Video, "r")]);
    assert!(view.attach_remote_stream(last.clone()).await);
    assert!(last.is_active());
}

#[tokio::test]
async fn test_drop_while_mounted_closes_peer() {
    let peers = Arc::new(RecordingPeerFactory::new());
    let devices = Arc::new(SyntheticMediaDevices::new());
    let view = view_with(devices.clone(), peers.clone());
    settle(view.mount().await.unwrap()).await;

    drop(view);
    assert!(!devices.issued_streams()[0].is_active());

    timeout(Duration::from_secs(5), async {
        while !peers.peers()[0].is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer left open after drop");
}
