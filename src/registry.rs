//! Process-wide registry of mounted call views, keyed by view id
//!
//! Frontends address views by id; the registry owns them between commands.

use crate::config::CallConfig;
use crate::devices::MediaDevices;
use crate::errors::CallError;
use crate::peer::PeerConnectionFactory;
use crate::view::{CallLayout, VideoCallView};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A reserved id is `Mounting` while its peer connection is being built
enum ViewSlot {
    Mounting,
    Mounted(Arc<VideoCallView>),
}

impl ViewSlot {
    fn view(&self) -> Option<&Arc<VideoCallView>> {
        match self {
            ViewSlot::Mounting => None,
            ViewSlot::Mounted(view) => Some(view),
        }
    }
}

lazy_static::lazy_static! {
    static ref CALL_VIEWS: RwLock<HashMap<String, ViewSlot>> = RwLock::new(HashMap::new());
}

/// Create and mount a view under `view_id`
///
/// Does not wait for local media; render the view to observe progress. The
/// registry lock is not held while the peer connection is built.
pub async fn mount_view(
    view_id: String,
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
) -> Result<CallLayout, CallError> {
    {
        let mut views = CALL_VIEWS.write().await;
        if views.contains_key(&view_id) {
            return Err(CallError::AlreadyMounted);
        }
        views.insert(view_id.clone(), ViewSlot::Mounting);
    }

    let view = Arc::new(VideoCallView::new(view_id.clone(), config, devices, peers));
    if let Err(e) = view.mount().await {
        CALL_VIEWS.write().await.remove(&view_id);
        return Err(e);
    }
    let layout = view.render().await;

    CALL_VIEWS
        .write()
        .await
        .insert(view_id, ViewSlot::Mounted(view));
    Ok(layout)
}

pub async fn get_view(view_id: &str) -> Option<Arc<VideoCallView>> {
    CALL_VIEWS
        .read()
        .await
        .get(view_id)
        .and_then(ViewSlot::view)
        .cloned()
}

pub async fn render_view(view_id: &str) -> Option<CallLayout> {
    match get_view(view_id).await {
        Some(view) => Some(view.render().await),
        None => None,
    }
}

/// Unmount and forget `view_id`
///
/// Returns false if no view is mounted under that id, including one that is
/// still mounting.
pub async fn unmount_view(view_id: &str) -> Result<bool, CallError> {
    let view = {
        let mut views = CALL_VIEWS.write().await;
        if matches!(views.get(view_id), Some(ViewSlot::Mounted(_))) {
            match views.remove(view_id) {
                Some(ViewSlot::Mounted(view)) => Some(view),
                _ => None,
            }
        } else {
            None
        }
    };
    match view {
        Some(view) => {
            view.unmount().await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Ids of mounted views, sorted
pub async fn list_views() -> Vec<String> {
    let mut ids: Vec<String> = CALL_VIEWS
        .read()
        .await
        .iter()
        .filter(|(_, slot)| slot.view().is_some())
        .map(|(id, _)| id.clone())
        .collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPeerFactory, SyntheticMediaDevices};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let view_id = "registry_lifecycle".to_string();
        let layout = mount_view(
            view_id.clone(),
            CallConfig::default(),
            Arc::new(SyntheticMediaDevices::new()),
            Arc::new(RecordingPeerFactory::new()),
        )
        .await
        .unwrap();
        assert_eq!(layout.view_id, view_id);
        assert!(list_views().await.contains(&view_id));

        let duplicate = mount_view(
            view_id.clone(),
            CallConfig::default(),
            Arc::new(SyntheticMediaDevices::new()),
            Arc::new(RecordingPeerFactory::new()),
        )
        .await;
        assert!(matches!(duplicate, Err(CallError::AlreadyMounted)));

        assert!(render_view(&view_id).await.is_some());
        assert!(unmount_view(&view_id).await.unwrap());
        assert!(!unmount_view(&view_id).await.unwrap());
        assert!(render_view(&view_id).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_mount_does_not_block_other_views() {
        let ready_id = "registry_ready".to_string();
        mount_view(
            ready_id.clone(),
            CallConfig::default(),
            Arc::new(SyntheticMediaDevices::new()),
            Arc::new(RecordingPeerFactory::new()),
        )
        .await
        .unwrap();

        let slow_id = "registry_slow".to_string();
        let (factory, gate) = RecordingPeerFactory::new().gated();
        let slow = tokio::spawn(mount_view(
            slow_id.clone(),
            CallConfig::default(),
            Arc::new(SyntheticMediaDevices::new()),
            Arc::new(factory),
        ));

        // Wait until the slow mount has reserved its id
        timeout(Duration::from_secs(5), async {
            while !CALL_VIEWS.read().await.contains_key(&slow_id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slow mount never reserved its id");

        // The registry stays usable while the peer connection is pending
        let rendered = timeout(Duration::from_secs(1), render_view(&ready_id))
            .await
            .expect("render blocked by a pending mount");
        assert!(rendered.is_some());
        assert!(render_view(&slow_id).await.is_none());
        assert!(!list_views().await.contains(&slow_id));
        assert!(!unmount_view(&slow_id).await.unwrap());

        let duplicate = mount_view(
            slow_id.clone(),
            CallConfig::default(),
            Arc::new(SyntheticMediaDevices::new()),
            Arc::new(RecordingPeerFactory::new()),
        )
        .await;
        assert!(matches!(duplicate, Err(CallError::AlreadyMounted)));

        gate.notify_one();
        slow.await.unwrap().unwrap();
        assert!(render_view(&slow_id).await.is_some());

        assert!(unmount_view(&slow_id).await.unwrap());
        assert!(unmount_view(&ready_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_mount_frees_the_id() {
        let view_id = "registry_failed".to_string();
        let failed = mount_view(
            view_id.clone(),
            CallConfig::default(),
            Arc::new(SyntheticMediaDevices::new()),
            Arc::new(RecordingPeerFactory::failing()),
        )
        .await;
        assert!(matches!(failed, Err(CallError::PeerConnection(_))));
        assert!(!CALL_VIEWS.read().await.contains_key(&view_id));
    }
}
