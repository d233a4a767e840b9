use crate::config::CallConfig;
use crate::devices::MediaDevices;
use crate::peer::RtcPeerConnectionFactory;
use crate::platform::NativeMediaDevices;
use crate::registry;
use crate::types::SourceInfo;
use crate::view::CallLayout;
use std::sync::Arc;
use tauri::command;

/// List capture sources on this machine
#[command]
pub async fn list_media_sources() -> Result<Vec<SourceInfo>, String> {
    match NativeMediaDevices::new().enumerate_sources().await {
        Ok(sources) => {
            log::info!("Found {} media sources", sources.len());
            Ok(sources)
        }
        Err(e) => {
            log::error!("Failed to list media sources: {}", e);
            Err(format!("Failed to list media sources: {}", e))
        }
    }
}

/// Mount a call view using the native capture provider and webrtc-rs
#[command]
pub async fn mount_call_view(
    view_id: String,
    config: Option<CallConfig>,
) -> Result<CallLayout, String> {
    let config = config.unwrap_or_else(CallConfig::load_or_default);
    config
        .validate()
        .map_err(|e| format!("Invalid call configuration: {}", e))?;

    log::info!("Mounting call view {}", view_id);

    registry::mount_view(
        view_id.clone(),
        config,
        Arc::new(NativeMediaDevices::new()),
        Arc::new(RtcPeerConnectionFactory),
    )
    .await
    .map_err(|e| {
        log::error!("Failed to mount call view {}: {}", view_id, e);
        format!("Failed to mount call view {}: {}", view_id, e)
    })
}

/// Current layout of a mounted call view
#[command]
pub async fn render_call_view(view_id: String) -> Result<CallLayout, String> {
    registry::render_view(&view_id)
        .await
        .ok_or_else(|| format!("Call view {} not found", view_id))
}

/// Unmount a call view, releasing its media and peer connection
#[command]
pub async fn unmount_call_view(view_id: String) -> Result<String, String> {
    match registry::unmount_view(&view_id).await {
        Ok(true) => Ok(format!("Call view {} unmounted", view_id)),
        Ok(false) => Err(format!("Call view {} not found", view_id)),
        Err(e) => Err(format!("Failed to unmount call view {}: {}", view_id, e)),
    }
}

/// List ids of mounted call views
#[command]
pub async fn list_call_views() -> Result<Vec<String>, String> {
    Ok(registry::list_views().await)
}
