//! CrabCall: peer-to-peer video call view for Tauri applications
//!
//! A call view acquires the local camera and microphone, hands the stream
//! to a WebRTC peer connection and exposes two video surfaces (remote and
//! local) for the frontend to draw. ICE, SDP and media transport are left to
//! webrtc-rs.
//!
//! # Features
//! - `native`: capture from real cameras (nokhwa) and microphones (cpal)
//! - `plugin`: Tauri plugin exposing the view as commands
//!
//! # Usage
//! ```rust,ignore
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(crabcall::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
//!
//! Without Tauri, drive a [`VideoCallView`] directly:
//! ```rust,ignore
//! let view = VideoCallView::new(
//!     "main",
//!     CallConfig::default(),
//!     Arc::new(NativeMediaDevices::new()),
//!     Arc::new(RtcPeerConnectionFactory),
//! );
//! view.mount().await?.await?;
//! let layout = view.render().await;
//! view.unmount().await?;
//! ```
pub mod config;
pub mod devices;
pub mod errors;
pub mod peer;
pub mod registry;
pub mod types;
pub mod view;

#[cfg(feature = "native")]
pub mod platform;

#[cfg(feature = "plugin")]
pub mod commands;

// Testing utilities - synthetic devices and peers for offline use
pub mod testing;

// Re-exports for convenience
pub use config::{CallConfig, IceServer, DEFAULT_STUN_SERVER};
pub use devices::MediaDevices;
pub use errors::CallError;
pub use peer::{PeerConnection, PeerConnectionFactory, RtcPeerConnectionFactory};
pub use types::{MediaConstraints, MediaKind, MediaSample, MediaStream, SourceInfo, StreamUrl};
pub use view::{CallLayout, SurfaceRole, VideoCallView, VideoSurface, ViewPhase};

#[cfg(feature = "native")]
pub use platform::NativeMediaDevices;

#[cfg(feature = "plugin")]
use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the CrabCall plugin with all commands
#[cfg(feature = "plugin")]
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("crabcall")
        .invoke_handler(tauri::generate_handler![
            commands::call_view::list_media_sources,
            commands::call_view::mount_call_view,
            commands::call_view::render_call_view,
            commands::call_view::unmount_call_view,
            commands::call_view::list_call_views,
        ])
        .build()
}

/// Initialize logging for the call view
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcall=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
