use anyhow::{anyhow, Context};
use crabcall::testing::SyntheticMediaDevices;
use crabcall::{
    CallConfig, MediaDevices, RtcPeerConnectionFactory, SurfaceRole, VideoCallView,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabcall::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabcall-cli <list-sources|preview> [--json] [--native] [--config <path>]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-sources" => cmd_list_sources(&args).await,
        "preview" => cmd_preview(&args).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn media_devices(args: &[String]) -> anyhow::Result<Arc<dyn MediaDevices>> {
    if args.contains(&"--native".to_string()) {
        #[cfg(feature = "native")]
        {
            return Ok(Arc::new(crabcall::NativeMediaDevices::new()));
        }
        #[cfg(not(feature = "native"))]
        {
            anyhow::bail!("--native requires crabcall-cli built with the `native` feature");
        }
    }
    Ok(Arc::new(SyntheticMediaDevices::new()))
}

async fn cmd_list_sources(args: &[String]) -> anyhow::Result<()> {
    let devices = media_devices(args)?;
    let sources = devices.enumerate_sources().await?;

    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&sources)?);
    } else {
        for s in sources {
            println!("{} [{}]: {}", s.id, s.kind, s.label);
        }
    }
    Ok(())
}

async fn cmd_preview(args: &[String]) -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut i = 2;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            let path = args.get(i).ok_or_else(|| anyhow!("--config needs a path"))?;
            config_path = Some(PathBuf::from(path));
        }
        i += 1;
    }
    let json = args.contains(&"--json".to_string());

    let config = match config_path {
        Some(path) => CallConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CallConfig::load_or_default(),
    };

    let view = VideoCallView::new(
        "cli-preview",
        config,
        media_devices(args)?,
        Arc::new(RtcPeerConnectionFactory),
    );

    // Wait for the capture attempt so the first layout shows its outcome
    view.mount().await?.await?;

    let layout = view.render().await;
    if json {
        println!("{}", serde_json::to_string(&layout)?);
    } else {
        println!("Phase: {:?}", layout.phase);
        for role in [SurfaceRole::Remote, SurfaceRole::Local] {
            let surface = layout.surface(role);
            match &surface.stream_url {
                Some(url) => println!("{:?} ({}): {}", role, surface.flex, url),
                None => println!("{:?} ({}): <blank>", role, surface.flex),
            }
        }
    }

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || signal.notify_one()).context("installing Ctrl-C handler")?;

    eprintln!("Previewing, press Ctrl-C to hang up");
    shutdown.notified().await;

    view.unmount().await?;
    Ok(())
}
