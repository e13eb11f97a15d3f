use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use papermirror::actor::connection::{ConnectionListener, WallpaperColors, WallpaperConnection};
use papermirror::actor::package_watch::{PackageEvent, PackageWatcher};
use papermirror::actor::render_service::RenderService;
use papermirror::actor::surface_host::{ColorSnapshot, SurfaceHost};
use papermirror::common::config::Config;
use papermirror::sys::executor::{Executor, yield_now};
use papermirror::sys::geometry::{self, Point, Rect};
use papermirror::sys::surface::Compositor;
use papermirror::{actor, sys};

#[derive(Parser, Debug)]
#[command(name = "papermirror", about = "Live wallpaper preview mirroring session")]
struct Args {
    /// Path to config.toml (defaults to the user config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the package backing the live renderer.
    #[arg(long)]
    package: Option<String>,

    /// JSON-lines file of package events to replay against the session.
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() -> Result<()> {
    sigpipe::reset();
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let live_package = args.package.unwrap_or_else(|| config.live_package.clone());
    let screen = config.screen_size();
    let crop_surface = geometry::default_crop_surface_size(screen);
    info!(
        ?crop_surface,
        travel_ratio = geometry::wallpaper_travel_to_screen_width_ratio(screen.x, screen.y),
        "parallax crop surface for {}x{}",
        screen.x,
        screen.y
    );
    let sample_wallpaper = Point::new(3200, 2400);
    let zoom = geometry::calculate_min_zoom(sample_wallpaper, screen);
    let crop = geometry::calculate_crop_rect(
        zoom,
        sample_wallpaper,
        crop_surface,
        screen,
        0,
        0,
        config.rtl,
    );
    info!(?crop, zoom, "initial crop for a {}x{} wallpaper", sample_wallpaper.x, sample_wallpaper.y);

    let compositor = Compositor::new();
    let parent = compositor.create_surface("host-window", Rect::from_size(screen));
    let (color_tx, colors) = ColorSnapshot::pending();
    // A real picker resolves this from sampled wallpaper colors; the demo
    // session resolves it from config right away.
    _ = color_tx.send(config.placeholder_color());
    let host = SurfaceHost::new(
        compositor.clone(),
        parent,
        screen,
        config.placeholder_color(),
        colors,
    );
    host.surface_created();

    let (service_tx, service_rx) = actor::channel();
    let service = RenderService::new(
        compositor.clone(),
        WallpaperColors {
            primary: config.placeholder_color(),
            secondary: None,
            tertiary: None,
        },
        0,
        screen,
    );

    let listener = ConnectionListener {
        on_connected: Some(Box::new(|| info!("connected to render service"))),
        on_disconnected: Some(Box::new(|| info!("disconnected from render service"))),
        on_engine_shown: Some(Box::new(|| info!("engine rendered its first frame"))),
        on_colors_changed: Some(Box::new(|colors, display_id| {
            info!(?colors, display_id, "wallpaper colors changed");
        })),
    };
    let live_preview = config.live_preview && sys::live_preview_supported();
    let (connection, events_rx) =
        WallpaperConnection::new(service_tx, Some(host.clone()), listener, live_preview);

    let watcher = PackageWatcher::new(&config.service_action, &live_package, host.clone());
    let (package_tx, package_rx) = actor::channel();
    let feed: Vec<PackageEvent> = match &args.events {
        Some(path) => std::fs::read_to_string(path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?,
        None => vec![],
    };

    let conn = connection.clone();
    let demo_host = host.clone();
    let demo_compositor = compositor.clone();
    Executor::run(async move {
        tokio::select! {
            _ = service.run(service_rx) => {}
            _ = connection.clone().run(events_rx) => {}
            _ = watcher.run(package_rx) => {}
            _ = async move {
                if !conn.connect() {
                    info!("live preview unavailable; showing placeholder only");
                    return;
                }
                conn.set_visibility(true);
                for _ in 0..16 {
                    yield_now().await;
                }
                info!(
                    engine_ready = conn.is_engine_ready(),
                    commits = demo_compositor.commit_seq(),
                    "preview session up"
                );

                // Replay the package feed against a destroyed surface, the
                // way a backgrounded picker would see it.
                demo_host.surface_destroyed();
                for event in feed {
                    _ = package_tx.send(event);
                }
                for _ in 0..8 {
                    yield_now().await;
                }

                conn.set_visibility(false);
                conn.clean_up();
                for _ in 0..8 {
                    yield_now().await;
                }
            } => {}
        }
    });

    info!("exiting");
    Ok(())
}
