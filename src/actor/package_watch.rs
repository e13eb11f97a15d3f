//! Watches install/update/removal of the package backing the live renderer
//! and asks the surface host for a fresh placeholder. The stream is keyed by
//! the render service's interface action string; events for other packages
//! are ignored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::actor::Receiver;
use crate::actor::surface_host::SurfaceHost;

/// Interface action the render service advertises; the watcher subscribes to
/// package changes keyed by it.
pub const ACTION_WALLPAPER_SERVICE: &str = "papermirror.service.WALLPAPER";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PackageStatus {
    Added,
    Changed,
    Removed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageEvent {
    pub package: String,
    pub status: PackageStatus,
}

pub struct PackageWatcher {
    action: String,
    live_package: String,
    host: Arc<SurfaceHost>,
}

impl PackageWatcher {
    pub fn new(action: &str, live_package: &str, host: Arc<SurfaceHost>) -> PackageWatcher {
        PackageWatcher {
            action: action.to_string(),
            live_package: live_package.to_string(),
            host,
        }
    }

    pub fn action(&self) -> &str { &self.action }

    pub fn handle(&self, event: PackageEvent) {
        if event.package != self.live_package {
            trace!("ignoring {} for unrelated package {}", event.status, event.package);
            return;
        }
        // The host itself skips the reset while the surface is created, so a
        // creation racing this event wins.
        debug!("package {} {}; requesting placeholder reset", event.package, event.status);
        self.host.reset_placeholder();
    }

    pub async fn run(self, mut events: Receiver<PackageEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
    }
}
