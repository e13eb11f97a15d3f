//! Host-side bridge between the preview window and the mirrored engine
//! surface.
//!
//! While no mirror is attached the bridge shows a flat placeholder sized to
//! the target view's measured bounds, so the mirror attaching later causes no
//! visible flash. Mirroring itself is one atomic transaction: scale matrix,
//! reparent under the host window, show.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::sys::geometry::{self, Point, Rect};
use crate::sys::surface::{Color, Compositor, SurfaceControl, SurfaceId, Transaction};

pub const DEFAULT_PLACEHOLDER_COLOR: Color = Color::rgb(0x1a, 0x1a, 0x1a);

/// Asynchronously resolved placeholder color derived from sampled wallpaper
/// colors. Single-assignment; consumed at most once per surface setup. If it
/// resolves after setup already ran, the default color stays until the next
/// setup.
pub struct ColorSnapshot(Option<oneshot::Receiver<Color>>);

impl ColorSnapshot {
    pub fn pending() -> (oneshot::Sender<Color>, ColorSnapshot) {
        let (tx, rx) = oneshot::channel();
        (tx, ColorSnapshot(Some(rx)))
    }

    pub fn absent() -> ColorSnapshot { ColorSnapshot(None) }

    /// Non-blocking. Consumes the snapshot on success; a dropped sender
    /// counts as resolution failure and falls back to the default.
    fn take_now(&mut self) -> Option<Color> {
        let rx = self.0.as_mut()?;
        match rx.try_recv() {
            Ok(color) => {
                self.0 = None;
                Some(color)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                debug!("color snapshot failed; keeping default placeholder color");
                self.0 = None;
                None
            }
        }
    }
}

/// At most one live host root may reference a parent surface at a time;
/// replacing one requires releasing the previous root first.
#[derive(Clone, Default)]
pub struct HostRootRegistry(Arc<DashMap<SurfaceId, u64>>);

impl HostRootRegistry {
    fn claim(&self, parent: SurfaceId, root_id: u64) -> bool {
        match self.0.entry(parent) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(root_id);
                true
            }
        }
    }

    fn release(&self, parent: SurfaceId, root_id: u64) {
        self.0.remove_if(&parent, |_, held| *held == root_id);
    }
}

/// Owns exactly one placeholder-or-mirror view at a time; releasing is
/// idempotent and safe before creating a replacement root and on final
/// teardown.
pub struct HostViewRoot {
    id: u64,
    parent: SurfaceControl,
    compositor: Compositor,
    registry: HostRootRegistry,
    view: Option<SurfaceControl>,
    released: bool,
}

impl HostViewRoot {
    fn claim(
        compositor: Compositor,
        registry: HostRootRegistry,
        parent: SurfaceControl,
    ) -> Option<HostViewRoot> {
        static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed);
        if !registry.claim(parent.id(), id) {
            warn!("parent surface {:?} already has a live host root", parent.id());
            return None;
        }
        Some(HostViewRoot {
            id,
            parent,
            compositor,
            registry,
            view: None,
            released: false,
        })
    }

    fn set_view(&mut self, view: SurfaceControl) {
        if self.released {
            warn!("set_view on released host root; dropping surface");
            self.compositor.release(&view);
            return;
        }
        if let Some(old) = self.view.take() {
            self.compositor.release(&old);
        }
        self.view = Some(view);
    }

    pub fn view(&self) -> Option<&SurfaceControl> { self.view.as_ref() }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.registry.release(self.parent.id(), self.id);
        if let Some(view) = self.view.take() {
            self.compositor.release(&view);
        }
    }
}

impl Drop for HostViewRoot {
    fn drop(&mut self) { self.release() }
}

struct HostState {
    parent: SurfaceControl,
    decor_size: Point,
    placeholder_color: Color,
    blur: bool,
    surface_created: bool,
    colors: ColorSnapshot,
    root: Option<HostViewRoot>,
    /// Identity of the engine surface the current mirror was taken from. The
    /// shown callback may refire without the surface changing, so mirroring
    /// is keyed on this, not on the event itself.
    last_engine_surface: Option<SurfaceId>,
    mirror: Option<SurfaceId>,
}

pub struct SurfaceHost {
    compositor: Compositor,
    registry: HostRootRegistry,
    state: Mutex<HostState>,
}

impl SurfaceHost {
    pub fn new(
        compositor: Compositor,
        parent: SurfaceControl,
        decor_size: Point,
        default_color: Color,
        colors: ColorSnapshot,
    ) -> Arc<SurfaceHost> {
        Arc::new(SurfaceHost {
            compositor,
            registry: HostRootRegistry::default(),
            state: Mutex::new(HostState {
                parent,
                decor_size,
                placeholder_color: default_color,
                blur: false,
                surface_created: false,
                colors,
                root: None,
                last_engine_surface: None,
                mirror: None,
            }),
        })
    }

    /// Host surface became available: build a fresh root with a placeholder
    /// sized to the view bounds. The previous root is released first.
    pub fn surface_created(&self) {
        let mut state = self.state.lock();
        state.surface_created = true;
        if let Some(color) = state.colors.take_now() {
            state.placeholder_color = color;
        }
        if let Some(mut root) = state.root.take() {
            root.release();
        }
        let Some(mut root) = HostViewRoot::claim(
            self.compositor.clone(),
            self.registry.clone(),
            state.parent.clone(),
        ) else {
            return;
        };
        let placeholder = build_placeholder(
            &self.compositor,
            &state.parent,
            state.decor_size,
            state.placeholder_color,
            state.blur,
        );
        root.set_view(placeholder);
        state.root = Some(root);
        state.mirror = None;
        state.last_engine_surface = None;
    }

    pub fn surface_destroyed(&self) {
        self.state.lock().surface_created = false;
    }

    /// Mirrors the engine's output and composites it under the host window:
    /// scale matrix, reparent, and show are committed in ONE transaction.
    /// Skipped when the engine surface identity has not changed.
    pub fn reparent_wallpaper_surface(&self, engine_surface: &SurfaceControl) {
        let mut state = self.state.lock();
        if state.last_engine_surface == Some(engine_surface.id()) && state.mirror.is_some() {
            debug!("engine surface unchanged; keeping existing mirror");
            return;
        }
        if state.root.is_none() {
            warn!("no host root; surface was never created");
            return;
        }

        let parent = state.parent.clone();
        let decor_size = state.decor_size;
        let mirror = self.compositor.mirror(engine_surface);
        let parent_frame = self.compositor.frame(parent.id()).unwrap_or_default();
        let matrix = geometry::scale_matrix(parent_frame, decor_size);

        let mut tx = Transaction::new();
        tx.set_matrix(&mirror, matrix)
            .reparent(&mirror, Some(&parent))
            .set_visibility(&mirror, true);
        tx.commit(&self.compositor);

        state.mirror = Some(mirror.id());
        state.last_engine_surface = Some(engine_surface.id());
        if let Some(root) = state.root.as_mut() {
            root.set_view(mirror);
        }
    }

    /// Package backing the live renderer changed. Rebuilds the placeholder so
    /// a resumed view gets fresh content instead of a stale frame, but only
    /// while the surface is not created; creation in progress skips the reset
    /// to avoid racing the surface callback.
    pub fn reset_placeholder(&self) {
        let mut state = self.state.lock();
        if state.surface_created {
            debug!("surface is live; skipping placeholder reset");
            return;
        }
        if state.root.is_none() {
            debug!("no host root yet; nothing to reset");
            return;
        }
        let placeholder = build_placeholder(
            &self.compositor,
            &state.parent,
            state.decor_size,
            state.placeholder_color,
            state.blur,
        );
        state.mirror = None;
        state.last_engine_surface = None;
        if let Some(root) = state.root.as_mut() {
            root.set_view(placeholder);
        }
    }

    pub fn set_home_image_wallpaper_blur(&self, blur: bool) {
        let mut state = self.state.lock();
        if state.blur == blur {
            return;
        }
        state.blur = blur;
        // Only the placeholder renders the blur; a live mirror is untouched.
        if state.mirror.is_none() {
            if let Some(view) = state.root.as_ref().and_then(|root| root.view()) {
                let color = if blur {
                    state.placeholder_color.dimmed()
                } else {
                    state.placeholder_color
                };
                let mut tx = Transaction::new();
                tx.set_color(view, color);
                tx.commit(&self.compositor);
            }
        }
    }

    /// Current placeholder-or-mirror view. None until the first surface
    /// creation.
    pub fn home_image_view(&self) -> Option<SurfaceControl> {
        self.state.lock().root.as_ref().and_then(|root| root.view().cloned())
    }

    pub fn mirror_surface(&self) -> Option<SurfaceId> { self.state.lock().mirror }

    pub fn is_surface_created(&self) -> bool { self.state.lock().surface_created }

    pub fn placeholder_color(&self) -> Color { self.state.lock().placeholder_color }

    /// Final teardown. Safe to call redundantly.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if let Some(mut root) = state.root.take() {
            root.release();
        }
        state.mirror = None;
        state.last_engine_surface = None;
        state.surface_created = false;
    }
}

fn build_placeholder(
    compositor: &Compositor,
    parent: &SurfaceControl,
    decor_size: Point,
    color: Color,
    blur: bool,
) -> SurfaceControl {
    let surface = compositor.create_surface("placeholder", Rect::from_size(decor_size));
    let fill = if blur { color.dimmed() } else { color };
    let mut tx = Transaction::new();
    tx.set_color(&surface, fill)
        .set_frame(&surface, Rect::from_size(decor_size))
        .reparent(&surface, Some(parent))
        .set_visibility(&surface, true);
    tx.commit(compositor);
    surface
}
