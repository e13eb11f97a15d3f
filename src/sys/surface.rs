//! Surface-control composition model.
//!
//! Surfaces live in a [`Compositor`] registry; mutations go through a
//! [`Transaction`], which applies every queued op under a single lock
//! acquisition. There is no observable intermediate state between the ops of
//! one commit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::collections::HashMap;
use crate::sys::geometry::{Rect, ScaleMatrix};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> SurfaceId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SurfaceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 { self.0 }
}

/// 32-bit ARGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        Color(0xff00_0000 | (r as u32) << 16 | (g as u32) << 8 | b as u32)
    }

    /// Parses `#rrggbb` or `#aarrggbb`.
    pub fn from_hex(hex: &str) -> Option<Color> {
        let digits = hex.strip_prefix('#')?;
        match digits.len() {
            6 => u32::from_str_radix(digits, 16).ok().map(|v| Color(0xff00_0000 | v)),
            8 => u32::from_str_radix(digits, 16).ok().map(Color),
            _ => None,
        }
    }

    /// Halves each channel; used for the blurred home-image placeholder.
    pub fn dimmed(self) -> Color {
        let a = self.0 & 0xff00_0000;
        let rgb = (self.0 >> 1) & 0x007f_7f7f;
        Color(a | rgb)
    }
}

/// Handle to one surface in the compositor. Cheap to clone; identity is the
/// [`SurfaceId`].
#[derive(Clone, Debug)]
pub struct SurfaceControl {
    id: SurfaceId,
    name: Arc<str>,
}

impl SurfaceControl {
    pub fn id(&self) -> SurfaceId { self.id }

    pub fn name(&self) -> &str { &self.name }
}

#[derive(Clone, Debug, Default)]
struct SurfaceState {
    name: String,
    parent: Option<SurfaceId>,
    matrix: ScaleMatrix,
    visible: bool,
    color: Option<Color>,
    frame: Rect,
    mirror_of: Option<SurfaceId>,
}

#[derive(Default)]
struct CompositorInner {
    surfaces: HashMap<SurfaceId, SurfaceState>,
    commit_seq: u64,
}

#[derive(Clone, Default)]
pub struct Compositor(Arc<Mutex<CompositorInner>>);

impl Compositor {
    pub fn new() -> Compositor { Compositor::default() }

    pub fn create_surface(&self, name: &str, frame: Rect) -> SurfaceControl {
        let id = SurfaceId::next();
        let mut inner = self.0.lock();
        inner.surfaces.insert(id, SurfaceState {
            name: name.to_string(),
            frame,
            ..SurfaceState::default()
        });
        debug!("created surface {name:?} ({id:?})");
        SurfaceControl { id, name: name.into() }
    }

    /// New surface showing the same pixels as `source`, without owning its
    /// placement. The mirror starts detached and hidden.
    pub fn mirror(&self, source: &SurfaceControl) -> SurfaceControl {
        let id = SurfaceId::next();
        let name = format!("mirror:{}", source.name());
        let mut inner = self.0.lock();
        if !inner.surfaces.contains_key(&source.id()) {
            warn!("mirroring released surface {:?}", source.id());
        }
        inner.surfaces.insert(id, SurfaceState {
            name: name.clone(),
            mirror_of: Some(source.id()),
            ..SurfaceState::default()
        });
        SurfaceControl { id, name: name.into() }
    }

    /// Removes the surface and detaches its children. Releasing an already
    /// released surface is a no-op.
    pub fn release(&self, surface: &SurfaceControl) {
        let mut inner = self.0.lock();
        let Some(state) = inner.surfaces.remove(&surface.id()) else {
            debug!("surface {:?} already released", surface.id());
            return;
        };
        debug!("released surface {:?} ({:?})", state.name, surface.id());
        let released = surface.id();
        for state in inner.surfaces.values_mut() {
            if state.parent == Some(released) {
                state.parent = None;
                state.visible = false;
            }
        }
    }

    pub fn commit_seq(&self) -> u64 { self.0.lock().commit_seq }

    pub fn contains(&self, id: SurfaceId) -> bool { self.0.lock().surfaces.contains_key(&id) }

    pub fn frame(&self, id: SurfaceId) -> Option<Rect> {
        self.0.lock().surfaces.get(&id).map(|s| s.frame)
    }

    pub fn parent(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.0.lock().surfaces.get(&id).and_then(|s| s.parent)
    }

    pub fn is_visible(&self, id: SurfaceId) -> bool {
        self.0.lock().surfaces.get(&id).map(|s| s.visible).unwrap_or(false)
    }

    pub fn matrix(&self, id: SurfaceId) -> Option<ScaleMatrix> {
        self.0.lock().surfaces.get(&id).map(|s| s.matrix)
    }

    pub fn color(&self, id: SurfaceId) -> Option<Color> {
        self.0.lock().surfaces.get(&id).and_then(|s| s.color)
    }

    pub fn mirror_source(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.0.lock().surfaces.get(&id).and_then(|s| s.mirror_of)
    }
}

#[derive(Debug)]
enum TxOp {
    SetMatrix(SurfaceId, ScaleMatrix),
    Reparent(SurfaceId, Option<SurfaceId>),
    SetVisibility(SurfaceId, bool),
    SetColor(SurfaceId, Color),
    SetFrame(SurfaceId, Rect),
}

/// Batch of surface mutations applied atomically by [`Transaction::commit`].
#[derive(Debug, Default)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    pub fn new() -> Transaction { Transaction::default() }

    pub fn set_matrix(&mut self, surface: &SurfaceControl, matrix: ScaleMatrix) -> &mut Self {
        self.ops.push(TxOp::SetMatrix(surface.id(), matrix));
        self
    }

    pub fn reparent(
        &mut self,
        surface: &SurfaceControl,
        new_parent: Option<&SurfaceControl>,
    ) -> &mut Self {
        self.ops.push(TxOp::Reparent(surface.id(), new_parent.map(|p| p.id())));
        self
    }

    pub fn set_visibility(&mut self, surface: &SurfaceControl, visible: bool) -> &mut Self {
        self.ops.push(TxOp::SetVisibility(surface.id(), visible));
        self
    }

    pub fn set_color(&mut self, surface: &SurfaceControl, color: Color) -> &mut Self {
        self.ops.push(TxOp::SetColor(surface.id(), color));
        self
    }

    pub fn set_frame(&mut self, surface: &SurfaceControl, frame: Rect) -> &mut Self {
        self.ops.push(TxOp::SetFrame(surface.id(), frame));
        self
    }

    /// Applies all queued ops under one lock acquisition and bumps the commit
    /// sequence exactly once. Ops against released surfaces are dropped with
    /// a warning.
    pub fn commit(self, compositor: &Compositor) {
        let mut inner = compositor.0.lock();
        for op in self.ops {
            let id = match &op {
                TxOp::SetMatrix(id, _)
                | TxOp::Reparent(id, _)
                | TxOp::SetVisibility(id, _)
                | TxOp::SetColor(id, _)
                | TxOp::SetFrame(id, _) => *id,
            };
            let Some(state) = inner.surfaces.get_mut(&id) else {
                warn!("transaction op against released surface {id:?}: {op:?}");
                continue;
            };
            match op {
                TxOp::SetMatrix(_, matrix) => state.matrix = matrix,
                TxOp::Reparent(_, parent) => state.parent = parent,
                TxOp::SetVisibility(_, visible) => state.visible = visible,
                TxOp::SetColor(_, color) => state.color = Some(color),
                TxOp::SetFrame(_, frame) => state.frame = frame,
            }
        }
        inner.commit_seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sys::geometry::Point;

    #[test]
    fn commit_applies_all_ops_and_bumps_seq_once() {
        let compositor = Compositor::new();
        let parent = compositor.create_surface("parent", Rect::new(0, 0, 100, 100));
        let child = compositor.create_surface("child", Rect::default());

        let before = compositor.commit_seq();
        let mut tx = Transaction::new();
        tx.set_matrix(&child, ScaleMatrix { sx: 2.0, sy: 2.0 })
            .reparent(&child, Some(&parent))
            .set_visibility(&child, true);
        tx.commit(&compositor);

        assert_eq!(compositor.commit_seq(), before + 1);
        assert_eq!(compositor.parent(child.id()), Some(parent.id()));
        assert_eq!(compositor.matrix(child.id()), Some(ScaleMatrix { sx: 2.0, sy: 2.0 }));
        assert!(compositor.is_visible(child.id()));
    }

    #[test]
    fn release_is_idempotent_and_detaches_children() {
        let compositor = Compositor::new();
        let parent = compositor.create_surface("parent", Rect::new(0, 0, 10, 10));
        let child = compositor.create_surface("child", Rect::default());
        let mut tx = Transaction::new();
        tx.reparent(&child, Some(&parent)).set_visibility(&child, true);
        tx.commit(&compositor);

        compositor.release(&parent);
        compositor.release(&parent);

        assert!(!compositor.contains(parent.id()));
        assert_eq!(compositor.parent(child.id()), None);
        assert!(!compositor.is_visible(child.id()));
    }

    #[test]
    fn ops_against_released_surfaces_are_dropped() {
        let compositor = Compositor::new();
        let surface = compositor.create_surface("gone", Rect::default());
        compositor.release(&surface);

        let mut tx = Transaction::new();
        tx.set_visibility(&surface, true);
        tx.commit(&compositor);

        assert!(!compositor.is_visible(surface.id()));
        assert_eq!(compositor.commit_seq(), 1);
    }

    #[test]
    fn mirror_records_its_source() {
        let compositor = Compositor::new();
        let source = compositor.create_surface("engine", Rect::new(0, 0, 50, 50));
        let mirror = compositor.mirror(&source);
        assert_eq!(compositor.mirror_source(mirror.id()), Some(source.id()));
        assert!(!compositor.is_visible(mirror.id()));
        assert_eq!(compositor.parent(mirror.id()), None);
    }

    #[test]
    fn color_hex_round_trip() {
        assert_eq!(Color::from_hex("#1a1a1a"), Some(Color::rgb(0x1a, 0x1a, 0x1a)));
        assert_eq!(Color::from_hex("#80102030"), Some(Color(0x8010_2030)));
        assert_eq!(Color::from_hex("nope"), None);
        assert_eq!(Color::from_hex("#12345"), None);
    }

    #[test]
    fn dimmed_halves_channels_and_keeps_alpha() {
        assert_eq!(Color::rgb(0x80, 0x40, 0x20).dimmed(), Color::rgb(0x40, 0x20, 0x10));
        assert_eq!(Color(0x8020_2020).dimmed().0 & 0xff00_0000, 0x8000_0000);
    }

    #[test]
    fn scale_matrix_map_sanity() {
        let m = ScaleMatrix { sx: 0.5, sy: 0.25 };
        assert_eq!(m.map(Point::new(100, 100)), Point::new(50, 25));
    }
}
