//! Pure geometry for wallpaper preview: crop windows, centering, minimum
//! zoom, the parallax travel ratio, and the decor-to-surface scale matrix.
//!
//! Everything here is deterministic and does no I/O; callers on any thread
//! may use it freely.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Point { Point { x, y } }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        Rect { left, top, right, bottom }
    }

    pub fn from_size(size: Point) -> Rect { Rect::new(0, 0, size.x, size.y) }

    pub fn width(&self) -> i32 { self.right - self.left }

    pub fn height(&self) -> i32 { self.bottom - self.top }

    pub fn size(&self) -> Point { Point::new(self.width(), self.height()) }

    pub fn contains(&self, other: &Rect) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// The inner rectangle does not fit in the outer one. This is a caller
    /// bug, not a transient condition.
    #[error("inner size {inner:?} exceeds outer size {outer:?}")]
    InnerExceedsOuter { outer: Point, inner: Point },
}

/// Scale-only 2D transform (no skew, no rotation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleMatrix {
    pub sx: f32,
    pub sy: f32,
}

impl ScaleMatrix {
    pub const IDENTITY: ScaleMatrix = ScaleMatrix { sx: 1.0, sy: 1.0 };

    pub fn map(self, p: Point) -> Point {
        Point::new(
            (p.x as f32 * self.sx).round() as i32,
            (p.y as f32 * self.sy).round() as i32,
        )
    }
}

impl Default for ScaleMatrix {
    fn default() -> Self { ScaleMatrix::IDENTITY }
}

// Calibration anchors for the parallax travel span: at an aspect ratio of
// 16/10 the wallpaper travels 1.2x the screen width, at 10/16 it travels
// 1.5x. The line through both is solved here rather than hardcoded so the
// anchors reproduce exactly.
const TRAVEL_WIDE: (f32, f32) = (16.0 / 10.0, 1.2);
const TRAVEL_TALL: (f32, f32) = (10.0 / 16.0, 1.5);

pub fn wallpaper_travel_to_screen_width_ratio(width: i32, height: i32) -> f32 {
    let aspect = width as f32 / height as f32;
    let x = (TRAVEL_WIDE.1 - TRAVEL_TALL.1) / (TRAVEL_WIDE.0 - TRAVEL_TALL.0);
    let y = TRAVEL_WIDE.1 - x * TRAVEL_WIDE.0;
    x * aspect + y
}

/// Offset of `inner`'s top-left corner within `outer`. Centered on both axes
/// unless `align_start`, which snaps the horizontal axis to the leading edge
/// (right edge under RTL).
pub fn calculate_center_position(
    outer: Point,
    inner: Point,
    align_start: bool,
    is_rtl: bool,
) -> Result<Point, GeometryError> {
    if inner.x > outer.x || inner.y > outer.y {
        return Err(GeometryError::InnerExceedsOuter { outer, inner });
    }
    let y = (outer.y - inner.y) / 2;
    let x = if align_start {
        if is_rtl { outer.x - inner.x } else { 0 }
    } else {
        (outer.x - inner.x) / 2
    };
    Ok(Point::new(x, y))
}

/// The zoom factor such that `outer` scaled down by it exactly fits inside
/// `inner` on the constraining axis.
pub fn calculate_min_zoom(outer: Point, inner: Point) -> f32 {
    // cross-multiplied aspect comparison; no float divide for the pick
    if (outer.x as i64) * (inner.y as i64) > (inner.x as i64) * (outer.y as i64) {
        outer.x as f32 / inner.x as f32
    } else {
        outer.y as f32 / inner.y as f32
    }
}

/// Visible crop window for a wallpaper at `wallpaper_zoom`, extended greedily
/// with the crop surface's extra width (in the scroll direction, per RTL) and
/// extra height (split evenly top and bottom). Never exceeds the scaled
/// wallpaper extents on any side.
pub fn calculate_crop_rect(
    wallpaper_zoom: f32,
    wallpaper_size: Point,
    crop_surface_size: Point,
    screen_size: Point,
    scroll_x: i32,
    scroll_y: i32,
    is_rtl: bool,
) -> Rect {
    let scaled_w = (wallpaper_size.x as f32 * wallpaper_zoom) as i32;
    let scaled_h = (wallpaper_size.y as f32 * wallpaper_zoom) as i32;

    let left = scroll_x.clamp(0, (scaled_w - screen_size.x).max(0));
    let top = scroll_y.clamp(0, (scaled_h - screen_size.y).max(0));
    let mut crop = Rect {
        left,
        top,
        right: (left + screen_size.x).min(scaled_w),
        bottom: (top + screen_size.y).min(scaled_h),
    };

    let extra_width = (crop_surface_size.x - screen_size.x).max(0);
    if is_rtl {
        crop.left = (crop.left - extra_width).max(0);
    } else {
        crop.right = (crop.right + extra_width).min(scaled_w);
    }

    let extra_half_height = (crop_surface_size.y - screen_size.y).max(0) / 2;
    crop.top = (crop.top - extra_half_height).max(0);
    crop.bottom = (crop.bottom + extra_half_height).min(scaled_h);

    crop
}

/// Oversized parallax canvas for static wallpapers: screen width times the
/// travel ratio, rounded up to a small grid so repeated computations agree
/// across callers.
pub fn default_crop_surface_size(screen: Point) -> Point {
    let ratio = wallpaper_travel_to_screen_width_ratio(screen.x, screen.y);
    let width = (screen.x as f32 * ratio).ceil() as i32;
    Point::new(round_up(width, 8), round_up(screen.y, 8))
}

/// Transform mapping host decor space into the parent surface's pixel frame.
pub fn scale_matrix(parent_frame: Rect, decor_size: Point) -> ScaleMatrix {
    if decor_size.x <= 0 || decor_size.y <= 0 {
        return ScaleMatrix::IDENTITY;
    }
    ScaleMatrix {
        sx: parent_frame.width() as f32 / decor_size.x as f32,
        sy: parent_frame.height() as f32 / decor_size.y as f32,
    }
}

fn round_up(value: i32, grid: i32) -> i32 { (value + grid - 1) / grid * grid }
