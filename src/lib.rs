//! Live-wallpaper preview mirroring: a typed message-passing connection to
//! an out-of-process render service, a surface host bridge that composites
//! the engine's mirrored output into the host window, and the pure geometry
//! behind crop, zoom, and scale.

pub mod actor;
pub mod common;
pub mod sys;
