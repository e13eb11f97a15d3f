use once_cell::sync::Lazy;

pub mod executor;
pub mod geometry;
pub mod surface;

/// Capability probe: whether this platform can mirror a live preview into the
/// host window. When false the picker takes the static placeholder path and
/// never binds the render service.
pub fn live_preview_supported() -> bool {
    static SUPPORTED: Lazy<bool> =
        Lazy::new(|| std::env::var_os("PAPERMIRROR_NO_LIVE_PREVIEW").is_none());
    *SUPPORTED
}
