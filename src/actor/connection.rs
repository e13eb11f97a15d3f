//! Remote engine connection: the bind/attach/shown state machine against the
//! out-of-process wallpaper render service.
//!
//! The binder boundary is an explicit message-passing one: requests flow to
//! the service over [`ServiceRequest`], per-engine commands over
//! [`EngineCommand`], and the remote raises [`ConnectionEvent`]s back. Remote
//! callbacks may originate on any thread; they are handled only after being
//! drained onto the UI executor (see [`WallpaperConnection::run`]).
//!
//! Every call into the remote can fail because the far end died. Each such
//! call is caught individually and degrades to a logged no-op so the local
//! state machine always proceeds to its next state. No retries, no timeouts:
//! a bind that never attaches leaves the connection in "connected, no
//! engine" until someone disconnects.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info_span, warn};

use crate::actor::surface_host::SurfaceHost;
use crate::actor::{Receiver, Sender};
use crate::sys::surface::{Color, SurfaceControl};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote render process is gone")]
    RemoteGone,
    #[error("render service is not bound")]
    NotBound,
}

/// Colors sampled by the render engine from its current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WallpaperColors {
    pub primary: Color,
    pub secondary: Option<Color>,
    pub tertiary: Option<Color>,
}

/// Requests to the render service.
#[derive(Debug)]
pub enum ServiceRequest {
    Bind { events: Sender<ConnectionEvent> },
    Unbind,
}

/// Commands addressed to one attached engine.
#[derive(Debug, PartialEq, Eq, strum_macros::Display)]
pub enum EngineCommand {
    SetVisibility(bool),
    RequestColors,
    Destroy,
}

/// Events raised by the remote side. May be sent from an arbitrary thread.
#[derive(Debug)]
pub enum ConnectionEvent {
    EngineAttached { engine: EngineHandle },
    ColorsChanged { colors: WallpaperColors, display_id: i32 },
    EngineShown,
    RemoteDied,
}

/// Back-reference to the remote renderer instance. The remote owns the real
/// rendering resource; local code may request its destruction but treats
/// "already gone" as non-fatal.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    surface: SurfaceControl,
    display_id: i32,
}

impl EngineHandle {
    pub fn new(commands: Sender<EngineCommand>, surface: SurfaceControl, display_id: i32) -> Self {
        EngineHandle { commands, surface, display_id }
    }

    pub fn surface(&self) -> &SurfaceControl { &self.surface }

    pub fn display_id(&self) -> i32 { self.display_id }

    pub fn set_visibility(&self, visible: bool) -> Result<(), RemoteError> {
        self.commands
            .send(EngineCommand::SetVisibility(visible))
            .map_err(|_| RemoteError::RemoteGone)
    }

    pub fn request_colors(&self) -> Result<(), RemoteError> {
        self.commands.send(EngineCommand::RequestColors).map_err(|_| RemoteError::RemoteGone)
    }

    pub fn destroy(&self) -> Result<(), RemoteError> {
        self.commands.send(EngineCommand::Destroy).map_err(|_| RemoteError::RemoteGone)
    }
}

/// Notifications out of the connection; each handler is independently
/// optional. All handlers run on the UI executor.
#[derive(Default)]
pub struct ConnectionListener {
    pub on_connected: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_disconnected: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_engine_shown: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_colors_changed: Option<Box<dyn Fn(WallpaperColors, i32) + Send + Sync>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct ConnState {
    phase: Phase,
    engine: Option<EngineHandle>,
    /// Visibility the UI wants; applied to the engine at attach time.
    desired_visible: bool,
    /// Last visibility actually pushed to the remote. Only meaningful while
    /// an engine is attached.
    engine_visible: bool,
    engine_ready: bool,
}

pub struct WallpaperConnection {
    service: Sender<ServiceRequest>,
    events_tx: Sender<ConnectionEvent>,
    host: Option<Arc<SurfaceHost>>,
    listener: ConnectionListener,
    live_preview: bool,
    state: Mutex<ConnState>,
}

impl WallpaperConnection {
    /// Returns the connection and the event receiver to drain on the UI
    /// executor (see [`WallpaperConnection::run`]).
    pub fn new(
        service: Sender<ServiceRequest>,
        host: Option<Arc<SurfaceHost>>,
        listener: ConnectionListener,
        live_preview: bool,
    ) -> (Arc<WallpaperConnection>, Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = super::channel();
        let connection = Arc::new(WallpaperConnection {
            service,
            events_tx,
            host,
            listener,
            live_preview,
            state: Mutex::new(ConnState {
                phase: Phase::Disconnected,
                engine: None,
                desired_visible: false,
                engine_visible: false,
                engine_ready: false,
            }),
        });
        (connection, events_rx)
    }

    /// Initiates binding to the render service. Success means the bind
    /// request went out; engine attachment is asynchronous. Idempotent:
    /// calling while connected returns true without rebinding. Returns false
    /// without binding when live preview is unsupported.
    pub fn connect(&self) -> bool {
        if !self.live_preview {
            debug!("live preview unsupported; taking static fallback");
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Disconnected {
                return true;
            }
            let request = ServiceRequest::Bind { events: self.events_tx.clone() };
            if self.service.send(request).is_err() {
                warn!("bind request failed: render service is gone");
                return false;
            }
            state.phase = Phase::Connecting;
        }
        if let Some(on_connected) = &self.listener.on_connected {
            on_connected();
        }
        true
    }

    /// Tears the connection down. Destroys a held engine (remote failures
    /// swallowed), always attempts unbind, and notifies `on_disconnected`
    /// unconditionally after cleanup. Safe to call at any point, including
    /// mid-attach.
    pub fn disconnect(&self) {
        let span = info_span!("connection::disconnect");
        let _s = span.enter();
        {
            let mut state = self.state.lock();
            if let Some(engine) = state.engine.take() {
                if let Err(err) = engine.destroy() {
                    debug!("engine destroy skipped: {err}");
                }
            }
            if self.service.send(ServiceRequest::Unbind).is_err() {
                warn!("unbind failed: {}", RemoteError::NotBound);
            }
            state.phase = Phase::Disconnected;
            state.engine_visible = false;
            state.engine_ready = false;
        }
        if let Some(on_disconnected) = &self.listener.on_disconnected {
            on_disconnected();
        }
    }

    /// Records the desired visibility and pushes it to the remote only when
    /// it differs from the last pushed value. Callable before an engine is
    /// attached; the value is applied at attach time.
    pub fn set_visibility(&self, visible: bool) {
        let mut state = self.state.lock();
        state.desired_visible = visible;
        let Some(engine) = &state.engine else {
            return;
        };
        if state.engine_visible == visible {
            return;
        }
        if let Err(err) = engine.set_visibility(visible) {
            warn!("visibility push failed: {err}");
        }
        state.engine_visible = visible;
    }

    pub fn set_home_image_wallpaper_blur(&self, blur: bool) {
        if let Some(host) = &self.host {
            host.set_home_image_wallpaper_blur(blur);
        }
    }

    pub fn engine(&self) -> Option<EngineHandle> { self.state.lock().engine.clone() }

    pub fn is_engine_ready(&self) -> bool { self.state.lock().engine_ready }

    /// Disconnects and releases the surface host root.
    pub fn clean_up(&self) {
        self.disconnect();
        if let Some(host) = &self.host {
            host.release();
        }
    }

    /// Drains remote events onto the calling (UI) thread. Run this inside
    /// the UI executor; it ends when the connection's event channel closes.
    pub async fn run(self: Arc<Self>, mut events: Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
    }

    /// UI-thread entry point for one remote event.
    pub fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::EngineAttached { engine } => self.on_engine_attached(engine),
            ConnectionEvent::ColorsChanged { colors, display_id } => {
                if let Some(on_colors_changed) = &self.listener.on_colors_changed {
                    on_colors_changed(colors, display_id);
                }
            }
            ConnectionEvent::EngineShown => self.on_engine_shown(),
            ConnectionEvent::RemoteDied => {
                warn!("render service process died");
                self.disconnect();
            }
        }
    }

    fn on_engine_attached(&self, engine: EngineHandle) {
        let mut state = self.state.lock();
        if state.phase == Phase::Disconnected {
            // Attach raced a local teardown. Destroy the late handle so the
            // remote does not keep a live engine nobody references.
            debug!("destroying engine attached after disconnect");
            if let Err(err) = engine.destroy() {
                debug!("late engine already gone: {err}");
            }
            return;
        }
        state.phase = Phase::Connected;
        if state.desired_visible {
            if let Err(err) = engine.set_visibility(true) {
                warn!("deferred visibility push failed: {err}");
            }
            state.engine_visible = true;
        }
        // Some engines never push colors on their own; ask explicitly.
        if let Err(err) = engine.request_colors() {
            warn!("color refresh request failed: {err}");
        }
        debug!(display_id = engine.display_id(), "engine attached");
        state.engine = Some(engine);
    }

    fn on_engine_shown(&self) {
        let engine_surface = {
            let mut state = self.state.lock();
            if state.engine_ready {
                // The remote may re-signal shown without the surface
                // changing; the first transition did the mirroring.
                return;
            }
            state.engine_ready = true;
            state.engine.as_ref().map(|engine| engine.surface().clone())
        };
        if let (Some(host), Some(surface)) = (&self.host, engine_surface) {
            host.reparent_wallpaper_surface(&surface);
        }
        if let Some(on_engine_shown) = &self.listener.on_engine_shown {
            on_engine_shown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actor::{self, surface_host::tests::test_host};
    use crate::sys::geometry::Rect;
    use crate::sys::surface::Compositor;

    struct Counters {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
        shown: AtomicUsize,
        colors: AtomicUsize,
    }

    impl Counters {
        fn new() -> Arc<Counters> {
            Arc::new(Counters {
                connected: AtomicUsize::new(0),
                disconnected: AtomicUsize::new(0),
                shown: AtomicUsize::new(0),
                colors: AtomicUsize::new(0),
            })
        }

        fn listener(self: &Arc<Self>) -> ConnectionListener {
            let (a, b, c, d) = (self.clone(), self.clone(), self.clone(), self.clone());
            ConnectionListener {
                on_connected: Some(Box::new(move || {
                    a.connected.fetch_add(1, Ordering::SeqCst);
                })),
                on_disconnected: Some(Box::new(move || {
                    b.disconnected.fetch_add(1, Ordering::SeqCst);
                })),
                on_engine_shown: Some(Box::new(move || {
                    c.shown.fetch_add(1, Ordering::SeqCst);
                })),
                on_colors_changed: Some(Box::new(move |_, _| {
                    d.colors.fetch_add(1, Ordering::SeqCst);
                })),
            }
        }
    }

    fn test_engine(compositor: &Compositor) -> (EngineHandle, actor::Receiver<EngineCommand>) {
        let (tx, rx) = actor::channel();
        let surface = compositor.create_surface("engine", Rect::new(0, 0, 1080, 2400));
        (EngineHandle::new(tx, surface, 0), rx)
    }

    fn drain(rx: &mut actor::Receiver<EngineCommand>) -> Vec<EngineCommand> {
        let mut out = vec![];
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn connect_is_idempotent() {
        let (service_tx, mut service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);

        assert!(conn.connect());
        assert!(conn.connect());

        assert!(matches!(service_rx.try_recv(), Ok(ServiceRequest::Bind { .. })));
        assert!(service_rx.try_recv().is_err(), "second connect must not rebind");
        assert_eq!(counters.connected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connect_without_live_preview_never_binds() {
        let (service_tx, mut service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), false);

        assert!(!conn.connect());
        assert!(service_rx.try_recv().is_err());
        assert_eq!(counters.connected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn late_attach_after_disconnect_destroys_engine() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);
        let compositor = Compositor::new();
        let (engine, mut commands) = test_engine(&compositor);

        assert!(conn.connect());
        conn.disconnect();
        conn.handle_event(ConnectionEvent::EngineAttached { engine });

        assert_eq!(drain(&mut commands), vec![EngineCommand::Destroy]);
        assert!(conn.engine().is_none());
    }

    #[test]
    fn visibility_pushes_are_deduplicated() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);
        let compositor = Compositor::new();
        let (engine, mut commands) = test_engine(&compositor);

        assert!(conn.connect());
        conn.handle_event(ConnectionEvent::EngineAttached { engine });
        drain(&mut commands); // attach-time color refresh

        conn.set_visibility(true);
        conn.set_visibility(true);
        assert_eq!(drain(&mut commands), vec![EngineCommand::SetVisibility(true)]);

        conn.set_visibility(false);
        assert_eq!(drain(&mut commands), vec![EngineCommand::SetVisibility(false)]);
    }

    #[test]
    fn visibility_before_attach_is_deferred() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);
        let compositor = Compositor::new();
        let (engine, mut commands) = test_engine(&compositor);

        assert!(conn.connect());
        conn.set_visibility(true);
        assert_eq!(drain(&mut commands), vec![]);

        conn.handle_event(ConnectionEvent::EngineAttached { engine });
        let cmds = drain(&mut commands);
        assert!(cmds.contains(&EngineCommand::SetVisibility(true)));
        assert!(cmds.contains(&EngineCommand::RequestColors));
    }

    #[test]
    fn attach_requests_color_refresh() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);
        let compositor = Compositor::new();
        let (engine, mut commands) = test_engine(&compositor);

        assert!(conn.connect());
        conn.handle_event(ConnectionEvent::EngineAttached { engine });
        assert_eq!(drain(&mut commands), vec![EngineCommand::RequestColors]);
    }

    #[test]
    fn disconnect_without_bind_still_notifies() {
        let (service_tx, service_rx) = actor::channel();
        drop(service_rx); // service already gone
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);

        conn.disconnect();
        assert_eq!(counters.disconnected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_shown_reparents_exactly_once() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let compositor = Compositor::new();
        let (host, parent) = test_host(&compositor);
        host.surface_created();
        let (conn, _events) = WallpaperConnection::new(
            service_tx,
            Some(host.clone()),
            counters.listener(),
            true,
        );
        let (engine, _commands) = test_engine(&compositor);
        let engine_surface = engine.surface().clone();

        assert!(conn.connect());
        conn.handle_event(ConnectionEvent::EngineAttached { engine });
        let seq_before = compositor.commit_seq();
        conn.handle_event(ConnectionEvent::EngineShown);
        conn.handle_event(ConnectionEvent::EngineShown);

        assert_eq!(compositor.commit_seq(), seq_before + 1);
        assert_eq!(counters.shown.load(Ordering::SeqCst), 1);
        assert!(conn.is_engine_ready());

        let mirror = host.mirror_surface().expect("mirror attached");
        assert_eq!(compositor.mirror_source(mirror), Some(engine_surface.id()));
        assert_eq!(compositor.parent(mirror), Some(parent.id()));
        assert!(compositor.is_visible(mirror));
    }

    #[test]
    fn colors_changed_reaches_listener() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);

        conn.handle_event(ConnectionEvent::ColorsChanged {
            colors: WallpaperColors {
                primary: Color::rgb(1, 2, 3),
                secondary: None,
                tertiary: None,
            },
            display_id: 0,
        });
        assert_eq!(counters.colors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_death_tears_down_through_disconnect() {
        let (service_tx, _service_rx) = actor::channel();
        let counters = Counters::new();
        let (conn, _events) =
            WallpaperConnection::new(service_tx, None, counters.listener(), true);
        let compositor = Compositor::new();
        let (engine, _commands) = test_engine(&compositor);

        assert!(conn.connect());
        conn.handle_event(ConnectionEvent::EngineAttached { engine });
        conn.handle_event(ConnectionEvent::RemoteDied);

        assert!(conn.engine().is_none());
        assert!(!conn.is_engine_ready());
        assert_eq!(counters.disconnected.load(Ordering::SeqCst), 1);
    }
}
