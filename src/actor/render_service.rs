//! Reference implementation of the render-service side of the message
//! boundary. Out of process in the real system; the binary and the tests
//! bind against this in-process version, which keeps the boundary honest:
//! everything crosses the same typed channels.

use tracing::{debug, warn};

use crate::actor::connection::{
    ConnectionEvent, EngineCommand, EngineHandle, ServiceRequest, WallpaperColors,
};
use crate::actor::{self, Receiver, Sender};
use crate::sys::geometry::{Point, Rect};
use crate::sys::surface::{Compositor, SurfaceControl, Transaction};

pub struct RenderService {
    compositor: Compositor,
    colors: WallpaperColors,
    display_id: i32,
    engine_size: Point,
}

struct EngineSession {
    events: Sender<ConnectionEvent>,
    commands: Receiver<EngineCommand>,
    surface: SurfaceControl,
}

impl RenderService {
    pub fn new(
        compositor: Compositor,
        colors: WallpaperColors,
        display_id: i32,
        engine_size: Point,
    ) -> RenderService {
        RenderService { compositor, colors, display_id, engine_size }
    }

    /// Serves bind/unbind requests and engine commands until the request
    /// channel closes. One engine at a time; rebinding replaces it.
    pub async fn run(self, mut requests: Receiver<ServiceRequest>) {
        let mut session: Option<EngineSession> = None;
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    match request {
                        ServiceRequest::Bind { events } => {
                            if let Some(old) = session.take() {
                                warn!("bind while already bound; replacing engine");
                                self.compositor.release(&old.surface);
                            }
                            session = self.spawn_engine(events);
                        }
                        ServiceRequest::Unbind => {
                            if let Some(old) = session.take() {
                                debug!("engine destroyed on unbind");
                                self.compositor.release(&old.surface);
                            }
                        }
                    }
                }
                command = recv_command(&mut session) => {
                    self.handle_command(&mut session, command);
                }
            }
        }
        if let Some(old) = session.take() {
            self.compositor.release(&old.surface);
        }
    }

    fn spawn_engine(&self, events: Sender<ConnectionEvent>) -> Option<EngineSession> {
        let surface =
            self.compositor.create_surface("engine", Rect::from_size(self.engine_size));
        let (commands_tx, commands_rx) = actor::channel();
        let engine = EngineHandle::new(commands_tx, surface.clone(), self.display_id);
        if events.send(ConnectionEvent::EngineAttached { engine }).is_err() {
            debug!("picker gone before attach; dropping engine");
            self.compositor.release(&surface);
            return None;
        }
        // The reference engine renders its first frame immediately.
        _ = events.send(ConnectionEvent::EngineShown);
        Some(EngineSession { events, commands: commands_rx, surface })
    }

    fn handle_command(
        &self,
        session: &mut Option<EngineSession>,
        command: Option<EngineCommand>,
    ) {
        match command {
            Some(EngineCommand::SetVisibility(visible)) => {
                if let Some(s) = session.as_ref() {
                    let mut tx = Transaction::new();
                    tx.set_visibility(&s.surface, visible);
                    tx.commit(&self.compositor);
                }
            }
            Some(EngineCommand::RequestColors) => {
                if let Some(s) = session.as_ref() {
                    _ = s.events.send(ConnectionEvent::ColorsChanged {
                        colors: self.colors,
                        display_id: self.display_id,
                    });
                }
            }
            Some(EngineCommand::Destroy) | None => {
                // Destroy request, or every local handle dropped.
                if let Some(old) = session.take() {
                    debug!("engine destroyed");
                    self.compositor.release(&old.surface);
                }
            }
        }
    }
}

async fn recv_command(session: &mut Option<EngineSession>) -> Option<EngineCommand> {
    match session {
        Some(s) => s.commands.recv().await,
        None => std::future::pending().await,
    }
}
