//! Channel plumbing shared by the actors. Every cross-thread boundary in the
//! crate speaks through these newtypes so send failures surface as results
//! the caller can degrade to a logged no-op.

use thiserror::Error;
use tokio::sync::mpsc;

pub mod connection;
pub mod package_watch;
pub mod render_service;
pub mod surface_host;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("channel closed")]
pub struct SendError;

#[derive(Debug)]
pub struct Sender<T>(mpsc::UnboundedSender<T>);

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self { Sender(self.0.clone()) }
}

impl<T> Sender<T> {
    pub fn send(&self, value: T) -> Result<(), SendError> {
        self.0.send(value).map_err(|_| SendError)
    }

    pub fn is_closed(&self) -> bool { self.0.is_closed() }
}

pub type Receiver<T> = mpsc::UnboundedReceiver<T>;

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sender(tx), rx)
}
