//! Fuxi kubehub: list+watch reflector feeding a delta queue, a dispatcher
//! draining it into typed handlers, and the controller tying both together.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod controller;
mod dispatcher;
mod lister;
mod reflector;

pub use controller::{Controller, ControllerConfig};
pub use dispatcher::{Dispatcher, ResourceEventHandler};
pub use lister::{KubeListerWatcher, ListerWatcher, WatchStream, MAX_WATCH_TIMEOUT_SECS};
pub use reflector::{Reflector, ReflectorConfig};

/// Cooperative stop flag shared by a controller's loops.
///
/// Checked at loop boundaries only; in-flight list/watch or handler calls run
/// to completion.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl Default for RunFlag {
    fn default() -> Self { Self(Arc::new(AtomicBool::new(true))) }
}

impl RunFlag {
    pub fn new() -> Self { Self::default() }
    pub fn is_running(&self) -> bool { self.0.load(Ordering::Acquire) }
    pub fn stop(&self) { self.0.store(false, Ordering::Release); }
}
