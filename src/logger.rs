use crate::event::{InputEvent, InputKind};
use crate::eventbus::InputListener;
use tracing::{debug, info};

/// Listener that logs every change event through `tracing`.
///
/// Button and axis changes go to `debug`, disconnects to `info`.
#[derive(Debug, Default)]
pub struct TracingListener;

impl TracingListener {
    pub fn new() -> Self {
        TracingListener
    }
}

impl InputListener for TracingListener {
    fn on_input(&mut self, event: &InputEvent) {
        match &event.kind {
            InputKind::Disconnected => info!(device = %event.device_id, "controller disconnected"),
            kind => debug!(device = %event.device_id, ?kind, "input"),
        }
    }
}
