//! Fan-out of input deltas to subscribers.
//!
//! The bus locks its subscription table only long enough to pick the listeners for
//! a batch. Listeners run after that lock is released, each behind its own mutex, so
//! a listener may call back into the context (list controllers, subscribe,
//! unsubscribe) from `on_input`.

use crate::event::{InputEvent, InputKind};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bus shared between the context and every session it opens.
pub type SharedEventBus = Arc<InputEventBus>;

/// Trait for reacting to change events from any session.
///
/// Called on the transport thread that delivered the report, so keep it short.
pub trait InputListener: Send {
    fn on_input(&mut self, event: &InputEvent);
}

/// Determines which kinds of events a listener wants to receive.
#[derive(Debug, Clone, Copy)]
pub enum EventFilter {
    All,
    AxisOnly,
    ButtonsOnly,
    Custom(fn(&InputEvent) -> bool),
}

impl EventFilter {
    fn passes(&self, event: &InputEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::AxisOnly => matches!(event.kind, InputKind::AxisMoved { .. }),
            EventFilter::ButtonsOnly => matches!(
                event.kind,
                InputKind::ButtonPressed { .. } | InputKind::ButtonReleased { .. }
            ),
            EventFilter::Custom(f) => f(event),
        }
    }
}

type ListenerCell = Arc<Mutex<dyn InputListener>>;

/// Which events reach a subscriber.
#[derive(Clone, Debug)]
struct Route {
    filter: EventFilter,
    /// Only events from this device id, when set.
    device: Option<String>,
}

impl Route {
    fn accepts(&self, event: &InputEvent) -> bool {
        let device_ok = self
            .device
            .as_deref()
            .map_or(true, |id| id == event.device_id);
        device_ok && self.filter.passes(event)
    }
}

struct Subscription {
    listener: ListenerCell,
    enabled: bool,
    route: Route,
}

#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    by_id: BTreeMap<u64, Subscription>,
}

/// Subscription table plus delivery. Listeners are called in subscription order.
#[derive(Default)]
pub struct InputEventBus {
    subs: Mutex<Subscriptions>,
}

impl InputEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subs(&self) -> MutexGuard<'_, Subscriptions> {
        self.subs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `listener`. `device` pins it to one device id. Returns the subscription id.
    pub fn subscribe(
        &self,
        listener: impl InputListener + 'static,
        filter: EventFilter,
        device: Option<String>,
    ) -> u64 {
        let listener: ListenerCell = Arc::new(Mutex::new(listener));
        let mut subs = self.subs();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.by_id.insert(
            id,
            Subscription {
                listener,
                enabled: true,
                route: Route { filter, device },
            },
        );
        id
    }

    /// Mute or unmute a subscription. `false` if `id` is unknown.
    pub fn set_enabled(&self, id: u64, enabled: bool) -> bool {
        match self.subs().by_id.get_mut(&id) {
            Some(sub) => {
                sub.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subs().by_id.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subs().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs().by_id.is_empty()
    }

    /// Deliver a batch, in order. Changes made to the table while the batch is
    /// being delivered apply from the next batch on.
    pub fn publish(&self, events: &[InputEvent]) {
        if events.is_empty() {
            return;
        }
        let targets: Vec<(ListenerCell, Route)> = self
            .subs()
            .by_id
            .values()
            .filter(|s| s.enabled)
            .map(|s| (s.listener.clone(), s.route.clone()))
            .collect();

        for event in events {
            for (listener, route) in &targets {
                if route.accepts(event) {
                    listener
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .on_input(event);
                }
            }
        }
    }
}

impl std::fmt::Debug for InputEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputEventBus")
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<InputKind>>>);

    impl InputListener for Collect {
        fn on_input(&mut self, event: &InputEvent) {
            self.0.lock().unwrap().push(event.kind.clone());
        }
    }

    fn batch() -> Vec<InputEvent> {
        vec![
            InputEvent::now("pad-a", InputKind::ButtonPressed { button: 0 }),
            InputEvent::now("pad-a", InputKind::AxisMoved { axis: 5, value: 1.0 }),
            InputEvent::now("pad-b", InputKind::ButtonReleased { button: 3 }),
            InputEvent::now("pad-b", InputKind::Disconnected),
        ]
    }

    #[test]
    fn filters_by_kind() {
        let bus = InputEventBus::new();
        let axes = Collect::default();
        let buttons = Collect::default();
        bus.subscribe(axes.clone(), EventFilter::AxisOnly, None);
        bus.subscribe(buttons.clone(), EventFilter::ButtonsOnly, None);

        bus.publish(&batch());

        assert_eq!(
            *axes.0.lock().unwrap(),
            [InputKind::AxisMoved { axis: 5, value: 1.0 }]
        );
        assert_eq!(
            *buttons.0.lock().unwrap(),
            [
                InputKind::ButtonPressed { button: 0 },
                InputKind::ButtonReleased { button: 3 }
            ]
        );
    }

    #[test]
    fn device_pin() {
        let bus = InputEventBus::new();
        let seen = Collect::default();
        bus.subscribe(seen.clone(), EventFilter::All, Some("pad-b".into()));

        bus.publish(&batch());

        assert_eq!(
            *seen.0.lock().unwrap(),
            [
                InputKind::ButtonReleased { button: 3 },
                InputKind::Disconnected
            ]
        );
    }

    #[test]
    fn mute_and_unsubscribe() {
        let bus = InputEventBus::new();
        let seen = Collect::default();
        let id = bus.subscribe(seen.clone(), EventFilter::All, None);

        assert!(bus.set_enabled(id, false));
        bus.publish(&batch());
        assert!(seen.0.lock().unwrap().is_empty());

        bus.set_enabled(id, true);
        bus.publish(&batch()[..1]);
        assert_eq!(seen.0.lock().unwrap().len(), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(!bus.set_enabled(id, true));
        assert!(bus.is_empty());
    }

    #[test]
    fn custom_filter() {
        fn only_disconnects(e: &InputEvent) -> bool {
            e.kind == InputKind::Disconnected
        }

        let bus = InputEventBus::new();
        let seen = Collect::default();
        bus.subscribe(seen.clone(), EventFilter::Custom(only_disconnects), None);
        bus.publish(&batch());
        assert_eq!(*seen.0.lock().unwrap(), [InputKind::Disconnected]);
    }

    /// Unsubscribes itself on the first disconnect it sees.
    struct OneShot {
        bus: Weak<InputEventBus>,
        id: Arc<Mutex<Option<u64>>>,
        seen: Collect,
    }

    impl InputListener for OneShot {
        fn on_input(&mut self, event: &InputEvent) {
            self.seen.on_input(event);
            if event.kind == InputKind::Disconnected {
                let id = self.id.lock().unwrap().take();
                if let (Some(bus), Some(id)) = (self.bus.upgrade(), id) {
                    assert!(bus.unsubscribe(id));
                }
            }
        }
    }

    #[test]
    fn listener_can_change_subscriptions_during_delivery() {
        let bus = Arc::new(InputEventBus::new());
        let seen = Collect::default();
        let slot = Arc::new(Mutex::new(None));
        let id = bus.subscribe(
            OneShot {
                bus: Arc::downgrade(&bus),
                id: slot.clone(),
                seen: seen.clone(),
            },
            EventFilter::All,
            None,
        );
        *slot.lock().unwrap() = Some(id);

        bus.publish(&batch());
        assert!(bus.is_empty());
        bus.publish(&batch());
        assert_eq!(seen.0.lock().unwrap().len(), 4);
    }
}
