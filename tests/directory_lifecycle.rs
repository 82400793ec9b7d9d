use padlink::backends::virtual_input::{VirtualDevice, VirtualHost};
use padlink::{
    DeadReason, EventFilter, GamepadConfig, GamepadContext, GamepadError, InputEvent, InputKind,
    InputListener, SessionPhase, TransportError,
};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

fn report(b4: u8, b5: u8) -> [u8; 10] {
    [0x20, 0x00, 0x01, 0x0e, b4, b5, 0, 0, 0, 0]
}

fn context() -> (Arc<VirtualHost>, GamepadContext) {
    let host = Arc::new(VirtualHost::new());
    let ctx = GamepadContext::new(host.clone()).unwrap();
    (host, ctx)
}

#[test]
fn refresh_twice_does_not_duplicate() {
    let (host, ctx) = context();
    host.attach(VirtualDevice::xbox_one("A"));
    host.attach(VirtualDevice::xbox_one("B"));

    assert_eq!(ctx.refresh().unwrap().opened.len(), 2);
    assert!(ctx.refresh().unwrap().is_unchanged());
    assert_eq!(ctx.list_controllers().len(), 2);
}

#[test]
fn unknown_devices_are_skipped() {
    let (host, ctx) = context();
    host.attach(VirtualDevice::new(0x1209, 0x0001, "hobby"));

    let report = ctx.refresh().unwrap();
    assert_eq!(report.unknown.len(), 1);
    assert!(ctx.list_controllers().is_empty());
}

#[test]
fn detach_then_refresh_evicts() {
    let (host, ctx) = context();
    let pad = VirtualDevice::xbox_one("A");
    host.attach(pad.clone());
    ctx.refresh().unwrap();

    host.detach(&pad.id());
    assert!(ctx.on_detach(&pad.id()));

    let listed = ctx.list_controllers();
    let snap = listed.get(pad.id().as_str()).unwrap();
    assert!(!snap.connected);
    assert_eq!(snap.phase, SessionPhase::Dead(DeadReason::Detached));

    let report = ctx.refresh().unwrap();
    assert_eq!(report.evicted, [pad.id()]);
    assert!(ctx.list_controllers().is_empty());
}

#[test]
fn reattach_creates_fresh_live_session() {
    let (host, ctx) = context();
    let pad = VirtualDevice::xbox_one("A");
    host.attach(pad.clone());
    ctx.refresh().unwrap();
    pad.push_report(&report(0b0001_0000, 0));
    let old = ctx.directory().get(&pad.id()).unwrap();

    host.detach(&pad.id());
    ctx.on_detach(&pad.id());
    ctx.refresh().unwrap();

    host.attach(pad.clone());
    let fresh = ctx.on_attach(pad.candidate()).unwrap();
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(fresh.phase(), SessionPhase::Active);
    assert!(fresh.is_connected());
    assert!(!fresh.state().button(0).unwrap().pressed);
    assert!(!old.is_connected());
}

#[test]
fn failed_acquisition_never_inserts() {
    let (host, ctx) = context();
    let pad = VirtualDevice::xbox_one("A")
        .with_kernel_driver(0)
        .failing_detach();
    host.attach(pad.clone());

    let report = ctx.refresh().unwrap();
    assert!(ctx.list_controllers().is_empty());
    assert!(matches!(
        &report.failed[..],
        [(_, GamepadError::ChannelAcquisitionFailed {
            source: TransportError::DetachKernelDriver { .. },
            ..
        })]
    ));
    assert!(matches!(
        ctx.on_attach(pad.candidate()),
        Err(GamepadError::ChannelAcquisitionFailed { .. })
    ));
    assert!(ctx.list_controllers().is_empty());
}

#[test]
fn fault_leaves_other_sessions_alone() {
    let (host, ctx) = context();
    let a = VirtualDevice::xbox_one("A");
    let b = VirtualDevice::xbox_one("B");
    host.attach(a.clone());
    host.attach(b.clone());
    ctx.refresh().unwrap();

    a.fault("babble");
    assert!(b.push_report(&report(0b0010_0000, 0)));

    let listed = ctx.list_controllers();
    let a_snap = listed.get(a.id().as_str()).unwrap();
    let b_snap = listed.get(b.id().as_str()).unwrap();
    assert_eq!(
        a_snap.phase,
        SessionPhase::Dead(DeadReason::Fault("babble".into()))
    );
    assert!(!a_snap.connected);
    assert!(b_snap.connected);
    assert!(b_snap.buttons[1].pressed);
}

#[test]
fn snapshot_reflects_decoded_reports() {
    let (host, ctx) = context();
    let pad = VirtualDevice::xbox_one("A");
    host.attach(pad.clone());
    ctx.refresh().unwrap();

    pad.push_report(&report(0b1000_1000, 0b0001_0101));
    let listed = ctx.list_controllers();
    let snap = listed.get(pad.id().as_str()).unwrap();

    assert_eq!(snap.vendor_name, "Microsoft Xbox One S Controller");
    assert_eq!(snap.buttons.len(), 10);
    assert_eq!(snap.axes.len(), 7);
    assert!(snap.buttons[3].pressed); // Y
    assert!(snap.buttons[6].pressed); // Menu
    assert!(snap.buttons[4].pressed); // LB
    assert_eq!(snap.axes[5], -1.0);
    assert_eq!(snap.axes[6], -1.0);
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(String, InputKind)>>>);

impl InputListener for Recorder {
    fn on_input(&mut self, event: &InputEvent) {
        self.0
            .lock()
            .unwrap()
            .push((event.device_id.clone(), event.kind.clone()));
    }
}

#[test]
fn subscribers_see_tagged_button_events() {
    let (host, ctx) = context();
    let a = VirtualDevice::xbox_one("A");
    let b = VirtualDevice::xbox_one("B");
    host.attach(a.clone());
    host.attach(b.clone());
    ctx.refresh().unwrap();

    let seen = Recorder::default();
    let id = ctx.subscribe(
        seen.clone(),
        EventFilter::ButtonsOnly,
        Some(a.id().to_string()),
    );

    a.push_report(&report(0b0001_0000, 0b10));
    b.push_report(&report(0b0001_0000, 0));
    a.push_report(&report(0, 0));
    ctx.unsubscribe(id);
    a.push_report(&report(0b0001_0000, 0));

    let a_id = a.id().to_string();
    assert_eq!(
        *seen.0.lock().unwrap(),
        [
            (a_id.clone(), InputKind::ButtonPressed { button: 0 }),
            (a_id, InputKind::ButtonReleased { button: 0 }),
        ]
    );
}

/// On `Disconnected`, records what `list_controllers` says about the device.
struct DirectoryReader {
    ctx: Weak<GamepadContext>,
    seen: Arc<Mutex<Vec<(String, Option<bool>)>>>,
}

impl InputListener for DirectoryReader {
    fn on_input(&mut self, event: &InputEvent) {
        if event.kind != InputKind::Disconnected {
            return;
        }
        let Some(ctx) = self.ctx.upgrade() else { return };
        let listed = ctx.list_controllers();
        let connected = listed.get(&event.device_id).map(|snap| snap.connected);
        self.seen
            .lock()
            .unwrap()
            .push((event.device_id.clone(), connected));
    }
}

#[test]
fn listeners_can_read_the_context_on_disconnect() {
    let (done_tx, done_rx) = mpsc::channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();

    // A listener that deadlocks would hang the test; run it on its own thread.
    std::thread::spawn(move || {
        let host = Arc::new(VirtualHost::new());
        let ctx = Arc::new(GamepadContext::new(host.clone()).unwrap());
        ctx.subscribe(
            DirectoryReader {
                ctx: Arc::downgrade(&ctx),
                seen: recorded,
            },
            EventFilter::All,
            None,
        );

        let a = VirtualDevice::xbox_one("A");
        let b = VirtualDevice::xbox_one("B");
        host.attach(a.clone());
        host.attach(b.clone());
        ctx.refresh().unwrap();

        // Detach keeps the dead session listed.
        assert!(ctx.on_detach(&a.id()));
        // Vanished sessions are already evicted when the event arrives.
        host.detach(&b.id());
        ctx.refresh().unwrap();
        done_tx.send(()).unwrap();
    });

    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("refresh thread did not finish");

    let a_id = VirtualDevice::xbox_one("A").id().to_string();
    let b_id = VirtualDevice::xbox_one("B").id().to_string();
    assert_eq!(
        *seen.lock().unwrap(),
        [(a_id, Some(false)), (b_id, None)]
    );
}

#[test]
fn context_from_config_loads_vendor_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("extra.toml"),
        r#"
        [[vendor]]
        vendor_id = 0x1209
        product_id = 0x0001
        name = "Hobby Pad"
        "#,
    )
    .unwrap();
    let config_path = dir.path().join("padlink.toml");
    std::fs::write(
        &config_path,
        "include_default_vendors = false\nvendor_files = [\"extra.toml\"]\n",
    )
    .unwrap();

    let host = Arc::new(VirtualHost::new());
    host.attach(VirtualDevice::new(0x1209, 0x0001, "H"));
    host.attach(VirtualDevice::xbox_one("X"));

    let config = GamepadConfig::load(&config_path).unwrap();
    let ctx = GamepadContext::from_config(config, host).unwrap();
    let report = ctx.refresh().unwrap();

    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.unknown.len(), 1);
    assert_eq!(ctx.list_controllers().0[0].vendor_name, "Hobby Pad");
}

#[test]
fn missing_vendor_file_is_an_error() {
    let config = GamepadConfig {
        vendor_files: vec!["/nonexistent/padlink-vendors.json".into()],
        ..GamepadConfig::default()
    };
    let err = GamepadContext::from_config(config, Arc::new(VirtualHost::new())).unwrap_err();
    assert!(matches!(err, GamepadError::Io(_)));
}
