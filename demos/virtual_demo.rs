use padlink::backends::virtual_input::{VirtualDevice, VirtualHost};
use padlink::{EventFilter, GamepadContext, TracingListener};
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let host = Arc::new(VirtualHost::new());
    let pad = VirtualDevice::xbox_one("demo");
    host.attach(pad.clone());

    let ctx = GamepadContext::new(host.clone()).expect("build context");
    ctx.subscribe(TracingListener::new(), EventFilter::All, None);
    ctx.refresh().expect("refresh");

    // A pressed, D-pad right.
    pad.push_report(&[0x20, 0x00, 0x01, 0x0e, 0b0001_0000, 0b0000_0010, 0, 0, 0, 0]);
    // Everything released.
    pad.push_report(&[0x20, 0x00, 0x02, 0x0e, 0, 0, 0, 0, 0, 0]);

    for snap in ctx.list_controllers().iter() {
        println!(
            "{} [{}] connected={} axes={:?}",
            snap.id, snap.vendor_name, snap.connected, snap.axes
        );
    }

    host.detach(&pad.id());
    ctx.on_detach(&pad.id());
    ctx.refresh().expect("refresh");
    println!("tracked after unplug: {}", ctx.list_controllers().len());
}
