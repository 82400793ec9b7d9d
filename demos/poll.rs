use padlink::backends::usb::RawUsbHost;
use padlink::event::ChannelKind;
use padlink::{
    EventFilter, GamepadConfig, GamepadContext, InputEvent, InputKind, InputListener, UsbHost,
};
use std::sync::Arc;
use std::time::Duration;

/// Prints every change on one line.
struct Printer;

impl InputListener for Printer {
    fn on_input(&mut self, event: &InputEvent) {
        match event.kind {
            InputKind::AxisMoved { axis, value } => {
                println!("{}: A{axis}={value:.1}", event.device_id)
            }
            InputKind::ButtonPressed { button } => println!("{}: +{button}", event.device_id),
            InputKind::ButtonReleased { button } => println!("{}: -{button}", event.device_id),
            InputKind::Disconnected => println!("{}: disconnected", event.device_id),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "padlink=info".into()),
        )
        .init();

    // poll [--hid] [config.toml]
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let use_hid = args.iter().any(|a| a == "--hid");
    args.retain(|a| a != "--hid");
    let config = match args.first() {
        Some(path) => GamepadConfig::load(path).expect("load config"),
        None => GamepadConfig::default(),
    };

    let host: Arc<dyn UsbHost> = if use_hid {
        hid_host(&config)
    } else {
        Arc::new(RawUsbHost::new(config.usb.clone()).expect("init usb"))
    };
    let ctx = GamepadContext::from_config(config, host).expect("build context");
    ctx.subscribe(Printer, EventFilter::All, None);

    let report = ctx.refresh().expect("enumerate devices");
    println!("Opened {} controller(s)", report.opened.len());
    for session in ctx.directory().all() {
        println!("== {} ({}) ==", session.vendor_name(), session.id());
        for ch in session.describe() {
            if ch.kind == ChannelKind::Axis {
                println!("  axis #{} {:?}", ch.idx, ch.name);
            }
        }
    }

    // Reports arrive on the reader threads; this loop only picks up hotplug.
    loop {
        std::thread::sleep(Duration::from_secs(1));
        if let Err(e) = ctx.refresh() {
            eprintln!("refresh failed: {e}");
        }
    }
}

#[cfg(feature = "hid")]
fn hid_host(config: &GamepadConfig) -> Arc<dyn UsbHost> {
    let host = padlink::backends::hid::HidHost::new(config.hid.clone()).expect("init hidapi");
    Arc::new(host)
}

#[cfg(not(feature = "hid"))]
fn hid_host(_config: &GamepadConfig) -> Arc<dyn UsbHost> {
    panic!("--hid needs the `hid` feature");
}
