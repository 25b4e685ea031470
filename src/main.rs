//! Runs a simulated board on a thread and drives it from a host hub over an
//! in-process pipe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use serial_rpc::config::{DEFAULT_SEQUENCE_CAPACITY, FIRMWARE_NAME, HubConfig, VERSION_METHOD};
use serial_rpc::loopback::{Duplex, duplex};
use serial_rpc::{
    ChannelProp, Clock, DetectionStatus, DeviceError, DispatchError, Dispatcher, Hub,
    PlaybackTimer, Responder, SequenceProp, Slip, SystemClock,
};

const PLAYBACK_INTERVAL_MS: u64 = 10;

struct Board {
    foo: SequenceProp<i64, DEFAULT_SEQUENCE_CAPACITY>,
    bar: ChannelProp<f64, DEFAULT_SEQUENCE_CAPACITY, 2>,
}

fn methods() -> Result<Dispatcher<Board>, DispatchError> {
    let mut methods = Dispatcher::new();
    methods.bind(VERSION_METHOD, |_: &mut Board, ()| Ok((FIRMWARE_NAME, 2)))?;
    methods.bind_sequence("foo", |b: &mut Board| &mut b.foo)?;
    methods.bind_channels("bar", |b: &mut Board| &mut b.bar)?;
    Ok(methods)
}

fn firmware(port: Duplex, running: Arc<AtomicBool>) {
    let methods = match methods() {
        Ok(m) => m,
        Err(e) => {
            error!("firmware setup failed: {}", e);
            return;
        }
    };

    let mut board = Board {
        foo: SequenceProp::new(0),
        bar: ChannelProp::new(0.0),
    };
    let clock = SystemClock::new();
    let mut timer = PlaybackTimer::new(PLAYBACK_INTERVAL_MS, clock.now_ms());
    let mut responder = Responder::new(port, Slip::STANDARD, methods);

    while running.load(Ordering::Relaxed) {
        match responder.poll(&mut board) {
            Ok(true) => {}
            Ok(false) => thread::sleep(Duration::from_millis(1)),
            Err(e) => error!("firmware: {} ({})", e, e.code()),
        }
        if timer.due(clock.now_ms()) {
            board.foo.tick();
            board.bar.tick();
        }
    }
}

fn host(port: Duplex) -> Result<(), DeviceError> {
    let config = HubConfig {
        startup_delay: Duration::ZERO,
        answer_timeout: Duration::from_millis(500),
        ..HubConfig::default()
    };
    let hub = Hub::new(port, Slip::STANDARD, config);
    for (key, value) in hub.serial_settings().pairs() {
        debug!("serial {} = {}", key, value);
    }
    if hub.detect() != DetectionStatus::CanCommunicate {
        return Err(DeviceError::PortTimeout);
    }
    let version = hub.initialize()?;
    info!("connected to {} v{}", FIRMWARE_NAME, version);

    let foo = hub.prop::<i64>("foo");
    foo.set(&42)?;
    info!("foo = {}", foo.get()?);

    let values: Vec<i64> = (1..=12).collect();
    foo.load_sequence(&values)?;
    info!("foo holds {} of {} values", foo.size()?, foo.max_size()?);
    foo.start()?;
    thread::sleep(Duration::from_millis(5 * PLAYBACK_INTERVAL_MS));
    foo.stop()?;
    info!("foo stopped at {}", foo.get()?);

    for (channel, base) in [(0, 1.0), (1, -1.0)] {
        let bar = hub.channel_prop::<f64>("bar", channel);
        bar.set(&base)?;
        bar.load_sequence(&[base * 0.5, base * 0.25])?;
        info!("bar[{}] = {} with {} queued", channel, bar.get()?, bar.size()?);
    }
    match hub.channel_prop::<f64>("bar", 2).get() {
        Err(e) => info!("bar[2]: {} ({})", e, e.code()),
        Ok(v) => info!("bar[2] = {}", v),
    }

    hub.shutdown();
    Ok(())
}

fn main() {
    env_logger::init();

    let (host_port, board_port) = duplex();
    let running = Arc::new(AtomicBool::new(true));
    let board = thread::spawn({
        let running = running.clone();
        move || firmware(board_port, running)
    });

    if let Err(e) = host(host_port) {
        error!("host: {} ({})", e, e.code());
    }

    running.store(false, Ordering::Relaxed);
    let _ = board.join();
}
