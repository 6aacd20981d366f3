// corebridge — Firmware Entry Point
//
// Brings up both cores of the board as two threads joined by a mailbox:
//   1. Bind the board's devices (BMI160 over I2C on target, a simulated
//      board on a development host).
//   2. Start the compute core: inbound queue, dispatcher, trigger and
//      polling work.
//   3. Start the host core: sensor/classifier bring-up, then event logging.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use corebridge::config::*;
use corebridge::drivers::DeviceBinder;
use corebridge::ipm::{Loopback, Mailbox};
use corebridge::pme::SoftClassifier;
use corebridge::tasks::compute::{compute_task, ComputeCore};
use corebridge::tasks::host::{host_task, HostCore};

// ---------------------------------------------------------------------------
// Board bring-up
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
fn board() -> anyhow::Result<Box<dyn DeviceBinder>> {
    use std::sync::Mutex;

    use corebridge::drivers::imu::Board;
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let peripherals = Peripherals::take()?;
    let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio6, // SDA
        peripherals.pins.gpio7, // SCL
        &i2c_config,
    )?;
    // The bus lives for the whole programme; firmware never exits.
    let bus: &'static Mutex<I2cDriver<'static>> = Box::leak(Box::new(Mutex::new(i2c)));
    Ok(Box::new(Board::new(bus)))
}

#[cfg(not(target_os = "espidf"))]
fn board() -> anyhow::Result<Box<dyn DeviceBinder>> {
    use corebridge::drivers::sim::SimBoard;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::warn!("No board attached, running against the simulated board");
    Ok(Box::new(SimBoard::new()))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------
fn main() -> anyhow::Result<()> {
    let binder = board()?;
    log::info!("corebridge firmware starting…");

    // ---- Mailbox between the cores ----------------------------------------
    let (host_end, compute_end) = Loopback::pair("host", "compute");
    let host_end: Arc<dyn Mailbox> = Arc::new(host_end);
    let compute_end: Arc<dyn Mailbox> = Arc::new(compute_end);

    let (event_tx, event_rx) = mpsc::channel();
    let shutdown = Arc::new(AtomicBool::new(false));

    // ---- Compute core -----------------------------------------------------
    let compute = ComputeCore::new(
        &CoreConfig::default(),
        compute_end,
        corebridge::drivers::Devices::new(binder),
        Box::new(SoftClassifier::new()),
    );
    // Listen before the host sends its first request.
    compute.attach();
    let compute_shutdown = Arc::clone(&shutdown);
    thread::Builder::new()
        .name("compute".into())
        .stack_size(STACK_COMPUTE)
        .spawn(move || compute_task(compute, compute_shutdown))?;

    // ---- Host core --------------------------------------------------------
    let host = HostCore::attach(host_end, event_tx);
    thread::Builder::new()
        .name("host".into())
        .stack_size(STACK_HOST)
        .spawn(move || host_task(host, event_rx))?;

    // Main thread has nothing left to do; all work happens in the two tasks.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
