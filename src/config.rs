// corebridge — Protocol & System Configuration
// Target: dual-core sensor board (compute core + host core over a mailbox)

use std::time::Duration;

use crate::ipm::message::ChannelId;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------
pub const TICKS_PER_SECOND: u32 = 100;   // 10 ms scheduler tick
pub const TICK_DURATION: Duration = Duration::from_millis(1000 / TICKS_PER_SECOND as u64);
pub const SLEEP_TICKS: u32 = 1;          // worker sleeps one tick between passes

// ---------------------------------------------------------------------------
// Inbound message queue
// ---------------------------------------------------------------------------
pub const QUEUE_SIZE: usize = 10;        // max incoming messages held at once

// ---------------------------------------------------------------------------
// Synchronous calls (host core)
// ---------------------------------------------------------------------------
pub const IPM_TIMEOUT_TICKS: u32 = 5000;
pub const DEFAULT_SAMPLING_FREQ: u32 = 100; // Hz, used by `sensor start`

// ---------------------------------------------------------------------------
// Analog I/O
// ---------------------------------------------------------------------------
pub const AIO_PIN_MIN: u32 = 9;
pub const AIO_PIN_MAX: u32 = 14;
pub const AIO_PIN_COUNT: usize = (AIO_PIN_MAX - AIO_PIN_MIN + 1) as usize; // 6
pub const AIO_UPDATE_INTERVAL: u32 = 200; // ticks between subscription updates (2 s)
pub const ADC_DEVICE_NAME: &str = "ADC_0";

/// Slot of an analog pin in per-pin tables, `None` outside 9..=14.
pub fn aio_pin_index(pin: u32) -> Option<usize> {
    (AIO_PIN_MIN..=AIO_PIN_MAX)
        .contains(&pin)
        .then(|| (pin - AIO_PIN_MIN) as usize)
}

// ---------------------------------------------------------------------------
// I2C
// ---------------------------------------------------------------------------
pub const MAX_I2C_BUS: usize = 2;
pub const MAX_I2C_TRANSFER: usize = 256; // bytes per read/write request
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks
pub const I2C_BAUDRATE_KHZ: u32 = 400;

// ---------------------------------------------------------------------------
// Character LCD
// ---------------------------------------------------------------------------
pub const LCD_MAX_TEXT: usize = 255; // 256-byte print buffer incl. terminator
pub const LCD_DEVICE_NAME: &str = "GROVE_LCD";

// ---------------------------------------------------------------------------
// IMU (BMI160) & sensor polling
// ---------------------------------------------------------------------------
pub const IMU_DEVICE_NAME: &str = "bmi160";
pub const I2C_ADDR_BMI160: u8 = 0x68;
pub const DEFAULT_POLL_FREQ: u32 = 20;        // Hz, temperature / light gate
pub const ACCEL_FULL_SCALE_G: i32 = 16;
pub const STANDARD_GRAVITY: f64 = 9.80665;
pub const ACCEL_DELTA_THRESHOLD: f64 = 0.980665; // 0.1 g in m/s²
pub const ACCEL_SLOPE_DURATION: i32 = 2;          // consecutive samples
pub const TRIGGER_STOP_MAX_ATTEMPTS: u32 = 50;

// ---------------------------------------------------------------------------
// Pattern classifier / sample pipeline
// ---------------------------------------------------------------------------
pub const SAMPLE_BUFFER_SIZE: usize = 2048;
pub const VECTOR_SIZE: usize = 128;
pub const VALUES_PER_SAMPLE: usize = 3; // X, Y, Z
pub const SAMPLES_PER_VECTOR: usize = VECTOR_SIZE / VALUES_PER_SAMPLE; // 42
pub const NO_MATCH_CATEGORY: u16 = 0x7FFF;
pub const PME_MAX_INFLUENCE: u16 = 0x4000;
pub const PME_MIN_INFLUENCE: u16 = 2;
pub const PME_GLOBAL_CONTEXT: u8 = 1;
pub const PME_NEURON_COUNT: usize = 128;

// ---------------------------------------------------------------------------
// Task stack sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_COMPUTE: usize = 8192;
pub const STACK_HOST: usize = 8192;
pub const STACK_DRDY: usize = 4096;

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Bounded retry used to tear down hardware triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: TRIGGER_STOP_MAX_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

/// Compute-core settings fixed at construction time.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Channels that get a handler; anything else is answered `NOT_SUPPORTED`.
    pub channels: Vec<ChannelId>,
    pub ticks_per_second: u32,
    pub aio_update_interval: u32,
    pub trigger_stop: RetryPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelId::Aio,
                ChannelId::I2c,
                ChannelId::Lcd,
                ChannelId::Sensor,
                ChannelId::Classifier,
            ],
            ticks_per_second: TICKS_PER_SECOND,
            aio_update_interval: AIO_UPDATE_INTERVAL,
            trigger_stop: RetryPolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Configuration with only the listed channels registered.
    pub fn with_channels(channels: &[ChannelId]) -> Self {
        Self {
            channels: channels.to_vec(),
            ..Self::default()
        }
    }

    pub fn has_channel(&self, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }
}
