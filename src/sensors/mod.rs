// corebridge — Trigger / Polling Manager
//
// Accelerometer and gyroscope run on hardware data-ready triggers;
// temperature and ambient light are polled at the sensor tick gate.
// Trigger handlers run in interrupt context and only raise a ready flag;
// the compute worker services the flags on its next tick.

pub mod light;
pub mod retry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::*;
use crate::drivers::{Devices, MotionSensor, SensorAttribute, SensorValue, TriggerHandler};
use crate::error::{DriverError, IpmError, Result};
use crate::ipm::message::{SensorChannel, SensorData, SensorReading};

pub use light::{lux_from_raw, LightPins};
pub use retry::retry_with_cap;

/// At-rest accelerometer reading when the board lies flat.
const ACCEL_CALIBRATION: [SensorValue; 3] = [
    SensorValue::new(0, 0),
    SensorValue::new(0, 0),
    SensorValue::new(9, 806_650),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Stopped,
    Running { frequency: u32 },
}

impl TriggerState {
    pub fn is_running(self) -> bool {
        matches!(self, TriggerState::Running { .. })
    }
}

// ---------------------------------------------------------------------------
// Interrupt-side ready flags
// ---------------------------------------------------------------------------
#[derive(Debug, Default)]
pub struct ReadyFlags {
    accel: AtomicBool,
    gyro: AtomicBool,
}

impl ReadyFlags {
    fn flag(&self, channel: SensorChannel) -> Option<&AtomicBool> {
        match channel {
            SensorChannel::AccelXyz => Some(&self.accel),
            SensorChannel::GyroXyz => Some(&self.gyro),
            _ => None,
        }
    }

    pub fn raise(&self, channel: SensorChannel) {
        if let Some(flag) = self.flag(channel) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Clear and return the flag.
    pub fn take(&self, channel: SensorChannel) -> bool {
        self.flag(channel)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }
}

// ---------------------------------------------------------------------------
// Change suppression
// ---------------------------------------------------------------------------

/// Accelerometer: report when any axis moved strictly more than 0.1 g.
pub fn accel_changed(last: &[f64; 3], now: &[f64; 3]) -> bool {
    last.iter()
        .zip(now)
        .any(|(a, b)| (b - a).abs() > ACCEL_DELTA_THRESHOLD)
}

/// Gyroscope: report on any exact difference.
pub fn xyz_changed(last: &[f64; 3], now: &[f64; 3]) -> bool {
    last != now
}

fn to_f64(values: [SensorValue; 3]) -> [f64; 3] {
    values.map(SensorValue::to_f64)
}

fn reading(channel: SensorChannel, controller: &str, reading: SensorReading) -> SensorData {
    SensorData {
        reading,
        ..SensorData::new(channel, controller)
    }
}

fn xyz([x, y, z]: [f64; 3]) -> SensorReading {
    SensorReading::Xyz { x, y, z }
}

/// Output of one trigger service pass.
#[derive(Debug, Default)]
pub struct Serviced {
    /// Reading-change events for the host.
    pub events: Vec<SensorData>,
    /// Integer parts of the accelerometer axes, for the sample pipeline.
    pub raw_accel: Vec<[u8; VALUES_PER_SAMPLE]>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------
pub struct SensorManager {
    accel: TriggerState,
    gyro: TriggerState,
    temp_polling: bool,
    poll_freq: u32,
    accel_last: [f64; 3],
    gyro_last: [f64; 3],
    temp_last: f64,
    light: LightPins,
    ready: Arc<ReadyFlags>,
    stop_policy: RetryPolicy,
    ticks_per_second: u32,
}

impl SensorManager {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            accel: TriggerState::Stopped,
            gyro: TriggerState::Stopped,
            temp_polling: false,
            poll_freq: DEFAULT_POLL_FREQ,
            accel_last: [0.0; 3],
            gyro_last: [0.0; 3],
            temp_last: 0.0,
            light: LightPins::default(),
            ready: Arc::new(ReadyFlags::default()),
            stop_policy: config.trigger_stop,
            ticks_per_second: config.ticks_per_second,
        }
    }

    pub fn state(&self, channel: SensorChannel) -> TriggerState {
        match channel {
            SensorChannel::AccelXyz => self.accel,
            SensorChannel::GyroXyz => self.gyro,
            SensorChannel::Temp if self.temp_polling => TriggerState::Running {
                frequency: self.poll_freq,
            },
            _ => TriggerState::Stopped,
        }
    }

    fn trigger_handler(&self) -> TriggerHandler {
        let ready = Arc::clone(&self.ready);
        Arc::new(move |channel| ready.raise(channel))
    }

    pub fn light(&mut self) -> &mut LightPins {
        &mut self.light
    }

    // ---- IMU lifecycle ----------------------------------------------------

    /// Bind the IMU (once) and run auto-calibration. Calibration failure is
    /// only logged; the device stays usable.
    pub fn init_imu(&mut self, devices: &mut Devices) -> Result<()> {
        if devices.motion.is_some() {
            return Ok(());
        }
        let Some(mut imu) = devices.binder().bind_motion(IMU_DEVICE_NAME) else {
            log::error!("failed to initialize {} sensor", IMU_DEVICE_NAME);
            return Err(IpmError::DeviceUnbound(IMU_DEVICE_NAME));
        };
        if let Err(e) = auto_calibration(imu.as_mut()) {
            log::error!("failed to perform auto calibration: {}", e);
        }
        log::info!("{} sensor initialized", IMU_DEVICE_NAME);
        devices.motion = Some(imu);
        Ok(())
    }

    pub fn start(
        &mut self,
        devices: &mut Devices,
        channel: SensorChannel,
        frequency: u32,
    ) -> Result<()> {
        let handler = self.trigger_handler();
        let imu = devices.motion()?;
        match channel {
            SensorChannel::AccelXyz => {
                if !self.accel.is_running() {
                    start_accel_trigger(imu, frequency, handler)?;
                    self.accel = TriggerState::Running { frequency };
                }
            }
            SensorChannel::GyroXyz => {
                if !self.gyro.is_running() {
                    start_gyro_trigger(imu, frequency, handler)?;
                    self.gyro = TriggerState::Running { frequency };
                }
            }
            SensorChannel::Temp => {
                if self.temp_polling {
                    return Err(IpmError::OperationFailed("temperature already polling".into()));
                }
                self.poll_freq = frequency;
                self.temp_polling = true;
            }
            SensorChannel::Light => {
                return Err(IpmError::InvalidParameter("light is not an IMU channel".into()))
            }
        }
        Ok(())
    }

    pub fn stop(&mut self, devices: &mut Devices, channel: SensorChannel) -> Result<()> {
        let imu = devices.motion()?;
        match channel {
            SensorChannel::AccelXyz | SensorChannel::GyroXyz => {
                if !self.state(channel).is_running() {
                    return Ok(());
                }
                let ((), attempts) =
                    retry_with_cap(&self.stop_policy, || imu.set_trigger(channel, None))
                        .inspect_err(|_| log::error!("failed to stop {:?} trigger", channel))?;
                if attempts > 1 {
                    log::warn!("{:?} trigger stopped after {} attempts", channel, attempts);
                }
                self.ready.take(channel);
                match channel {
                    SensorChannel::AccelXyz => self.accel = TriggerState::Stopped,
                    _ => self.gyro = TriggerState::Stopped,
                }
            }
            SensorChannel::Temp => {
                if !self.temp_polling {
                    return Err(IpmError::OperationFailed("temperature not polling".into()));
                }
                self.temp_polling = false;
            }
            SensorChannel::Light => {
                return Err(IpmError::InvalidParameter("light is not an IMU channel".into()))
            }
        }
        Ok(())
    }

    // ---- Worker-side processing -------------------------------------------

    /// Handle every trigger raised since the last tick.
    pub fn service_triggers(&mut self, devices: &mut Devices) -> Serviced {
        let mut out = Serviced::default();
        let Some(imu) = devices.motion.as_deref_mut() else {
            return out;
        };

        if self.ready.take(SensorChannel::AccelXyz) && self.accel.is_running() {
            match fetch_xyz(imu, SensorChannel::AccelXyz) {
                Ok(values) => {
                    let now = to_f64(values);
                    if accel_changed(&self.accel_last, &now) {
                        self.accel_last = now;
                        out.events.push(reading(SensorChannel::AccelXyz, IMU_DEVICE_NAME, xyz(now)));
                    }
                    out.raw_accel.push(values.map(|v| v.val1 as u8));
                }
                Err(e) => log::error!("failed to read accelerometer channels: {}", e),
            }
        }

        if self.ready.take(SensorChannel::GyroXyz) && self.gyro.is_running() {
            match fetch_xyz(imu, SensorChannel::GyroXyz) {
                Ok(values) => {
                    let now = to_f64(values);
                    if xyz_changed(&self.gyro_last, &now) {
                        self.gyro_last = now;
                        out.events.push(reading(SensorChannel::GyroXyz, IMU_DEVICE_NAME, xyz(now)));
                    }
                }
                Err(e) => log::error!("failed to read gyroscope channels: {}", e),
            }
        }
        out
    }

    /// Ticks between polls of temperature and light.
    pub fn poll_interval(&self) -> u32 {
        (self.ticks_per_second / self.poll_freq.max(1)).max(1)
    }

    /// Polled channels; does nothing off the poll gate.
    pub fn poll(&mut self, tick: u32, devices: &mut Devices) -> Vec<SensorData> {
        let mut events = Vec::new();
        if tick % self.poll_interval() != 0 {
            return events;
        }

        if self.temp_polling {
            if let Some(imu) = devices.motion.as_deref_mut() {
                match imu.sample_fetch().and_then(|()| imu.read_scalar(SensorChannel::Temp)) {
                    Ok(value) => {
                        let now = value.to_f64();
                        if now != self.temp_last {
                            self.temp_last = now;
                            events.push(reading(
                                SensorChannel::Temp,
                                IMU_DEVICE_NAME,
                                SensorReading::Scalar(now),
                            ));
                        }
                    }
                    Err(e) => log::error!("temperature read error: {}", e),
                }
            }
        }

        for sample in self.light.poll(devices) {
            let mut data = reading(
                SensorChannel::Light,
                ADC_DEVICE_NAME,
                SensorReading::Scalar(sample.lux),
            );
            data.pin = sample.pin;
            events.push(data);
        }
        events
    }
}

// ---------------------------------------------------------------------------
// Device programming
// ---------------------------------------------------------------------------
fn auto_calibration(imu: &mut dyn MotionSensor) -> core::result::Result<(), DriverError> {
    imu.set_attribute(
        SensorChannel::AccelXyz,
        SensorAttribute::CalibrationTarget(Some(ACCEL_CALIBRATION)),
    )?;
    // Gyro target is zero on every axis; the call only kicks off calibration.
    imu.set_attribute(SensorChannel::GyroXyz, SensorAttribute::CalibrationTarget(None))
}

fn start_accel_trigger(
    imu: &mut dyn MotionSensor,
    frequency: u32,
    handler: TriggerHandler,
) -> Result<()> {
    let channel = SensorChannel::AccelXyz;
    let steps = [
        ("range", SensorAttribute::FullScale(SensorValue::from_g(ACCEL_FULL_SCALE_G))),
        (
            "sampling frequency",
            SensorAttribute::SamplingFrequency(SensorValue::new(frequency as i32, 0)),
        ),
        (
            "slope threshold",
            SensorAttribute::SlopeThreshold(SensorValue::new(0, 980_665)),
        ),
        (
            "slope duration",
            SensorAttribute::SlopeDuration(SensorValue::new(ACCEL_SLOPE_DURATION, 0)),
        ),
    ];
    for (what, attribute) in steps {
        imu.set_attribute(channel, attribute)
            .inspect_err(|e| log::error!("failed to set accelerometer {}: {}", what, e))?;
    }
    imu.set_trigger(channel, Some(handler))
        .inspect_err(|e| log::error!("failed to enable accelerometer trigger: {}", e))?;
    Ok(())
}

fn start_gyro_trigger(
    imu: &mut dyn MotionSensor,
    frequency: u32,
    handler: TriggerHandler,
) -> Result<()> {
    let channel = SensorChannel::GyroXyz;
    imu.set_attribute(
        channel,
        SensorAttribute::SamplingFrequency(SensorValue::new(frequency as i32, 0)),
    )
    .inspect_err(|e| log::error!("failed to set gyroscope sampling frequency: {}", e))?;
    imu.set_trigger(channel, Some(handler))
        .inspect_err(|e| log::error!("failed to enable gyroscope trigger: {}", e))?;
    Ok(())
}

fn fetch_xyz(
    imu: &mut dyn MotionSensor,
    channel: SensorChannel,
) -> core::result::Result<[SensorValue; 3], DriverError> {
    imu.sample_fetch()?;
    imu.read_xyz(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::SimBoard;

    fn rig() -> (SimBoard, Devices, SensorManager) {
        let board = SimBoard::new();
        let mut devices = Devices::new(Box::new(board.clone()));
        let mut sensors = SensorManager::new(&CoreConfig::default());
        sensors.init_imu(&mut devices).unwrap();
        (board, devices, sensors)
    }

    fn g(val1: i32, val2: i32) -> SensorValue {
        SensorValue::new(val1, val2)
    }

    #[test]
    fn init_calibrates_accel_and_gyro() {
        let (board, _devices, _sensors) = rig();
        let attributes = board.state().attributes.clone();
        assert_eq!(
            attributes,
            vec![
                (
                    SensorChannel::AccelXyz,
                    SensorAttribute::CalibrationTarget(Some(ACCEL_CALIBRATION))
                ),
                (SensorChannel::GyroXyz, SensorAttribute::CalibrationTarget(None)),
            ]
        );
    }

    #[test]
    fn calibration_failure_is_not_fatal() {
        let board = SimBoard::new();
        board.state().fail_calibration = true;
        let mut devices = Devices::new(Box::new(board));
        let mut sensors = SensorManager::new(&CoreConfig::default());
        assert!(sensors.init_imu(&mut devices).is_ok());
        assert!(devices.motion().is_ok());
    }

    #[test]
    fn missing_imu_fails_init_start_and_stop() {
        let board = SimBoard::new();
        board.state().bind_motion = false;
        let mut devices = Devices::new(Box::new(board));
        let mut sensors = SensorManager::new(&CoreConfig::default());

        assert_eq!(sensors.init_imu(&mut devices).unwrap_err().code(), crate::error::ErrorCode::OperationFailed);
        let err = sensors.start(&mut devices, SensorChannel::GyroXyz, 100).unwrap_err();
        assert_eq!(err, IpmError::DeviceUnbound(IMU_DEVICE_NAME));
        assert!(sensors.stop(&mut devices, SensorChannel::Temp).is_err());
    }

    #[test]
    fn accel_start_programs_attributes_in_order() {
        let (board, mut devices, mut sensors) = rig();
        board.state().attributes.clear();
        sensors.start(&mut devices, SensorChannel::AccelXyz, 100).unwrap();

        let attributes: Vec<_> = board.state().attributes.iter().map(|(_, a)| *a).collect();
        assert_eq!(
            attributes,
            vec![
                SensorAttribute::FullScale(g(156, 906_400)),
                SensorAttribute::SamplingFrequency(g(100, 0)),
                SensorAttribute::SlopeThreshold(g(0, 980_665)),
                SensorAttribute::SlopeDuration(g(2, 0)),
            ]
        );
        assert!(board.trigger_installed(SensorChannel::AccelXyz));
        assert_eq!(
            sensors.state(SensorChannel::AccelXyz),
            TriggerState::Running { frequency: 100 }
        );
    }

    #[test]
    fn failed_start_leaves_trigger_stopped() {
        let (board, mut devices, mut sensors) = rig();
        board.state().trigger_set_fails = true;
        assert!(sensors.start(&mut devices, SensorChannel::GyroXyz, 50).is_err());
        assert_eq!(sensors.state(SensorChannel::GyroXyz), TriggerState::Stopped);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (board, mut devices, mut sensors) = rig();
        sensors.stop(&mut devices, SensorChannel::GyroXyz).unwrap();
        assert_eq!(board.state().trigger_clear_attempts, 0);

        sensors.start(&mut devices, SensorChannel::GyroXyz, 50).unwrap();
        board.state().attributes.clear();
        sensors.start(&mut devices, SensorChannel::GyroXyz, 50).unwrap();
        assert!(board.state().attributes.is_empty());
    }

    #[test]
    fn stop_retries_until_the_driver_gives_in() {
        let (board, mut devices, mut sensors) = rig();
        sensors.start(&mut devices, SensorChannel::AccelXyz, 100).unwrap();
        board.state().trigger_clear_failures = 49;

        sensors.stop(&mut devices, SensorChannel::AccelXyz).unwrap();
        assert_eq!(board.state().trigger_clear_attempts, 50);
        assert_eq!(sensors.state(SensorChannel::AccelXyz), TriggerState::Stopped);
        assert!(!board.trigger_installed(SensorChannel::AccelXyz));
    }

    #[test]
    fn stop_gives_up_after_fifty_attempts() {
        let (board, mut devices, mut sensors) = rig();
        sensors.start(&mut devices, SensorChannel::AccelXyz, 100).unwrap();
        board.state().trigger_clear_failures = 50;

        let err = sensors.stop(&mut devices, SensorChannel::AccelXyz).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::OperationFailed);
        assert!(sensors.state(SensorChannel::AccelXyz).is_running());
    }

    #[test]
    fn temperature_start_stop_rules() {
        let (_board, mut devices, mut sensors) = rig();
        assert!(sensors.stop(&mut devices, SensorChannel::Temp).is_err());
        sensors.start(&mut devices, SensorChannel::Temp, 10).unwrap();
        assert!(sensors.start(&mut devices, SensorChannel::Temp, 10).is_err());
        assert_eq!(sensors.poll_interval(), 10);
        sensors.stop(&mut devices, SensorChannel::Temp).unwrap();
    }

    #[test]
    fn accel_threshold_is_strict() {
        let rest = [0.0; 3];
        assert!(!accel_changed(&rest, &[0.980665, 0.0, 0.0]));
        assert!(accel_changed(&rest, &[0.0, 0.0, -0.980666]));
    }

    #[test]
    fn duplicate_gyro_reading_reports_once() {
        let (board, mut devices, mut sensors) = rig();
        sensors.start(&mut devices, SensorChannel::GyroXyz, 100).unwrap();
        board.set_gyro([g(1, 0), g(0, 500_000), g(-2, 0)]);

        assert!(board.fire(SensorChannel::GyroXyz));
        assert_eq!(sensors.service_triggers(&mut devices).events.len(), 1);
        assert!(board.fire(SensorChannel::GyroXyz));
        assert!(sensors.service_triggers(&mut devices).events.is_empty());
    }

    #[test]
    fn accel_feeds_raw_samples_even_when_suppressed() {
        let (board, mut devices, mut sensors) = rig();
        sensors.start(&mut devices, SensorChannel::AccelXyz, 100).unwrap();
        board.set_accel([g(0, 100), g(0, 0), g(9, 806_650)]);

        board.fire(SensorChannel::AccelXyz);
        let first = sensors.service_triggers(&mut devices);
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.raw_accel, vec![[0, 0, 9]]);

        board.set_accel([g(0, 500_000), g(0, 0), g(9, 806_650)]);
        board.fire(SensorChannel::AccelXyz);
        let second = sensors.service_triggers(&mut devices);
        assert!(second.events.is_empty());
        assert_eq!(second.raw_accel.len(), 1);
    }

    #[test]
    fn untriggered_tick_does_nothing() {
        let (board, mut devices, mut sensors) = rig();
        sensors.start(&mut devices, SensorChannel::GyroXyz, 100).unwrap();
        let fetches = board.state().fetches;
        assert!(sensors.service_triggers(&mut devices).events.is_empty());
        assert_eq!(board.state().fetches, fetches);
    }

    #[test]
    fn temperature_is_polled_on_the_gate_only() {
        let (board, mut devices, mut sensors) = rig();
        sensors.start(&mut devices, SensorChannel::Temp, 20).unwrap();
        board.state().temp = g(24, 250_000);

        assert!(sensors.poll(3, &mut devices).is_empty());
        let events = sensors.poll(5, &mut devices);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reading, SensorReading::Scalar(24.25));
        assert!(sensors.poll(10, &mut devices).is_empty());
    }
}
