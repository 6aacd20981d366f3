// corebridge — Device Capabilities
//
// The compute core never talks to registers itself. Each peripheral is a
// capability trait; a `DeviceBinder` looks devices up by name, and a missing
// binding only fails the request that needed it.

use std::sync::Arc;

use embedded_graphics::pixelcolor::Rgb888;

use crate::config::{ADC_DEVICE_NAME, MAX_I2C_BUS};
use crate::error::{DriverError, IpmError};
use crate::ipm::message::SensorChannel;

#[cfg(target_os = "espidf")]
pub mod imu;
pub mod sim;

// ---------------------------------------------------------------------------
// Sensor values (integer part + millionths, as the sensor API reports them)
// ---------------------------------------------------------------------------
const STANDARD_GRAVITY_MICRO: i64 = 9_806_650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorValue {
    pub val1: i32,
    pub val2: i32,
}

impl SensorValue {
    pub const fn new(val1: i32, val2: i32) -> Self {
        Self { val1, val2 }
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.val1) + f64::from(self.val2) / 1_000_000.0
    }

    /// Acceleration of `g` standard gravities in m/s².
    pub fn from_g(g: i32) -> Self {
        let micro = i64::from(g) * STANDARD_GRAVITY_MICRO;
        Self {
            val1: (micro / 1_000_000) as i32,
            val2: (micro % 1_000_000) as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorAttribute {
    FullScale(SensorValue),
    SamplingFrequency(SensorValue),
    SlopeThreshold(SensorValue),
    SlopeDuration(SensorValue),
    /// Expected at-rest reading; `None` lets the device pick (gyro: zero).
    CalibrationTarget(Option<[SensorValue; 3]>),
}

/// Data-ready callback. Runs in interrupt context: it may only signal.
pub type TriggerHandler = Arc<dyn Fn(SensorChannel) + Send + Sync>;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------
pub trait MotionSensor: Send {
    fn set_attribute(
        &mut self,
        channel: SensorChannel,
        attribute: SensorAttribute,
    ) -> Result<(), DriverError>;

    /// Install (`Some`) or remove (`None`) the data-ready handler.
    fn set_trigger(
        &mut self,
        channel: SensorChannel,
        handler: Option<TriggerHandler>,
    ) -> Result<(), DriverError>;

    fn sample_fetch(&mut self) -> Result<(), DriverError>;

    fn read_xyz(&mut self, channel: SensorChannel) -> Result<[SensorValue; 3], DriverError>;

    fn read_scalar(&mut self, channel: SensorChannel) -> Result<SensorValue, DriverError>;
}

pub trait AnalogInput: Send {
    /// Raw 12-bit sample of `pin`.
    fn read(&mut self, pin: u32) -> Result<u32, DriverError>;
}

pub trait I2cBus: Send {
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), DriverError>;
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), DriverError>;
    fn burst_read(&mut self, address: u16, register: u8, buf: &mut [u8])
        -> Result<(), DriverError>;
}

pub trait CharacterLcd: Send {
    fn print(&mut self, text: &str);
    fn clear(&mut self);
    fn set_cursor(&mut self, col: u8, row: u8);
    fn set_color(&mut self, color: Rgb888);
    fn select_color(&mut self, index: u8);
    fn set_function(&mut self, value: u8);
    fn function(&self) -> u8;
    fn set_display_state(&mut self, value: u8);
    fn display_state(&self) -> u8;
    fn set_input_state(&mut self, value: u8);
    fn input_state(&self) -> u8;
}

/// Looks devices up by name, like the RTOS device registry.
pub trait DeviceBinder: Send {
    fn bind_adc(&mut self, name: &str) -> Option<Box<dyn AnalogInput>>;
    fn bind_i2c(&mut self, bus: u8) -> Option<Box<dyn I2cBus>>;
    fn bind_lcd(&mut self, name: &str) -> Option<Box<dyn CharacterLcd>>;
    fn bind_motion(&mut self, name: &str) -> Option<Box<dyn MotionSensor>>;
}

// ---------------------------------------------------------------------------
// Bound device set owned by the compute core
// ---------------------------------------------------------------------------
pub struct Devices {
    binder: Box<dyn DeviceBinder>,
    pub adc: Option<Box<dyn AnalogInput>>,
    pub i2c: [Option<Box<dyn I2cBus>>; MAX_I2C_BUS],
    pub lcd: Option<Box<dyn CharacterLcd>>,
    pub motion: Option<Box<dyn MotionSensor>>,
}

impl Devices {
    /// The ADC is bound up front; everything else on its channel's `init`/`open`.
    pub fn new(mut binder: Box<dyn DeviceBinder>) -> Self {
        let adc = binder.bind_adc(ADC_DEVICE_NAME);
        if adc.is_none() {
            log::error!("ADC device {} not found", ADC_DEVICE_NAME);
        }
        Self {
            binder,
            adc,
            i2c: std::array::from_fn(|_| None),
            lcd: None,
            motion: None,
        }
    }

    pub fn binder(&mut self) -> &mut dyn DeviceBinder {
        self.binder.as_mut()
    }

    pub fn read_pin(&mut self, pin: u32) -> Result<u32, IpmError> {
        let adc = self.adc.as_mut().ok_or(IpmError::DeviceUnbound(ADC_DEVICE_NAME))?;
        Ok(adc.read(pin)?)
    }

    pub fn motion(&mut self) -> Result<&mut (dyn MotionSensor + 'static), IpmError> {
        self.motion
            .as_deref_mut()
            .ok_or(IpmError::DeviceUnbound(crate::config::IMU_DEVICE_NAME))
    }

    pub fn lcd(&mut self) -> Result<&mut (dyn CharacterLcd + 'static), IpmError> {
        self.lcd
            .as_deref_mut()
            .ok_or(IpmError::DeviceUnbound(crate::config::LCD_DEVICE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_value_converts_to_float() {
        assert!((SensorValue::new(9, 806_650).to_f64() - 9.80665).abs() < 1e-9);
        assert_eq!(SensorValue::new(0, 980_665).to_f64(), 0.980665);
    }

    #[test]
    fn sixteen_g_in_si_units() {
        assert_eq!(SensorValue::from_g(16), SensorValue::new(156, 906_400));
    }

    #[test]
    fn unbound_devices_report_operation_failed() {
        let mut board = sim::SimBoard::new();
        board.state().bind_adc = false;
        let mut devices = Devices::new(Box::new(board));
        assert!(devices.read_pin(10).is_err());
        assert!(devices.motion().is_err());
        assert!(devices.lcd().is_err());
    }
}
