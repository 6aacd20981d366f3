// corebridge — Simulated Board
//
// Software stand-ins for every device capability. All devices bound from one
// `SimBoard` share a single `SimState`, so a test can preload readings,
// inject failures and inspect what the handlers did to the hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_graphics::pixelcolor::{Rgb888, RgbColor};

use super::{
    AnalogInput, CharacterLcd, DeviceBinder, I2cBus, MotionSensor, SensorAttribute, SensorValue,
    TriggerHandler,
};
use crate::config::{ADC_DEVICE_NAME, IMU_DEVICE_NAME, LCD_DEVICE_NAME, MAX_I2C_BUS};
use crate::error::DriverError;
use crate::ipm::message::SensorChannel;

/// I2C transaction log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cTransaction {
    Write { bus: u8, address: u16, data: Vec<u8> },
    Read { bus: u8, address: u16, len: usize },
    BurstRead { bus: u8, address: u16, register: u8, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcdState {
    pub text: String,
    pub cursor: (u8, u8),
    pub color: Rgb888,
    pub color_index: u8,
    pub function: u8,
    pub display: u8,
    pub input: u8,
    pub clears: u32,
}

impl Default for LcdState {
    fn default() -> Self {
        Self {
            text: String::new(),
            cursor: (0, 0),
            color: Rgb888::WHITE,
            color_index: 0,
            function: 0,
            display: 0,
            input: 0,
            clears: 0,
        }
    }
}

pub struct SimState {
    // ---- binding ----------------------------------------------------------
    pub bind_adc: bool,
    pub bind_lcd: bool,
    pub bind_motion: bool,
    pub i2c_buses: [bool; MAX_I2C_BUS],

    // ---- ADC --------------------------------------------------------------
    /// Raw 12-bit value per pin; unset pins read 0.
    pub adc: HashMap<u32, u32>,
    pub adc_fails: bool,
    pub adc_reads: u32,

    // ---- I2C --------------------------------------------------------------
    pub i2c_log: Vec<I2cTransaction>,
    /// Bytes handed out by reads, front first.
    pub i2c_read_data: Vec<u8>,
    pub i2c_fails: bool,

    // ---- LCD --------------------------------------------------------------
    pub lcd: LcdState,

    // ---- IMU --------------------------------------------------------------
    pub accel: [SensorValue; 3],
    pub gyro: [SensorValue; 3],
    pub temp: SensorValue,
    pub attributes: Vec<(SensorChannel, SensorAttribute)>,
    pub fail_attributes: bool,
    pub fail_calibration: bool,
    pub trigger_set_fails: bool,
    /// Number of upcoming trigger-clear calls that fail.
    pub trigger_clear_failures: u32,
    pub trigger_clear_attempts: u32,
    pub handlers: HashMap<SensorChannel, TriggerHandler>,
    pub fetches: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            bind_adc: true,
            bind_lcd: true,
            bind_motion: true,
            i2c_buses: [true; MAX_I2C_BUS],
            adc: HashMap::new(),
            adc_fails: false,
            adc_reads: 0,
            i2c_log: Vec::new(),
            i2c_read_data: Vec::new(),
            i2c_fails: false,
            lcd: LcdState::default(),
            accel: [SensorValue::default(); 3],
            gyro: [SensorValue::default(); 3],
            temp: SensorValue::default(),
            attributes: Vec::new(),
            fail_attributes: false,
            fail_calibration: false,
            trigger_set_fails: false,
            trigger_clear_failures: 0,
            trigger_clear_attempts: 0,
            handlers: HashMap::new(),
            fetches: 0,
        }
    }
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to the simulated board. Clones share the same state.
#[derive(Clone, Default)]
pub struct SimBoard {
    state: Shared,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    /// Raise the data-ready interrupt of `channel`. Returns `false` when no
    /// handler is installed.
    pub fn fire(&self, channel: SensorChannel) -> bool {
        let handler = self.state().handlers.get(&channel).cloned();
        match handler {
            Some(handler) => {
                handler(channel);
                true
            }
            None => false,
        }
    }

    pub fn trigger_installed(&self, channel: SensorChannel) -> bool {
        self.state().handlers.contains_key(&channel)
    }

    pub fn set_accel(&self, xyz: [SensorValue; 3]) {
        self.state().accel = xyz;
    }

    pub fn set_gyro(&self, xyz: [SensorValue; 3]) {
        self.state().gyro = xyz;
    }

    pub fn set_pin(&self, pin: u32, raw: u32) {
        self.state().adc.insert(pin, raw);
    }
}

impl DeviceBinder for SimBoard {
    fn bind_adc(&mut self, name: &str) -> Option<Box<dyn AnalogInput>> {
        (name == ADC_DEVICE_NAME && self.state().bind_adc)
            .then(|| Box::new(SimAdc(Arc::clone(&self.state))) as Box<dyn AnalogInput>)
    }

    fn bind_i2c(&mut self, bus: u8) -> Option<Box<dyn I2cBus>> {
        let available = self.state().i2c_buses.get(bus as usize).copied().unwrap_or(false);
        available.then(|| {
            Box::new(SimI2c {
                bus,
                state: Arc::clone(&self.state),
            }) as Box<dyn I2cBus>
        })
    }

    fn bind_lcd(&mut self, name: &str) -> Option<Box<dyn CharacterLcd>> {
        (name == LCD_DEVICE_NAME && self.state().bind_lcd)
            .then(|| Box::new(SimLcd(Arc::clone(&self.state))) as Box<dyn CharacterLcd>)
    }

    fn bind_motion(&mut self, name: &str) -> Option<Box<dyn MotionSensor>> {
        (name == IMU_DEVICE_NAME && self.state().bind_motion)
            .then(|| Box::new(SimMotion(Arc::clone(&self.state))) as Box<dyn MotionSensor>)
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------
struct SimAdc(Shared);

impl AnalogInput for SimAdc {
    fn read(&mut self, pin: u32) -> Result<u32, DriverError> {
        let mut state = lock(&self.0);
        if state.adc_fails {
            return Err(DriverError::Code(-5));
        }
        state.adc_reads += 1;
        Ok(state.adc.get(&pin).copied().unwrap_or(0))
    }
}

struct SimI2c {
    bus: u8,
    state: Shared,
}

impl SimI2c {
    fn fill(state: &mut SimState, buf: &mut [u8]) {
        let n = buf.len().min(state.i2c_read_data.len());
        buf[..n].copy_from_slice(&state.i2c_read_data[..n]);
        state.i2c_read_data.drain(..n);
    }
}

impl I2cBus for SimI2c {
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if state.i2c_fails {
            return Err(DriverError::Bus);
        }
        state.i2c_log.push(I2cTransaction::Write {
            bus: self.bus,
            address,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if state.i2c_fails {
            return Err(DriverError::Bus);
        }
        state.i2c_log.push(I2cTransaction::Read {
            bus: self.bus,
            address,
            len: buf.len(),
        });
        Self::fill(&mut state, buf);
        Ok(())
    }

    fn burst_read(&mut self, address: u16, register: u8, buf: &mut [u8]) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if state.i2c_fails {
            return Err(DriverError::Bus);
        }
        state.i2c_log.push(I2cTransaction::BurstRead {
            bus: self.bus,
            address,
            register,
            len: buf.len(),
        });
        Self::fill(&mut state, buf);
        Ok(())
    }
}

struct SimLcd(Shared);

impl SimLcd {
    fn lcd(&self) -> MutexGuard<'_, SimState> {
        lock(&self.0)
    }
}

impl CharacterLcd for SimLcd {
    fn print(&mut self, text: &str) {
        self.lcd().lcd.text.push_str(text);
    }

    fn clear(&mut self) {
        let mut state = self.lcd();
        state.lcd.text.clear();
        state.lcd.cursor = (0, 0);
        state.lcd.clears += 1;
    }

    fn set_cursor(&mut self, col: u8, row: u8) {
        self.lcd().lcd.cursor = (col, row);
    }

    fn set_color(&mut self, color: Rgb888) {
        self.lcd().lcd.color = color;
    }

    fn select_color(&mut self, index: u8) {
        let color = match index {
            0 => Rgb888::WHITE,
            1 => Rgb888::RED,
            2 => Rgb888::GREEN,
            3 => Rgb888::BLUE,
            _ => Rgb888::BLACK,
        };
        let mut state = self.lcd();
        state.lcd.color_index = index;
        state.lcd.color = color;
    }

    fn set_function(&mut self, value: u8) {
        self.lcd().lcd.function = value;
    }

    fn function(&self) -> u8 {
        self.lcd().lcd.function
    }

    fn set_display_state(&mut self, value: u8) {
        self.lcd().lcd.display = value;
    }

    fn display_state(&self) -> u8 {
        self.lcd().lcd.display
    }

    fn set_input_state(&mut self, value: u8) {
        self.lcd().lcd.input = value;
    }

    fn input_state(&self) -> u8 {
        self.lcd().lcd.input
    }
}

struct SimMotion(Shared);

impl MotionSensor for SimMotion {
    fn set_attribute(
        &mut self,
        channel: SensorChannel,
        attribute: SensorAttribute,
    ) -> Result<(), DriverError> {
        let mut state = lock(&self.0);
        let calibration = matches!(attribute, SensorAttribute::CalibrationTarget(_));
        if state.fail_attributes || (calibration && state.fail_calibration) {
            return Err(DriverError::Code(-22));
        }
        state.attributes.push((channel, attribute));
        Ok(())
    }

    fn set_trigger(
        &mut self,
        channel: SensorChannel,
        handler: Option<TriggerHandler>,
    ) -> Result<(), DriverError> {
        let mut state = lock(&self.0);
        match handler {
            Some(handler) => {
                if state.trigger_set_fails {
                    return Err(DriverError::Busy);
                }
                state.handlers.insert(channel, handler);
            }
            None => {
                state.trigger_clear_attempts += 1;
                if state.trigger_clear_failures > 0 {
                    state.trigger_clear_failures -= 1;
                    return Err(DriverError::Busy);
                }
                state.handlers.remove(&channel);
            }
        }
        Ok(())
    }

    fn sample_fetch(&mut self) -> Result<(), DriverError> {
        lock(&self.0).fetches += 1;
        Ok(())
    }

    fn read_xyz(&mut self, channel: SensorChannel) -> Result<[SensorValue; 3], DriverError> {
        let state = lock(&self.0);
        match channel {
            SensorChannel::AccelXyz => Ok(state.accel),
            SensorChannel::GyroXyz => Ok(state.gyro),
            _ => Err(DriverError::Unsupported),
        }
    }

    fn read_scalar(&mut self, channel: SensorChannel) -> Result<SensorValue, DriverError> {
        match channel {
            SensorChannel::Temp => Ok(lock(&self.0).temp),
            _ => Err(DriverError::Unsupported),
        }
    }
}
