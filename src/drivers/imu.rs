// corebridge — BMI160 Board Driver
//
// Register-level BMI160 access over the board's shared I2C bus, plus the
// `DeviceBinder` that hands it (and raw bus 0) to the compute core. Data-ready
// is watched by a small thread reading the status register; the installed
// handler is called from there and only raises a flag.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use esp_idf_hal::i2c::I2cDriver;

use crate::config::*;
use crate::drivers::{
    AnalogInput, CharacterLcd, DeviceBinder, I2cBus, MotionSensor, SensorAttribute, SensorValue,
    TriggerHandler,
};
use crate::error::DriverError;
use crate::ipm::message::SensorChannel;

/// Thread-safe handle to a shared I2C bus.
pub type SharedBus = &'static Mutex<I2cDriver<'static>>;

fn lock(bus: SharedBus) -> MutexGuard<'static, I2cDriver<'static>> {
    bus.lock().unwrap_or_else(|e| e.into_inner())
}

// BMI160 register map (subset)
const REG_CHIP_ID: u8 = 0x00;
const REG_DATA_GYR: u8 = 0x0C; // 6 bytes, then accel at 0x12
const REG_STATUS: u8 = 0x1B;
const REG_TEMPERATURE: u8 = 0x20;
const REG_ACC_CONF: u8 = 0x40;
const REG_ACC_RANGE: u8 = 0x41;
const REG_GYR_CONF: u8 = 0x42;
const REG_GYR_RANGE: u8 = 0x43;
const REG_INT_MOTION_0: u8 = 0x5F;
const REG_INT_MOTION_1: u8 = 0x60;
const REG_FOC_CONF: u8 = 0x69;
const REG_OFFSET_EN: u8 = 0x77;
const REG_CMD: u8 = 0x7E;

const CHIP_ID: u8 = 0xD1;
const CMD_ACC_NORMAL: u8 = 0x11;
const CMD_GYR_NORMAL: u8 = 0x15;
const CMD_START_FOC: u8 = 0x03;

const STATUS_DRDY_ACC: u8 = 1 << 7;
const STATUS_DRDY_GYR: u8 = 1 << 6;
const STATUS_FOC_RDY: u8 = 1 << 3;

const GYRO_RANGE_DPS: f64 = 2000.0;

fn bus_error(e: impl std::fmt::Display) -> DriverError {
    log::debug!("bmi160 bus error: {}", e);
    DriverError::Bus
}

fn to_sensor_value(v: f64) -> SensorValue {
    let micro = (v * 1_000_000.0) as i64;
    SensorValue::new((micro / 1_000_000) as i32, (micro % 1_000_000) as i32)
}

/// ACC_CONF/GYR_CONF output data rate code for `hz`.
fn odr_code(hz: i32) -> Option<u8> {
    match hz {
        25 => Some(0x06),
        50 => Some(0x07),
        100 => Some(0x08),
        200 => Some(0x09),
        400 => Some(0x0A),
        800 => Some(0x0B),
        1600 => Some(0x0C),
        _ => None,
    }
}

fn accel_range_code(g: i32) -> Option<u8> {
    match g {
        2 => Some(0x03),
        4 => Some(0x05),
        8 => Some(0x08),
        16 => Some(0x0C),
        _ => None,
    }
}

/// FOC target code for one accelerometer axis: +1 g, -1 g or 0 g.
fn foc_axis(target: SensorValue) -> u8 {
    let v = target.to_f64();
    if v > STANDARD_GRAVITY / 2.0 {
        1
    } else if v < -STANDARD_GRAVITY / 2.0 {
        2
    } else {
        3
    }
}

type Handlers = Arc<Mutex<[Option<TriggerHandler>; 2]>>;

fn handler_slot(channel: SensorChannel) -> Option<usize> {
    match channel {
        SensorChannel::AccelXyz => Some(0),
        SensorChannel::GyroXyz => Some(1),
        _ => None,
    }
}

pub struct Bmi160 {
    bus: SharedBus,
    accel_range_g: i32,
    // gyro[3], accel[3], raw LSB
    sample: [i16; 6],
    temperature: i16,
    handlers: Handlers,
}

impl Bmi160 {
    /// Check the chip id, power up both sensors and start the data-ready
    /// watcher.
    pub fn probe(bus: SharedBus) -> anyhow::Result<Self> {
        let mut id = [0u8; 1];
        lock(bus).write_read(I2C_ADDR_BMI160, &[REG_CHIP_ID], &mut id, I2C_TIMEOUT_TICKS)?;
        if id[0] != CHIP_ID {
            anyhow::bail!("unexpected BMI160 chip id {:#04x}", id[0]);
        }

        {
            let mut i2c = lock(bus);
            i2c.write(I2C_ADDR_BMI160, &[REG_CMD, CMD_ACC_NORMAL], I2C_TIMEOUT_TICKS)?;
            thread::sleep(TICK_DURATION);
            i2c.write(I2C_ADDR_BMI160, &[REG_CMD, CMD_GYR_NORMAL], I2C_TIMEOUT_TICKS)?;
            thread::sleep(TICK_DURATION * 8);
            i2c.write(I2C_ADDR_BMI160, &[REG_GYR_RANGE, 0x00], I2C_TIMEOUT_TICKS)?;
        }

        let handlers: Handlers = Arc::new(Mutex::new([None, None]));
        let watched = Arc::clone(&handlers);
        thread::Builder::new()
            .name("bmi160-drdy".into())
            .stack_size(STACK_DRDY)
            .spawn(move || watch_data_ready(bus, watched))?;

        log::info!("BMI160 ready (accel ±2g, gyro ±2000°/s)");
        Ok(Self {
            bus,
            accel_range_g: 2,
            sample: [0; 6],
            temperature: 0,
            handlers,
        })
    }

    fn write_reg(&self, reg: u8, value: u8) -> Result<(), DriverError> {
        lock(self.bus)
            .write(I2C_ADDR_BMI160, &[reg, value], I2C_TIMEOUT_TICKS)
            .map_err(bus_error)
    }

    fn read_regs(&self, reg: u8, buf: &mut [u8]) -> Result<(), DriverError> {
        lock(self.bus)
            .write_read(I2C_ADDR_BMI160, &[reg], buf, I2C_TIMEOUT_TICKS)
            .map_err(bus_error)
    }

    fn fast_offset_compensation(&self, target: Option<[SensorValue; 3]>, gyro: bool) -> Result<(), DriverError> {
        let conf = match target {
            Some([x, y, z]) => (foc_axis(x) << 4) | (foc_axis(y) << 2) | foc_axis(z),
            None if gyro => 1 << 6,
            None => return Err(DriverError::Unsupported),
        };
        self.write_reg(REG_FOC_CONF, conf)?;
        self.write_reg(REG_CMD, CMD_START_FOC)?;

        let mut status = [0u8; 1];
        for _ in 0..TICKS_PER_SECOND {
            thread::sleep(TICK_DURATION);
            self.read_regs(REG_STATUS, &mut status)?;
            if status[0] & STATUS_FOC_RDY != 0 {
                let enable = if gyro { 1 << 7 } else { 1 << 6 };
                return self.write_reg(REG_OFFSET_EN, enable);
            }
        }
        Err(DriverError::Busy)
    }
}

fn watch_data_ready(bus: SharedBus, handlers: Handlers) {
    let mut status = [0u8; 1];
    loop {
        thread::sleep(TICK_DURATION);
        let read = lock(bus).write_read(I2C_ADDR_BMI160, &[REG_STATUS], &mut status, I2C_TIMEOUT_TICKS);
        if read.is_err() {
            continue;
        }
        let installed = handlers.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if status[0] & STATUS_DRDY_ACC != 0 {
            if let Some(handler) = &installed[0] {
                handler(SensorChannel::AccelXyz);
            }
        }
        if status[0] & STATUS_DRDY_GYR != 0 {
            if let Some(handler) = &installed[1] {
                handler(SensorChannel::GyroXyz);
            }
        }
    }
}

impl MotionSensor for Bmi160 {
    fn set_attribute(&mut self, channel: SensorChannel, attribute: SensorAttribute) -> Result<(), DriverError> {
        let gyro = channel == SensorChannel::GyroXyz;
        match attribute {
            SensorAttribute::FullScale(value) if !gyro => {
                let g = (value.to_f64() / STANDARD_GRAVITY).round() as i32;
                let code = accel_range_code(g).ok_or(DriverError::Unsupported)?;
                self.write_reg(REG_ACC_RANGE, code)?;
                self.accel_range_g = g;
                Ok(())
            }
            SensorAttribute::SamplingFrequency(value) => {
                let code = odr_code(value.val1).ok_or(DriverError::Unsupported)?;
                // normal filter mode, no undersampling
                let conf = 0x20 | code;
                self.write_reg(if gyro { REG_GYR_CONF } else { REG_ACC_CONF }, conf)
            }
            SensorAttribute::SlopeThreshold(value) if !gyro => {
                // 1 LSB = 3.91 mg at ±2 g, scaled with the range
                let lsb_mg = 3.91 * f64::from(self.accel_range_g) / 2.0;
                let mg = value.to_f64() / STANDARD_GRAVITY * 1000.0;
                self.write_reg(REG_INT_MOTION_1, (mg / lsb_mg).clamp(0.0, 255.0) as u8)
            }
            SensorAttribute::SlopeDuration(value) if !gyro => {
                let samples = value.val1.clamp(1, 4) as u8;
                self.write_reg(REG_INT_MOTION_0, samples - 1)
            }
            SensorAttribute::CalibrationTarget(target) => self.fast_offset_compensation(target, gyro),
            _ => Err(DriverError::Unsupported),
        }
    }

    fn set_trigger(&mut self, channel: SensorChannel, handler: Option<TriggerHandler>) -> Result<(), DriverError> {
        let slot = handler_slot(channel).ok_or(DriverError::Unsupported)?;
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())[slot] = handler;
        Ok(())
    }

    fn sample_fetch(&mut self) -> Result<(), DriverError> {
        let mut raw = [0u8; 12];
        self.read_regs(REG_DATA_GYR, &mut raw)?;
        for (value, bytes) in self.sample.iter_mut().zip(raw.chunks_exact(2)) {
            *value = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let mut temp = [0u8; 2];
        self.read_regs(REG_TEMPERATURE, &mut temp)?;
        self.temperature = i16::from_le_bytes(temp);
        Ok(())
    }

    fn read_xyz(&mut self, channel: SensorChannel) -> Result<[SensorValue; 3], DriverError> {
        let (offset, scale) = match channel {
            SensorChannel::GyroXyz => (0, GYRO_RANGE_DPS.to_radians() / 32768.0),
            SensorChannel::AccelXyz => (3, f64::from(self.accel_range_g) * STANDARD_GRAVITY / 32768.0),
            _ => return Err(DriverError::Unsupported),
        };
        Ok(std::array::from_fn(|axis| {
            to_sensor_value(f64::from(self.sample[offset + axis]) * scale)
        }))
    }

    fn read_scalar(&mut self, channel: SensorChannel) -> Result<SensorValue, DriverError> {
        match channel {
            // 0 LSB = 23 °C, 1/512 K per LSB
            SensorChannel::Temp => Ok(to_sensor_value(23.0 + f64::from(self.temperature) / 512.0)),
            _ => Err(DriverError::Unsupported),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw I2C access for the I2C channel
// ---------------------------------------------------------------------------
struct BoardI2c {
    bus: SharedBus,
}

impl BoardI2c {
    fn address(address: u16) -> Result<u8, DriverError> {
        u8::try_from(address).map_err(|_| DriverError::Unsupported)
    }
}

impl I2cBus for BoardI2c {
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), DriverError> {
        lock(self.bus)
            .write(Self::address(address)?, data, I2C_TIMEOUT_TICKS)
            .map_err(bus_error)
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), DriverError> {
        lock(self.bus)
            .read(Self::address(address)?, buf, I2C_TIMEOUT_TICKS)
            .map_err(bus_error)
    }

    fn burst_read(&mut self, address: u16, register: u8, buf: &mut [u8]) -> Result<(), DriverError> {
        lock(self.bus)
            .write_read(Self::address(address)?, &[register], buf, I2C_TIMEOUT_TICKS)
            .map_err(bus_error)
    }
}

// ---------------------------------------------------------------------------
// Device registry of the board
// ---------------------------------------------------------------------------

/// The board carries one I2C bus with the BMI160 on it. It has no ADC and no
/// character LCD wired, so those bindings are absent.
pub struct Board {
    bus: SharedBus,
}

impl Board {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }
}

impl DeviceBinder for Board {
    fn bind_adc(&mut self, _name: &str) -> Option<Box<dyn AnalogInput>> {
        None
    }

    fn bind_i2c(&mut self, bus: u8) -> Option<Box<dyn I2cBus>> {
        (bus == 0).then(|| Box::new(BoardI2c { bus: self.bus }) as Box<dyn I2cBus>)
    }

    fn bind_lcd(&mut self, _name: &str) -> Option<Box<dyn CharacterLcd>> {
        None
    }

    fn bind_motion(&mut self, name: &str) -> Option<Box<dyn MotionSensor>> {
        if name != IMU_DEVICE_NAME {
            return None;
        }
        match Bmi160::probe(self.bus) {
            Ok(imu) => Some(Box::new(imu)),
            Err(e) => {
                log::error!("BMI160 probe failed: {:#}", e);
                None
            }
        }
    }
}
