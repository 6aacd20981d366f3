// corebridge — Mailbox Message Record
//
// One record type travels in both directions. The channel is derived from the
// payload variant, so a SENSOR message can never carry an AIO payload. The
// operation code stays raw (`u32`) until the handler of that channel decodes
// it, which is where unknown codes turn into NOT_SUPPORTED.

use embedded_graphics::pixelcolor::{Rgb888, RgbColor};

use crate::config::VECTOR_SIZE;
use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Aio,
    I2c,
    Lcd,
    Sensor,
    Classifier,
    /// Free-slot sentinel; never carried by a live message.
    Done,
}

// ---------------------------------------------------------------------------
// Operation codes
// ---------------------------------------------------------------------------
macro_rules! op_codes {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl From<$name> for u32 {
            fn from(op: $name) -> u32 {
                op as u32
            }
        }

        impl TryFrom<u32> for $name {
            type Error = u32;

            fn try_from(raw: u32) -> Result<Self, u32> {
                match raw {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}

op_codes!(
    /// Analog input operations.
    AioOp {
        Open = 0x00,
        PinRead = 0x01,
        PinAbort = 0x02,
        PinClose = 0x03,
        PinSubscribe = 0x04,
        PinUnsubscribe = 0x05,
        PinEventValueChange = 0x06,
    }
);

op_codes!(
    I2cOp {
        Open = 0x00,
        Write = 0x01,
        WriteBit = 0x02,
        Read = 0x03,
        BurstRead = 0x04,
        Transfer = 0x05,
    }
);

op_codes!(
    /// Character LCD operations.
    LcdOp {
        Init = 0x00,
        Print = 0x01,
        Clear = 0x02,
        SetCursorPos = 0x03,
        SetColor = 0x04,
        SelectColor = 0x05,
        SetFunction = 0x06,
        GetFunction = 0x07,
        SetDisplayState = 0x08,
        GetDisplayState = 0x09,
        SetInputState = 0x0A,
        GetInputState = 0x0B,
    }
);

op_codes!(
    SensorOp {
        Init = 0x00,
        Start = 0x01,
        Stop = 0x02,
        EventReadingChange = 0x03,
    }
);

op_codes!(
    /// Pattern classifier operations.
    ClassifierOp {
        Init = 0x00,
        LearnTest = 0x01,
        ClassifyTest = 0x02,
        LearnImu = 0x03,
        ClassifyImu = 0x04,
        ReadNeurons = 0x05,
        Stop = 0x06,
    }
);

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AioData {
    pub pin: u32,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct I2cData {
    pub bus: u8,
    pub address: u16,
    /// Start register for burst reads.
    pub register: u8,
    /// Bytes to read; writes use `data.len()`.
    pub length: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcdData {
    pub text: Option<String>,
    pub col: u8,
    pub row: u8,
    pub color: Rgb888,
    /// Argument of select/set operations, result of get operations.
    pub value: u8,
}

impl Default for LcdData {
    fn default() -> Self {
        Self {
            text: None,
            col: 0,
            row: 0,
            color: Rgb888::BLACK,
            value: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    AccelXyz,
    GyroXyz,
    Temp,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    Xyz { x: f64, y: f64, z: f64 },
    Scalar(f64),
}

impl Default for SensorReading {
    fn default() -> Self {
        SensorReading::Scalar(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorData {
    pub channel: SensorChannel,
    /// Sampling (triggered) or polling frequency in Hz.
    pub frequency: u32,
    /// ADC pin for the light channel.
    pub pin: u32,
    /// Driver name the request is addressed to (`bmi160`, `ADC_0`).
    pub controller: String,
    pub reading: SensorReading,
}

impl SensorData {
    pub fn new(channel: SensorChannel, controller: &str) -> Self {
        Self {
            channel,
            frequency: 0,
            pin: 0,
            controller: controller.to_string(),
            reading: SensorReading::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierData {
    pub vector: [u8; VECTOR_SIZE],
    /// Number of meaningful bytes in `vector`, or a neuron count in replies.
    pub count: usize,
    pub category: u16,
}

impl Default for ClassifierData {
    fn default() -> Self {
        Self {
            vector: [0; VECTOR_SIZE],
            count: 0,
            category: 0,
        }
    }
}

impl ClassifierData {
    /// Payload carrying a short test vector.
    pub fn with_vector(values: &[u8], category: u16) -> Self {
        let mut data = Self::default();
        let len = values.len().min(VECTOR_SIZE);
        data.vector[..len].copy_from_slice(&values[..len]);
        data.count = len;
        data.category = category;
        data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Aio(AioData),
    I2c(I2cData),
    Lcd(LcdData),
    Sensor(SensorData),
    Classifier(ClassifierData),
}

impl Payload {
    pub fn channel(&self) -> ChannelId {
        match self {
            Payload::Aio(_) => ChannelId::Aio,
            Payload::I2c(_) => ChannelId::I2c,
            Payload::Lcd(_) => ChannelId::Lcd,
            Payload::Sensor(_) => ChannelId::Sensor,
            Payload::Classifier(_) => ChannelId::Classifier,
        }
    }
}

impl From<AioData> for Payload {
    fn from(data: AioData) -> Self {
        Payload::Aio(data)
    }
}

impl From<I2cData> for Payload {
    fn from(data: I2cData) -> Self {
        Payload::I2c(data)
    }
}

impl From<LcdData> for Payload {
    fn from(data: LcdData) -> Self {
        Payload::Lcd(data)
    }
}

impl From<SensorData> for Payload {
    fn from(data: SensorData) -> Self {
        Payload::Sensor(data)
    }
}

impl From<ClassifierData> for Payload {
    fn from(data: ClassifierData) -> Self {
        Payload::Classifier(data)
    }
}

// ---------------------------------------------------------------------------
// Message record
// ---------------------------------------------------------------------------

/// Replaces the `{ERROR, SYNC}` flag bits of the wire record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    SyncRequest,
    Reply,
    ErrorReply,
}

/// Correlates a synchronous request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallToken(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub operation: u32,
    pub kind: MessageKind,
    pub error: ErrorCode,
    pub token: Option<CallToken>,
    pub payload: Payload,
}

impl Message {
    /// Fire-and-forget request (also used for unsolicited events).
    pub fn request(operation: impl Into<u32>, payload: impl Into<Payload>) -> Self {
        Self {
            operation: operation.into(),
            kind: MessageKind::Request,
            error: ErrorCode::None,
            token: None,
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.payload.channel()
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageKind::Reply | MessageKind::ErrorReply)
    }

    /// Turn a processed request into a success reply, keeping its token.
    pub fn mark_reply(&mut self) {
        self.kind = MessageKind::Reply;
        self.error = ErrorCode::None;
    }

    pub fn mark_error(&mut self, code: ErrorCode) {
        self.kind = MessageKind::ErrorReply;
        self.error = code;
    }

    pub fn aio(&self) -> Option<&AioData> {
        match &self.payload {
            Payload::Aio(data) => Some(data),
            _ => None,
        }
    }

    pub fn i2c(&self) -> Option<&I2cData> {
        match &self.payload {
            Payload::I2c(data) => Some(data),
            _ => None,
        }
    }

    pub fn lcd(&self) -> Option<&LcdData> {
        match &self.payload {
            Payload::Lcd(data) => Some(data),
            _ => None,
        }
    }

    pub fn sensor(&self) -> Option<&SensorData> {
        match &self.payload {
            Payload::Sensor(data) => Some(data),
            _ => None,
        }
    }

    pub fn classifier(&self) -> Option<&ClassifierData> {
        match &self.payload {
            Payload::Classifier(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_follows_payload() {
        let msg = Message::request(SensorOp::Start, SensorData::new(SensorChannel::Temp, "bmi160"));
        assert_eq!(msg.channel(), ChannelId::Sensor);
        assert_eq!(msg.operation, u32::from(SensorOp::Start));
        assert_eq!(msg.kind, MessageKind::Request);
        assert!(msg.sensor().is_some());
        assert!(msg.aio().is_none());
    }

    #[test]
    fn unknown_operation_code_is_rejected() {
        assert_eq!(LcdOp::try_from(0x0B), Ok(LcdOp::GetInputState));
        assert_eq!(LcdOp::try_from(0x0C), Err(0x0C));
        assert_eq!(ClassifierOp::try_from(6), Ok(ClassifierOp::Stop));
    }

    #[test]
    fn reply_marking_keeps_token() {
        let mut msg = Message::request(AioOp::PinRead, AioData { pin: 10, value: 0 });
        msg.kind = MessageKind::SyncRequest;
        msg.token = Some(CallToken(7));

        msg.mark_error(ErrorCode::InvalidParameter);
        assert_eq!(msg.kind, MessageKind::ErrorReply);
        assert_eq!(msg.token, Some(CallToken(7)));

        msg.mark_reply();
        assert_eq!(msg.kind, MessageKind::Reply);
        assert_eq!(msg.error, ErrorCode::None);
        assert!(msg.is_reply());
    }

    #[test]
    fn test_vector_is_truncated_to_capacity() {
        let data = ClassifierData::with_vector(&[1, 2, 3, 4], 5);
        assert_eq!(data.count, 4);
        assert_eq!(&data.vector[..4], &[1, 2, 3, 4]);
        assert_eq!(data.category, 5);

        let long = vec![9u8; VECTOR_SIZE + 10];
        assert_eq!(ClassifierData::with_vector(&long, 0).count, VECTOR_SIZE);
    }
}
