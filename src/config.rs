use alloc::format;
use alloc::string::String;
use core::time::Duration;

/// Identity the firmware reports from the `Version` call.
pub const FIRMWARE_NAME: &str = "MM-Ard";
pub const MIN_FIRMWARE_VERSION: u32 = 1;
pub const MAX_FIRMWARE_VERSION: u32 = 2;

/// Method answering `[name, version]`.
pub const VERSION_METHOD: &str = "Version";

/// Long enough for a board that was reset when the port opened.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Boards listen for a firmware upload for a moment after reset.
pub const STARTUP_DELAY: Duration = Duration::from_millis(2000);

pub const DEFAULT_SEQUENCE_CAPACITY: usize = 16;
pub const MAX_PACKET_SIZE: usize = 512;
pub const MAX_METHODS: usize = 48;
pub const METHOD_NAME_LEN: usize = 32;

/// What the host expects to find on the other end of the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub firmware_name: String,
    pub min_version: u32,
    pub max_version: u32,
    pub answer_timeout: Duration,
    pub startup_delay: Duration,
    /// Port parameters; `serial.answer_timeout` bounds the detection probe.
    pub serial: SerialSettings,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            firmware_name: FIRMWARE_NAME.into(),
            min_version: MIN_FIRMWARE_VERSION,
            max_version: MAX_FIRMWARE_VERSION,
            answer_timeout: DEFAULT_TIMEOUT,
            startup_delay: STARTUP_DELAY,
            serial: SerialSettings::default(),
        }
    }
}

impl HubConfig {
    pub fn accepts(&self, version: u32) -> bool {
        (self.min_version..=self.max_version).contains(&version)
    }
}

/// Port parameters handed to the host's serial manager before probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub handshaking: bool,
    pub stop_bits: u8,
    pub answer_timeout: Duration,
    pub delay_between_chars: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            baud_rate: 57600,
            handshaking: false,
            stop_bits: 1,
            answer_timeout: Duration::from_millis(500),
            delay_between_chars: Duration::ZERO,
        }
    }
}

impl SerialSettings {
    /// Settings as serial-manager property keys and values.
    pub fn pairs(&self) -> [(&'static str, String); 5] {
        [
            ("BaudRate", format!("{}", self.baud_rate)),
            (
                "Handshaking",
                String::from(if self.handshaking { "On" } else { "Off" }),
            ),
            ("StopBits", format!("{}", self.stop_bits)),
            (
                "AnswerTimeout",
                format!("{:.1}", self.answer_timeout.as_secs_f64() * 1000.0),
            ),
            (
                "DelayBetweenCharsMs",
                format!("{}", self.delay_between_chars.as_millis()),
            ),
        ]
    }
}
