use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality attached to a published tag value.
///
/// `Stale` is produced locally when the transport fails and the last known
/// value is re-published; it never comes off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityCode {
    Good,
    Uncertain,
    Bad,
    BadConfiguration,
    BadDeviceFailure,
    BadCommTimeout,
    BadDisabled,
    OutOfRange,
    Stale,
}

impl QualityCode {
    pub fn is_good(self) -> bool {
        matches!(self, QualityCode::Good)
    }
}

impl fmt::Display for QualityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityCode::Good => "Good",
            QualityCode::Uncertain => "Uncertain",
            QualityCode::Bad => "Bad",
            QualityCode::BadConfiguration => "Bad_ConfigurationError",
            QualityCode::BadDeviceFailure => "Bad_DeviceFailure",
            QualityCode::BadCommTimeout => "Bad_CommTimeout",
            QualityCode::BadDisabled => "Bad_Disabled",
            QualityCode::OutOfRange => "Bad_OutOfRange",
            QualityCode::Stale => "Uncertain_Stale",
        };
        f.write_str(s)
    }
}

/// Fine-grained reason carried in bits 2..=5 of a raw quality word.
/// Only consulted when the major quality is not good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStatus {
    NonSpecific,
    ConfigurationError,
    DeviceFailure,
    CommTimeout,
    Disabled,
    Other(u16),
}

/// Raw tag quality word as reported by the relay.
///
/// Layout: bits 0..=1 limit, bits 2..=5 substatus, bits 6..=7 major quality,
/// bits 8..=15 vendor-specific rolling average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagQuality(pub u16);

const MAJOR_BAD: u16 = 0;
const MAJOR_UNCERTAIN: u16 = 1;
const MAJOR_GOOD: u16 = 3;

impl TagQuality {
    pub const GOOD: TagQuality = TagQuality(MAJOR_GOOD << 6);
    pub const UNCERTAIN: TagQuality = TagQuality(MAJOR_UNCERTAIN << 6);
    pub const BAD: TagQuality = TagQuality(0);

    fn major(self) -> u16 {
        (self.0 >> 6) & 0x3
    }

    pub fn substatus(self) -> SubStatus {
        match (self.0 >> 2) & 0xF {
            0 => SubStatus::NonSpecific,
            1 => SubStatus::ConfigurationError,
            3 => SubStatus::DeviceFailure,
            6 => SubStatus::CommTimeout,
            7 => SubStatus::Disabled,
            other => SubStatus::Other(other),
        }
    }

    /// Vendor-specific field, a rolling communication success average.
    pub fn vendor(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    /// Limit bits: 0 not limited, 1 low limited, 2 high limited, 3 constant.
    pub fn limit(self) -> u8 {
        (self.0 & 0x3) as u8
    }

    pub fn is_good(self) -> bool {
        self.major() == MAJOR_GOOD
    }

    /// Maps the raw word onto the published quality code. The substatus
    /// refines every non-good major; a good major ignores it.
    pub fn quality_code(self) -> QualityCode {
        let major = match self.major() {
            MAJOR_GOOD => return QualityCode::Good,
            MAJOR_UNCERTAIN => QualityCode::Uncertain,
            MAJOR_BAD => QualityCode::Bad,
            _ => QualityCode::OutOfRange,
        };
        match self.substatus() {
            SubStatus::ConfigurationError => QualityCode::BadConfiguration,
            SubStatus::DeviceFailure => QualityCode::BadDeviceFailure,
            SubStatus::CommTimeout => QualityCode::BadCommTimeout,
            SubStatus::Disabled => QualityCode::BadDisabled,
            _ => major,
        }
    }

    /// Decodes the textual quality names used by the live-data payload.
    /// Unrecognized names are treated as good, matching the relay's own
    /// default for tags that omit a quality.
    pub fn from_name(name: &str) -> TagQuality {
        match name {
            "good" | "initialGood" => TagQuality::GOOD,
            "uncertain" => TagQuality::UNCERTAIN,
            "bad" => TagQuality::BAD,
            "unknown" => TagQuality(2 << 6),
            _ => TagQuality::GOOD,
        }
    }
}

impl From<u16> for TagQuality {
    fn from(raw: u16) -> Self {
        TagQuality(raw)
    }
}
