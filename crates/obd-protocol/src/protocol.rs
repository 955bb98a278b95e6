//! OBD-II Protocol Definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// OBD-II protocols an ELM327 can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
    /// SAE J1939 CAN (29 bit ID, 250 kbaud)
    SaeJ1939,
}

impl ObdProtocol {
    /// Get the ELM327 AT command that selects this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141_2 => "ATSP3",
            ObdProtocol::Iso14230_4Kwp => "ATSP4",
            ObdProtocol::Iso14230_4KwpFast => "ATSP5",
            ObdProtocol::Iso15765_4Can11bit500 => "ATSP6",
            ObdProtocol::Iso15765_4Can29bit500 => "ATSP7",
            ObdProtocol::Iso15765_4Can11bit250 => "ATSP8",
            ObdProtocol::Iso15765_4Can29bit250 => "ATSP9",
            ObdProtocol::SaeJ1939 => "ATSPA",
        }
    }

    /// Parse the text printed by `ATDP`, e.g. `AUTO, ISO 15765-4 (CAN 11/500)`.
    ///
    /// A bare `AUTO` means no vehicle protocol has been negotiated yet.
    pub fn from_description(description: &str) -> Option<Self> {
        let text = description.trim().to_ascii_uppercase();
        if text.is_empty() {
            return None;
        }

        let detail = text.strip_prefix("AUTO").map(|rest| rest.trim_start_matches(',').trim());
        let text = match detail {
            Some("") => return Some(ObdProtocol::Auto),
            Some(rest) => rest,
            None => text.as_str(),
        };

        let protocol = if text.contains("J1850 PWM") {
            ObdProtocol::J1850Pwm
        } else if text.contains("J1850 VPW") {
            ObdProtocol::J1850Vpw
        } else if text.contains("9141") {
            ObdProtocol::Iso9141_2
        } else if text.contains("14230") && text.contains("FAST") {
            ObdProtocol::Iso14230_4KwpFast
        } else if text.contains("14230") {
            ObdProtocol::Iso14230_4Kwp
        } else if text.contains("J1939") {
            ObdProtocol::SaeJ1939
        } else if text.contains("11/500") {
            ObdProtocol::Iso15765_4Can11bit500
        } else if text.contains("29/500") {
            ObdProtocol::Iso15765_4Can29bit500
        } else if text.contains("11/250") {
            ObdProtocol::Iso15765_4Can11bit250
        } else if text.contains("29/250") {
            ObdProtocol::Iso15765_4Can29bit250
        } else {
            return None;
        };
        Some(protocol)
    }
}

impl Default for ObdProtocol {
    fn default() -> Self {
        ObdProtocol::Auto
    }
}

impl fmt::Display for ObdProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObdProtocol::Auto => "AUTO",
            ObdProtocol::J1850Pwm => "SAE J1850 PWM",
            ObdProtocol::J1850Vpw => "SAE J1850 VPW",
            ObdProtocol::Iso9141_2 => "ISO 9141-2",
            ObdProtocol::Iso14230_4Kwp => "ISO 14230-4 (KWP 5BAUD)",
            ObdProtocol::Iso14230_4KwpFast => "ISO 14230-4 (KWP FAST)",
            ObdProtocol::Iso15765_4Can11bit500 => "ISO 15765-4 (CAN 11/500)",
            ObdProtocol::Iso15765_4Can29bit500 => "ISO 15765-4 (CAN 29/500)",
            ObdProtocol::Iso15765_4Can11bit250 => "ISO 15765-4 (CAN 11/250)",
            ObdProtocol::Iso15765_4Can29bit250 => "ISO 15765-4 (CAN 29/250)",
            ObdProtocol::SaeJ1939 => "SAE J1939 (CAN 29/250)",
        };
        f.write_str(name)
    }
}
