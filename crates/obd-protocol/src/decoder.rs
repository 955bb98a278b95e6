//! OBD-II Response Decoding
//!
//! Turns adapter hex text into typed values. Decoding never fails: malformed,
//! short or non-hex payloads produce a [`ParsedPidData`] whose value fields are
//! `None`, and the validator decides what to do with it.

use crate::command::DTC_PID;
use crate::mode;
use crate::timestamp_ms;
use serde::{Deserialize, Serialize};

/// Fixed length of a vehicle identification number
pub const VIN_LENGTH: usize = 17;

/// Decoded response for one mode+PID request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPidData {
    /// PID key ("0C", "02", "DTC")
    pub pid: String,
    /// Service/mode byte of the request
    pub mode: u8,
    /// Scaled numeric value
    pub numeric_value: Option<f64>,
    /// Text value (VIN, trouble codes, supported PID list)
    pub string_value: Option<String>,
    /// Payload bytes after the response header
    pub data_bytes: Vec<u8>,
    /// Response the payload was extracted from
    pub raw_response: String,
    /// Decode time (Unix ms)
    pub timestamp_ms: u64,
}

impl ParsedPidData {
    /// Whether any value could be decoded
    pub fn has_value(&self) -> bool {
        self.numeric_value.is_some() || self.string_value.is_some()
    }
}

/// Decode payload hex (header already removed) for a mode+PID.
///
/// `decode(0x01, "0C", "1AF8")` yields 1726 rpm.
pub fn decode(mode: u8, pid: &str, data_hex: &str) -> ParsedPidData {
    let data_bytes = parse_hex(data_hex).unwrap_or_default();
    build(mode, pid, data_bytes, data_hex.trim().to_string())
}

/// Decode a complete adapter response such as `41 0C 1A F8` or
/// `7E8 04 41 0C 1A F8`, locating the payload behind the response header.
pub fn decode_response(mode: u8, pid: &str, response: &str) -> ParsedPidData {
    let data_bytes = extract_payload(mode, pid, response).unwrap_or_default();
    build(mode, pid, data_bytes, response.trim().to_string())
}

fn build(mode: u8, pid: &str, data_bytes: Vec<u8>, raw_response: String) -> ParsedPidData {
    let pid = pid.trim().to_ascii_uppercase();
    let (numeric_value, string_value) = decode_value(mode, &pid, &data_bytes);
    ParsedPidData {
        pid,
        mode,
        numeric_value,
        string_value,
        data_bytes,
        raw_response,
        timestamp_ms: timestamp_ms(),
    }
}

fn decode_value(mode_byte: u8, pid: &str, bytes: &[u8]) -> (Option<f64>, Option<String>) {
    if bytes.is_empty() {
        return (None, None);
    }

    match mode_byte {
        mode::CURRENT_DATA | mode::FREEZE_FRAME => {
            let Ok(code) = u8::from_str_radix(pid, 16) else {
                return (None, None);
            };
            if code % 0x20 == 0 {
                return (None, decode_supported_pids(code, bytes));
            }
            (decode_numeric(code, bytes), None)
        }
        mode::READ_DTC | mode::PENDING_DTC | mode::PERMANENT_DTC => {
            (None, Some(decode_dtcs(bytes).join(",")))
        }
        mode::VEHICLE_INFO => match pid {
            "02" => (None, Some(decode_vin(bytes))),
            "04" | "0A" => {
                let text = decode_ascii(bytes).trim().to_string();
                (None, Some(text).filter(|t| !t.is_empty()))
            }
            _ => (None, None),
        },
        _ => (None, None),
    }
}

/// Apply the mode 01 formula for a PID; `None` for unknown PIDs or short data
pub fn decode_numeric(pid: u8, bytes: &[u8]) -> Option<f64> {
    let a = *bytes.first()? as f64;
    let ab = || bytes.get(1).map(|&b| a * 256.0 + b as f64);

    let value = match pid {
        // Engine load, throttle, fuel level: A * 100 / 255 (%)
        0x04 | 0x11 | 0x2F => a * 100.0 / 255.0,
        // Coolant, intake air, ambient, oil temperature: A - 40 (°C)
        0x05 | 0x0F | 0x46 | 0x5C => a - 40.0,
        // Short/Long fuel trim: (A - 128) * 100 / 128 (%)
        0x06 | 0x07 => (a - 128.0) * 100.0 / 128.0,
        // Fuel pressure: 3A (kPa)
        0x0A => a * 3.0,
        // Manifold pressure, speed, barometric pressure: A
        0x0B | 0x0D | 0x33 => a,
        // RPM: ((A*256)+B)/4
        0x0C => ab()? / 4.0,
        // Timing advance: A/2 - 64 (degrees before TDC)
        0x0E => a / 2.0 - 64.0,
        // MAF: ((A*256)+B) / 100 (g/s)
        0x10 => ab()? / 100.0,
        // O2 Voltage: A / 200 (V)
        0x14 => a / 200.0,
        // Run time, distance with MIL: (A*256)+B
        0x1F | 0x21 => ab()?,
        // Control module voltage: ((A*256)+B) / 1000 (V)
        0x42 => ab()? / 1000.0,
        _ => return None,
    };
    Some(value)
}

/// Expand a 4-byte supported-PID bitmask into a comma-separated PID list
fn decode_supported_pids(base: u8, bytes: &[u8]) -> Option<String> {
    if bytes.len() < 4 {
        return None;
    }
    let mask = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let pids: Vec<String> = (0..32u8)
        .filter(|bit| mask & (0x8000_0000 >> bit) != 0)
        .map(|bit| format!("{:02X}", base as u16 + bit as u16 + 1))
        .collect();
    Some(pids.join(","))
}

/// Decode a single trouble code from its two bytes; `0000` is padding
pub fn decode_dtc(first: u8, second: u8) -> Option<String> {
    if first == 0 && second == 0 {
        return None;
    }
    let prefix = match first >> 6 {
        0b00 => 'P',
        0b01 => 'C',
        0b10 => 'B',
        _ => 'U',
    };
    Some(format!("{}{:01X}{:02X}", prefix, first & 0x3F, second))
}

/// Decode every trouble code in a mode 03/07/0A payload.
///
/// CAN adapters prefix the payload with a code count, which makes its length
/// odd; that byte is skipped.
pub fn decode_dtcs(bytes: &[u8]) -> Vec<String> {
    let pairs = if bytes.len() % 2 == 1 { &bytes[1..] } else { bytes };
    pairs
        .chunks_exact(2)
        .filter_map(|pair| decode_dtc(pair[0], pair[1]))
        .collect()
}

/// Keep the printable ASCII characters (32–126) of a payload
pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| (32..=126).contains(*b))
        .map(|&b| b as char)
        .collect()
}

/// Decode a VIN, truncated or space-padded to exactly 17 characters
pub fn decode_vin(bytes: &[u8]) -> String {
    let text = decode_ascii(bytes);
    let text = text.trim();
    // VINs are left-padded with zero bytes on some ECUs; keep the last 17
    let skip = text.chars().count().saturating_sub(VIN_LENGTH);
    let vin: String = text.chars().skip(skip).collect();
    format!("{:<width$}", vin, width = VIN_LENGTH)
}

/// Parse hex text into bytes, ignoring whitespace. `None` for odd length or
/// non-hex characters.
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let compact: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if compact.len() % 2 != 0 {
        return None;
    }
    compact
        .chunks_exact(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Response header bytes expected for a request
fn response_header(mode: u8, pid: &str) -> Option<Vec<u8>> {
    let reply = mode.checked_add(0x40)?;
    if pid.eq_ignore_ascii_case(DTC_PID) {
        return Some(vec![reply]);
    }
    let pid = u8::from_str_radix(pid.trim(), 16).ok()?;
    Some(vec![reply, pid])
}

/// Payload of one response line and whether it continues a previous frame
struct LinePayload {
    bytes: Vec<u8>,
    continuation: bool,
}

fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_hexdigit())
}

/// Strip ISO-TP protocol control information from a CAN frame body
fn strip_pci(frame: Vec<u8>) -> LinePayload {
    if frame.is_empty() {
        return LinePayload { bytes: frame, continuation: false };
    }
    let pci = frame[0];
    match pci >> 4 {
        // Single frame: low nibble is the length
        0x0 => {
            let len = (pci & 0x0F) as usize;
            let end = (1 + len).min(frame.len());
            LinePayload { bytes: frame[1..end].to_vec(), continuation: false }
        }
        // First frame: 12-bit length over two bytes
        0x1 => LinePayload {
            bytes: frame.get(2..).map(<[u8]>::to_vec).unwrap_or_default(),
            continuation: false,
        },
        // Consecutive frame
        0x2 => LinePayload { bytes: frame[1..].to_vec(), continuation: true },
        _ => LinePayload { bytes: frame, continuation: false },
    }
}

fn line_payload(line: &str) -> Option<LinePayload> {
    let line = line.trim();

    // "0: 49 02 01 ..." multi-frame index printed when headers are off
    if let Some((index, rest)) = line.split_once(':') {
        if is_hex(index.trim()) && index.trim().len() == 1 {
            return parse_hex(rest).map(|bytes| LinePayload { bytes, continuation: true });
        }
        return None;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() > 1 {
        // "7E8 04 41 0C 1A F8": 11-bit CAN identifier then PCI
        if tokens[0].len() == 3 && is_hex(tokens[0]) {
            return parse_hex(&tokens[1..].concat()).map(strip_pci);
        }
        // "18 DA F1 10 04 41 0C ...": 29-bit CAN identifier then PCI
        if tokens.len() > 4 && tokens[0].eq_ignore_ascii_case("18") && tokens[1].eq_ignore_ascii_case("DA") {
            return parse_hex(&tokens[4..].concat()).map(strip_pci);
        }
        return parse_hex(line).map(|bytes| LinePayload { bytes, continuation: false });
    }

    if !is_hex(line) {
        return None;
    }
    // A bare three-digit line is the total byte count of a multi-frame reply
    if line.len() == 3 {
        return None;
    }
    // Spaces off with an 11-bit header: "7E804410C1AF8"
    if line.len() % 2 == 1 {
        return line.get(3..).and_then(parse_hex).map(strip_pci);
    }
    if line.len() > 10 && line[..4].eq_ignore_ascii_case("18DA") {
        return parse_hex(&line[8..]).map(strip_pci);
    }
    parse_hex(line).map(|bytes| LinePayload { bytes, continuation: false })
}

/// Collect the payload behind the `mode+0x40, pid` header across all lines of
/// a response. Lines repeating the header contribute their data; index-prefixed
/// and CAN consecutive frames extend the payload found so far.
pub fn extract_payload(mode: u8, pid: &str, response: &str) -> Option<Vec<u8>> {
    let header = response_header(mode, pid)?;
    let mut data = Vec::new();
    let mut found = false;

    for line in response.split(['\r', '\n']) {
        let line = line.replace(crate::elm::PROMPT, "");
        if line.trim().is_empty() {
            continue;
        }
        let Some(payload) = line_payload(&line) else {
            continue;
        };

        let position = payload
            .bytes
            .windows(header.len())
            .position(|window| window == header.as_slice());
        match position {
            Some(pos) if !payload.continuation || !found => {
                found = true;
                data.extend_from_slice(&payload.bytes[pos + header.len()..]);
            }
            _ if found && payload.continuation => data.extend_from_slice(&payload.bytes),
            _ => {}
        }
    }

    found.then_some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn value(data: &ParsedPidData) -> f64 {
        data.numeric_value.unwrap()
    }

    #[test]
    fn test_rpm_decode() {
        // ((0x1A * 256) + 0xF8) / 4 = 6904 / 4 = 1726
        let parsed = decode(0x01, "0C", "1AF8");
        assert!((value(&parsed) - 1726.0).abs() < 1e-9);
        assert_eq!(parsed.data_bytes, vec![0x1A, 0xF8]);
    }

    #[test]
    fn test_speed_and_coolant_decode() {
        assert!((value(&decode(0x01, "0D", "3C")) - 60.0).abs() < 1e-9);
        // 0x5F = 95, so 95 - 40 = 55°C
        assert!((value(&decode(0x01, "05", "5F")) - 55.0).abs() < 1e-9);
        assert!((value(&decode(0x01, "0F", "00")) + 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentage_decodes() {
        assert!((value(&decode(0x01, "04", "FF")) - 100.0).abs() < 1e-9);
        assert!((value(&decode(0x01, "11", "80")) - 50.196).abs() < 0.001);
        assert!((value(&decode(0x01, "2F", "00"))).abs() < 1e-9);
    }

    #[test]
    fn test_fuel_trim_signedness() {
        assert!((value(&decode(0x01, "06", "00")) + 100.0).abs() < 1e-9);
        assert!(value(&decode(0x01, "07", "80")).abs() < 1e-9);
        assert!((value(&decode(0x01, "06", "FF")) - 99.21875).abs() < 1e-9);
    }

    #[test]
    fn test_maf_and_pressure_decode() {
        assert!((value(&decode(0x01, "10", "FFFF")) - 655.35).abs() < 1e-9);
        assert!((value(&decode(0x01, "0B", "65")) - 101.0).abs() < 1e-9);
        assert!((value(&decode(0x01, "42", "3A98")) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_and_malformed_payloads() {
        assert_eq!(decode(0x01, "0C", "1A").numeric_value, None);
        assert_eq!(decode(0x01, "0C", "ZZZZ").numeric_value, None);
        assert_eq!(decode(0x01, "0C", "1AF").numeric_value, None);
        assert_eq!(decode(0x01, "0C", "").numeric_value, None);
        assert_eq!(decode(0x01, "FF", "12").numeric_value, None);
        assert!(!decode(0x01, "0C", "NO DATA").has_value());
    }

    #[test]
    fn test_truncated_single_character_lines() {
        for line in ["5", "A", "5\r>", "41 0C\r7"] {
            let parsed = decode_response(0x01, "0C", line);
            assert!(parsed.numeric_value.is_none(), "{:?}", line);
        }
        assert!(extract_payload(0x01, "0C", "F").is_none());
    }

    #[test]
    fn test_response_with_and_without_headers() {
        let plain = decode_response(0x01, "0C", "41 0C 1A F8");
        assert!((value(&plain) - 1726.0).abs() < 1e-9);

        let spaced_header = decode_response(0x01, "0C", "7E8 04 41 0C 1A F8");
        assert!((value(&spaced_header) - 1726.0).abs() < 1e-9);

        let compact_header = decode_response(0x01, "0D", "7E803410D3C");
        assert!((value(&compact_header) - 60.0).abs() < 1e-9);

        let extended = decode_response(0x01, "05", "18DAF1100341055F");
        assert!((value(&extended) - 55.0).abs() < 1e-9);

        let prompt = decode_response(0x01, "0D", "41 0D 3C\r\r>");
        assert!((value(&prompt) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_rpm_boundaries() {
        assert_eq!(decode_response(0x01, "0C", "41 0C 00 00").numeric_value, Some(0.0));
        assert_eq!(
            decode_response(0x01, "0C", "41 0C FF FF").numeric_value,
            Some(16383.75)
        );
    }

    #[test]
    fn test_error_response_has_no_payload() {
        let parsed = decode_response(0x01, "0C", "NO DATA");
        assert!(parsed.data_bytes.is_empty());
        assert!(!parsed.has_value());
        assert_eq!(parsed.raw_response, "NO DATA");
    }

    #[test]
    fn test_dtc_decoding() {
        assert_eq!(decode_dtc(0x01, 0x33).as_deref(), Some("P0133"));
        assert_eq!(decode_dtc(0x41, 0x23).as_deref(), Some("C0123"));
        assert_eq!(decode_dtc(0x92, 0x34).as_deref(), Some("B1234"));
        assert_eq!(decode_dtc(0xC1, 0x00).as_deref(), Some("U0100"));
        assert_eq!(decode_dtc(0x00, 0x00), None);

        let parsed = decode_response(0x03, DTC_PID, "43 01 33 00 00 00 00");
        assert_eq!(parsed.string_value.as_deref(), Some("P0133"));

        // CAN reply carrying a count byte
        let parsed = decode_response(0x03, DTC_PID, "7E8 06 43 02 01 71 03 00");
        assert_eq!(parsed.string_value.as_deref(), Some("P0171,P0300"));
    }

    #[test]
    fn test_vin_multiframe_without_headers() {
        let response = "014\n0: 49 02 01 31 44 34\n1: 47 50 30 30 52 35 35\n2: 42 31 32 33 34 35 36";
        let parsed = decode_response(0x09, "02", response);
        assert_eq!(parsed.string_value.as_deref(), Some("1D4GP00R55B123456"));
    }

    #[test]
    fn test_vin_multiframe_with_headers() {
        let response = "7E8 10 14 49 02 01 31 44 34\n7E8 21 47 50 30 30 52 35 35\n7E8 22 42 31 32 33 34 35 36";
        let parsed = decode_response(0x09, "02", response);
        assert_eq!(parsed.string_value.as_deref(), Some("1D4GP00R55B123456"));
    }

    #[test]
    fn test_vin_legacy_protocol_lines() {
        let response = "49 02 01 00 00 00 31\n49 02 02 44 34 47 50\n49 02 03 30 30 52 35\n49 02 04 35 42 31 32\n49 02 05 33 34 35 36";
        let parsed = decode_response(0x09, "02", response);
        assert_eq!(parsed.string_value.as_deref(), Some("1D4GP00R55B123456"));
    }

    #[test]
    fn test_vin_padding_and_truncation() {
        assert_eq!(decode_vin(b"ABC"), format!("{:<17}", "ABC"));
        assert_eq!(decode_vin(b"XX1D4GP00R55B123456"), "1D4GP00R55B123456");
    }

    #[test]
    fn test_supported_pids() {
        let parsed = decode_response(0x01, "00", "41 00 BE 1F A8 13");
        let list = parsed.string_value.unwrap();
        assert!(list.starts_with("01,03,04,05,06,07"));
        assert!(list.contains("0C"));
        assert!(list.ends_with("20"));
    }

    #[test]
    fn test_calibration_id() {
        let parsed = decode(0x09, "04", "01 4A 4D 42 2A 00 00");
        assert_eq!(parsed.string_value.as_deref(), Some("JMB*"));
    }

    proptest! {
        #[test]
        fn prop_decoder_never_panics(mode in 0u8..0x0B, pid in "[0-9A-F]{2}", data in ".{0,40}") {
            let _ = decode(mode, &pid, &data);
            let _ = decode_response(mode, &pid, &data);
        }

        #[test]
        fn prop_short_hex_lines_never_panic(lines in proptest::collection::vec("[0-9A-F]{1,5}", 1..4)) {
            let response = lines.join("\r");
            let parsed = decode_response(0x01, "0C", &response);
            prop_assert!(parsed.numeric_value.is_none() || response.contains("410C"));
        }

        #[test]
        fn prop_rpm_within_range(a in any::<u8>(), b in any::<u8>()) {
            let parsed = decode(0x01, "0C", &format!("{:02X}{:02X}", a, b));
            let rpm = parsed.numeric_value.unwrap();
            prop_assert!((0.0..=16383.75).contains(&rpm));
        }
    }
}
