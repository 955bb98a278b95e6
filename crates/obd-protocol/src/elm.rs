//! ELM327 AT command set and response framing

use std::fmt;

/// Reset the adapter
pub const RESET: &str = "ATZ";
/// Disable command echo
pub const ECHO_OFF: &str = "ATE0";
/// Disable linefeeds after carriage returns
pub const LINEFEEDS_OFF: &str = "ATL0";
/// Omit spaces between response bytes
pub const SPACES_OFF: &str = "ATS0";
/// Print message headers
pub const HEADERS_ON: &str = "ATH1";
/// Automatic protocol selection
pub const AUTO_PROTOCOL: &str = "ATSP0";
/// Describe the current protocol
pub const DESCRIBE_PROTOCOL: &str = "ATDP";
/// Print the adapter identity string
pub const IDENTIFY: &str = "ATI";
/// Read the supply voltage at the OBD socket
pub const READ_VOLTAGE: &str = "ATRV";

/// Prompt printed when the adapter is ready for the next command
pub const PROMPT: char = '>';

/// Tokens the adapter prints instead of data, compared with whitespace removed
pub const ERROR_TOKENS: &[&str] = &[
    "NODATA",
    "ERROR",
    "?",
    "UNABLETOCONNECT",
    "BUSBUSY",
    "STOPPED",
    "BUFFERFULL",
];

/// One step of the adapter setup sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Reset,
    EchoOff,
    LinefeedsOff,
    SpacesOff,
    HeadersOn,
    AutoProtocol,
    Identify,
    DescribeProtocol,
}

impl InitStep {
    /// Configuration commands, in the order they are issued
    pub const SETUP: [InitStep; 6] = [
        InitStep::Reset,
        InitStep::EchoOff,
        InitStep::LinefeedsOff,
        InitStep::SpacesOff,
        InitStep::HeadersOn,
        InitStep::AutoProtocol,
    ];

    /// AT command for this step
    pub fn command(&self) -> &'static str {
        match self {
            InitStep::Reset => RESET,
            InitStep::EchoOff => ECHO_OFF,
            InitStep::LinefeedsOff => LINEFEEDS_OFF,
            InitStep::SpacesOff => SPACES_OFF,
            InitStep::HeadersOn => HEADERS_ON,
            InitStep::AutoProtocol => AUTO_PROTOCOL,
            InitStep::Identify => IDENTIFY,
            InitStep::DescribeProtocol => DESCRIBE_PROTOCOL,
        }
    }

    /// Whether the adapter acknowledges this step with `OK`
    pub fn expects_ok(&self) -> bool {
        !matches!(
            self,
            InitStep::Reset | InitStep::Identify | InitStep::DescribeProtocol
        )
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStep::Reset => "reset",
            InitStep::EchoOff => "echo off",
            InitStep::LinefeedsOff => "linefeeds off",
            InitStep::SpacesOff => "spaces off",
            InitStep::HeadersOn => "headers on",
            InitStep::AutoProtocol => "auto protocol",
            InitStep::Identify => "identify",
            InitStep::DescribeProtocol => "describe protocol",
        };
        write!(f, "{} ({})", name, self.command())
    }
}

/// Strip the prompt, CR/LF, command echo and `SEARCHING...` progress lines
/// from a raw adapter response. Remaining lines are joined with `\n`.
pub fn clean_response(raw: &str, command: &str) -> String {
    raw.split(['\r', '\n'])
        .map(|line| line.replace(PROMPT, ""))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case(command))
        .filter(|line| !line.to_ascii_uppercase().starts_with("SEARCHING"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The first error token a response carries, if any
pub fn error_token(response: &str) -> Option<&'static str> {
    let compact: String = response
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    ERROR_TOKENS.iter().copied().find(|token| compact.contains(token))
}

/// Whether a response carries one of the adapter's error tokens
pub fn is_error_response(response: &str) -> bool {
    error_token(response).is_some()
}

/// Extract the firmware version from an identity banner such as `ELM327 v1.5`
pub fn parse_version(banner: &str) -> Option<String> {
    banner
        .lines()
        .map(str::trim)
        .find(|line| line.to_ascii_uppercase().contains("ELM"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_response_strips_framing() {
        let raw = "010C\r41 0C 1A F8\r\r>";
        assert_eq!(clean_response(raw, "010C"), "41 0C 1A F8");

        let raw = "SEARCHING...\r\n7E8 04 41 0D 3C\r\n>";
        assert_eq!(clean_response(raw, "010D"), "7E8 04 41 0D 3C");
    }

    #[test]
    fn test_clean_response_keeps_multiline() {
        let raw = "014\r0: 49 02 01 31 44 34\r1: 47 50 30 30 52 35 35\r\r>";
        assert_eq!(
            clean_response(raw, "0902"),
            "014\n0: 49 02 01 31 44 34\n1: 47 50 30 30 52 35 35"
        );
    }

    #[test]
    fn test_error_tokens() {
        assert!(is_error_response("NO DATA"));
        assert!(is_error_response("UNABLE TO CONNECT"));
        assert!(is_error_response("BUS BUSY"));
        assert!(is_error_response("CAN ERROR"));
        assert!(is_error_response("?"));
        assert!(!is_error_response("41 0C 1A F8"));
        assert!(!is_error_response("OK"));
        assert_eq!(error_token("NO DATA"), Some("NODATA"));
        assert_eq!(error_token("7E8 03 41 0D 3C"), None);
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("\nELM327 v1.5").as_deref(),
            Some("ELM327 v1.5")
        );
        assert_eq!(parse_version("OK"), None);
    }

    #[test]
    fn test_setup_sequence_order() {
        let commands: Vec<_> = InitStep::SETUP.iter().map(|s| s.command()).collect();
        assert_eq!(commands, vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH1", "ATSP0"]);
        assert!(!InitStep::Reset.expects_ok());
        assert!(InitStep::HeadersOn.expects_ok());
    }
}
