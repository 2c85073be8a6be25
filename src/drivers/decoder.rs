//! Line-level parsing of the meter's text output.
//!
//! The meter prints one reading per line in amps (`"0.00123"`, `"-1.2e-9"`). Status
//! messages share the stream and all start with `USB_LOGGING`.

/// Prefix shared by every diagnostic line the meter emits.
pub const CONTROL_PREFIX: &str = "USB_LOGGING";
/// Printed when streaming was switched off, usually by another process.
pub const LOGGING_DISABLED: &str = "USB_LOGGING_DISABLED";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// Streaming is off; the enable command has to be sent again.
    LoggingDisabled,
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodeResult {
    Sample(f64),
    Control(ControlSignal),
    Malformed(String),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LineDecoder;

impl LineDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, raw_line: &str) -> DecodeResult {
        if raw_line.starts_with(CONTROL_PREFIX) {
            let kind = if raw_line.starts_with(LOGGING_DISABLED) {
                ControlSignal::LoggingDisabled
            } else {
                ControlSignal::Other
            };
            return DecodeResult::Control(kind);
        }
        match raw_line.trim().parse::<f64>() {
            // inf/NaN are not readings
            Ok(value) if value.is_finite() => DecodeResult::Sample(value),
            _ => DecodeResult::Malformed(raw_line.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_lines_decode_to_samples() {
        let decoder = LineDecoder::new();
        for (line, expected) in [
            ("0.00123\r\n", 0.00123),
            ("1.5E-9\n", 1.5e-9),
            ("+2\n", 2.0),
            ("-3.25e-10", -3.25e-10),
            ("  42  ", 42.0),
        ] {
            assert_eq!(decoder.decode(line), DecodeResult::Sample(expected), "{line:?}");
        }
    }

    #[test]
    fn garbage_is_malformed() {
        let decoder = LineDecoder::new();
        let garbage = [
            "", "\r\n", "0.00.1", "12abc", "\u{fffd}\u{fffd}3", "inf", "NaN", "usb_logging",
        ];
        for line in garbage {
            assert_eq!(
                decoder.decode(line),
                DecodeResult::Malformed(line.to_owned()),
                "{line:?}"
            );
        }
    }

    #[test]
    fn control_lines() {
        let decoder = LineDecoder::new();
        assert_eq!(
            decoder.decode("USB_LOGGING_DISABLED\r\n"),
            DecodeResult::Control(ControlSignal::LoggingDisabled)
        );
        assert_eq!(
            decoder.decode("USB_LOGGING_ENABLED\r\n"),
            DecodeResult::Control(ControlSignal::Other)
        );
    }
}
