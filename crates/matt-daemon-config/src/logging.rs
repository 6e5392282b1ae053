use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output format for the diagnostic stream written to stderr.
///
/// This only shapes `tracing` output. The journal at `log_path` always uses
/// the fixed, human-readable record layout.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Error returned when a [`LogFormat`] cannot be parsed from text.
pub type LogFormatParseError = strum::ParseError;
