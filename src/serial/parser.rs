use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reply payload shapes the bridge understands.
///
/// The device answers every command with a single line. Known formats:
/// - `TEMP:<value>` temperature reading in degrees Celsius
/// - anything else non-empty is treated as opaque status text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReplyKind {
    Temperature(f64),
    StatusText(String),
    /// Payload present but unusable (for `TEMP:` lines that fail to
    /// parse, or empty text). The raw line is preserved on the Reply.
    Unrecognized,
}

/// One framed line from the device, classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub raw: String,
    pub kind: ReplyKind,
    pub received_at: DateTime<Utc>,
}

impl Reply {
    pub fn temperature(&self) -> Option<f64> {
        match self.kind {
            ReplyKind::Temperature(value) => Some(value),
            _ => None,
        }
    }
}

/// Classify one framed line. Never fails: a malformed payload degrades
/// to `Unrecognized` with the raw text preserved, so callers decide
/// whether that is an error.
pub fn parse_reply(line: &str) -> Reply {
    Reply {
        raw: line.to_string(),
        kind: classify(line),
        received_at: Utc::now(),
    }
}

fn classify(line: &str) -> ReplyKind {
    if line.is_empty() {
        return ReplyKind::Unrecognized;
    }

    if let Some(rest) = line.strip_prefix("TEMP:") {
        return match rest.trim().parse::<f64>() {
            Ok(value) => ReplyKind::Temperature(value),
            Err(_) => ReplyKind::Unrecognized,
        };
    }

    ReplyKind::StatusText(line.to_string())
}
