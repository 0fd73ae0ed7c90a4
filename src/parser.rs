//! Parsing of training-progress file content.
//!
//! The trainer rewrites the file wholesale each epoch as
//! `<epoch>,<loss>,<accuracy>`. Parsing is pure; malformed content never
//! reaches the reporter.

use std::collections::HashMap;

use thiserror::Error;

/// Metric names under which the parsed fields are published.
pub const EPOCH_COUNTER: &str = "epoch.counter";
pub const EPOCH_LOSS: &str = "epoch.loss";
pub const EPOCH_ACCURACY: &str = "epoch.accuracy";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected 'epoch,loss,accuracy', got {0} field(s)")]
    FieldCount(usize),

    #[error("invalid epoch: {0:?}")]
    InvalidEpoch(String),

    #[error("invalid {field}: {value:?}")]
    InvalidFloat { field: &'static str, value: String },
}

/// Parse `"epoch,loss,accuracy"` into a complete metric mapping.
pub fn parse_metrics(content: &str) -> Result<HashMap<String, f64>, ParseError> {
    let fields: Vec<&str> = content.trim().split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(ParseError::FieldCount(fields.len()));
    }

    let epoch: i64 = fields[0]
        .parse()
        .map_err(|_| ParseError::InvalidEpoch(fields[0].to_string()))?;
    let loss: f64 = fields[1].parse().map_err(|_| ParseError::InvalidFloat {
        field: "loss",
        value: fields[1].to_string(),
    })?;
    let accuracy: f64 = fields[2].parse().map_err(|_| ParseError::InvalidFloat {
        field: "accuracy",
        value: fields[2].to_string(),
    })?;

    Ok(HashMap::from([
        (EPOCH_COUNTER.to_string(), epoch as f64),
        (EPOCH_LOSS.to_string(), loss),
        (EPOCH_ACCURACY.to_string(), accuracy),
    ]))
}
