use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{WireError, null_as_default};

/// A single flag value as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagType {
    Bool,
    Number,
    String,
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlagType::Bool => "a boolean",
            FlagType::Number => "a number",
            FlagType::String => "a string",
        })
    }
}

impl FlagValue {
    pub fn kind(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Bool,
            FlagValue::Number(_) => FlagType::Number,
            FlagValue::String(_) => FlagType::String,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value.into())
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("flag -{flag} expects {expected}, got {found}")]
pub struct FlagTypeError {
    pub flag: String,
    pub expected: FlagType,
    pub found: FlagType,
}

/// Flag map keyed by flag name without the leading dash.
///
/// Accessors project the value to the type the caller expects and fail on a
/// mismatch instead of coercing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(HashMap<String, FlagValue>);

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FlagValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn str(&self, name: &str) -> Result<Option<&str>, FlagTypeError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(FlagValue::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(mismatch(name, FlagType::String, other)),
        }
    }

    /// Absent boolean flags read as `false`.
    pub fn bool(&self, name: &str) -> Result<bool, FlagTypeError> {
        match self.0.get(name) {
            None => Ok(false),
            Some(FlagValue::Bool(value)) => Ok(*value),
            Some(other) => Err(mismatch(name, FlagType::Bool, other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, FlagTypeError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(FlagValue::Number(number)) => number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|value| value.fract() == 0.0 && value.is_finite())
                        .map(|value| value as i64)
                })
                .map(Some)
                .ok_or_else(|| FlagTypeError {
                    flag: name.to_string(),
                    expected: FlagType::Number,
                    found: FlagType::Number,
                }),
            Some(other) => Err(mismatch(name, FlagType::Number, other)),
        }
    }
}

fn mismatch(name: &str, expected: FlagType, found: &FlagValue) -> FlagTypeError {
    FlagTypeError {
        flag: name.to_string(),
        expected,
        found: found.kind(),
    }
}

/// One command invocation carried over the request/response channel.
///
/// Collection fields are optional on the wire; absent or `null` values decode
/// to empty collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub flags: Flags,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub caller_pane: String,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.flags.insert(name, value);
        self
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn caller(mut self, pane_id: impl Into<String>) -> Self {
        self.caller_pane = pane_id.into();
        self
    }

    /// Encodes the request as a single newline-terminated line.
    pub fn encode_line(&self) -> Result<Vec<u8>, WireError> {
        encode_line(self)
    }

    pub fn decode_line(line: &[u8]) -> Result<Self, WireError> {
        decode_line(line)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub exit_code: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stdout: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stderr: String,
}

impl Response {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn encode_line(&self) -> Result<Vec<u8>, WireError> {
        encode_line(self)
    }

    pub fn decode_line(line: &[u8]) -> Result<Self, WireError> {
        decode_line(line)
    }
}

fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn decode_line<T: for<'de> Deserialize<'de>>(line: &[u8]) -> Result<T, WireError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(serde_json::from_slice(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collections_decode_empty() {
        let request = Request::decode_line(br#"{"command":"list-sessions"}"#).expect("decode");
        assert_eq!(request.command, "list-sessions");
        assert!(request.flags.is_empty());
        assert!(request.args.is_empty());
        assert!(request.env.is_empty());
        assert!(request.caller_pane.is_empty());
    }

    #[test]
    fn null_collections_decode_empty() {
        let line = br#"{"command":"kill-pane","flags":null,"args":null,"env":null,"caller_pane":null}"#;
        let request = Request::decode_line(line).expect("decode");
        assert!(request.flags.is_empty());
        assert!(request.args.is_empty());
        assert!(request.env.is_empty());
    }

    #[test]
    fn mixed_flag_types_project_strictly() {
        let line = br#"{"command":"resize-pane","flags":{"t":"%1","x":40,"Z":true,"y":"12"}}"#;
        let request = Request::decode_line(line).expect("decode");
        assert_eq!(request.flags.str("t").unwrap(), Some("%1"));
        assert_eq!(request.flags.int("x").unwrap(), Some(40));
        assert!(request.flags.bool("Z").unwrap());
        assert!(!request.flags.bool("d").unwrap());

        let err = request.flags.int("y").expect_err("string is not a number");
        assert_eq!(err.expected, FlagType::Number);
        assert_eq!(err.found, FlagType::String);
        assert_eq!(err.to_string(), "flag -y expects a number, got a string");

        assert!(request.flags.str("x").is_err());
        assert!(request.flags.bool("t").is_err());
    }

    #[test]
    fn fractional_numbers_are_rejected_as_integers() {
        let request = Request::decode_line(br#"{"command":"x","flags":{"x":1.5,"y":3.0}}"#)
            .expect("decode");
        assert!(request.flags.int("x").is_err());
        assert_eq!(request.flags.int("y").unwrap(), Some(3));
    }

    #[test]
    fn empty_line_is_an_error() {
        assert!(matches!(Request::decode_line(b"  \n"), Err(WireError::Empty)));
        assert!(matches!(Request::decode_line(b"{not json"), Err(WireError::Json(_))));
    }

    #[test]
    fn response_line_is_newline_terminated() {
        let bytes = Response::failure(1, "can't find session: nope")
            .encode_line()
            .expect("encode");
        assert_eq!(bytes.last(), Some(&b'\n'));
        let decoded = Response::decode_line(&bytes).expect("decode");
        assert_eq!(decoded.exit_code, 1);
        assert_eq!(decoded.stderr, "can't find session: nope");
        assert!(decoded.stdout.is_empty());
    }
}
