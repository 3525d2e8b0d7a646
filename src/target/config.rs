//! Config-block decoding shared by providers.
//!
//! A block is a YAML mapping of named fields. Providers pull the fields they
//! declare with defaults, then call [`ConfigBlock::finish`] so anything left
//! over is reported as unknown.
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use super::ConfigDecodeError;

pub struct ConfigBlock {
    fields: Mapping,
}

impl ConfigBlock {
    pub fn new(block: &Value) -> Result<Self, ConfigDecodeError> {
        match block {
            Value::Null => Ok(Self {
                fields: Mapping::new(),
            }),
            Value::Mapping(fields) => Ok(Self {
                fields: fields.clone(),
            }),
            other => Err(ConfigDecodeError::Malformed(format!(
                "expected a mapping, found {}",
                kind(other)
            ))),
        }
    }

    /// Remove and decode `name`, or return `default` when it is absent.
    pub fn take_or<T: DeserializeOwned>(
        &mut self,
        name: &str,
        default: T,
    ) -> Result<T, ConfigDecodeError> {
        match self.fields.remove(name) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => serde_yaml::from_value(value).map_err(|e| ConfigDecodeError::Field {
                field: name.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Like [`take_or`](Self::take_or) for counts that must be at least 1.
    pub fn take_positive(&mut self, name: &str, default: usize) -> Result<usize, ConfigDecodeError> {
        let value: usize = self.take_or(name, default)?;
        if value == 0 {
            return Err(ConfigDecodeError::Field {
                field: name.to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        Ok(value)
    }

    pub fn finish(self) -> Result<(), ConfigDecodeError> {
        match self.fields.keys().next() {
            None => Ok(()),
            Some(key) => Err(ConfigDecodeError::Field {
                field: key.as_str().unwrap_or("<non-string key>").to_string(),
                message: "unknown field".to_string(),
            }),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
