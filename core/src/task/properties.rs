use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PropertyError;

/// Typed task configuration.
///
/// The four recognized keys live in fields; anything else set through
/// [`set`](Self::set) lands in `extra` and is only kept for display and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProperties {
    /// Display label.
    pub name: String,
    /// Root used when naming artifacts, e.g. the working directory prefix.
    pub basename: Option<String>,
    /// Concurrency weight, always >= 1.
    pub threads: usize,
    /// Replace existing files when staging and extracting.
    pub overwrite: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Default for TaskProperties {
    fn default() -> Self {
        Self {
            name: String::new(),
            basename: None,
            threads: 1,
            overwrite: true,
            extra: BTreeMap::new(),
        }
    }
}

impl TaskProperties {
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), PropertyError> {
        let invalid = |expected| PropertyError::InvalidValue {
            key: key.to_string(),
            expected,
        };

        match key {
            "name" => {
                self.name = value.as_str().ok_or_else(|| invalid("a string"))?.to_string();
            }
            "basename" => {
                self.basename = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    _ => return Err(invalid("a string or null")),
                };
            }
            "threads" => {
                let n = value
                    .as_u64()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| invalid("a positive integer"))?;
                self.threads = usize::try_from(n).map_err(|_| invalid("a positive integer"))?;
            }
            "overwrite" => {
                self.overwrite = value.as_bool().ok_or_else(|| invalid("a boolean"))?;
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "name" => Some(Value::from(self.name.clone())),
            "basename" => self.basename.clone().map(Value::from),
            "threads" => Some(Value::from(self.threads)),
            "overwrite" => Some(Value::from(self.overwrite)),
            _ => self.extra.get(key).cloned(),
        }
    }
}
