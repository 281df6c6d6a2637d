use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel for `Max_duration_us` meaning the run has no time limit.
pub const NO_MAX_DURATION: i64 = -1;

/// What the script generator needs from a set of build rules.
///
/// The full record is serialized into the script verbatim; only the
/// application name and the duration limit are read directly.
pub trait RunRules: Serialize {
    fn name(&self) -> &str;
    fn max_duration_us(&self) -> i64;
}

/// One timing override. Timing documents are passed through to the
/// generated script untouched.
pub type Temporal = Value;

/// Build rules for the application under test, as read from a rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Max_duration_us", default = "default_max_duration")]
    pub max_duration_us: i64,
    /// Remaining rule fields (executors, callbacks, topics, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_duration() -> i64 {
    NO_MAX_DURATION
}

impl Rules {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, max_duration_us: i64) -> Self {
        Rules {
            name: name.into(),
            max_duration_us,
            extra: Map::new(),
        }
    }
}

impl RunRules for Rules {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_duration_us(&self) -> i64 {
        self.max_duration_us
    }
}
