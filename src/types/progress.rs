//! Load progress types
//!
//! One `ProgressEvent` per frame of the `/v1/model/load` stream.

use serde::{Deserialize, Deserializer, Serialize};

/// Status value marking the end of one model's load
pub const FINISHED_STATUS: &str = "finished";

/// Which model of a load request a callback refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadPhase {
    Primary,
    Draft,
}

impl LoadPhase {
    /// Phase implied by how many terminal events were already observed
    pub fn from_completed(completed: u8) -> Self {
        if completed == 0 {
            LoadPhase::Primary
        } else {
            LoadPhase::Draft
        }
    }
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPhase::Primary => write!(f, "primary model"),
            LoadPhase::Draft => write!(f, "draft model"),
        }
    }
}

/// One decoded progress frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Current step
    #[serde(deserialize_with = "step_value")]
    pub module: u64,
    /// Total steps
    #[serde(deserialize_with = "step_value")]
    pub modules: u64,
    #[serde(default)]
    pub status: String,
    /// `"model"` or `"draft"` on servers that send it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
}

impl ProgressEvent {
    pub fn is_finished(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(FINISHED_STATUS)
    }

    /// Percentage of steps done, rounded down
    pub fn percent(&self) -> Result<u8, String> {
        if self.modules == 0 {
            return Err("Progress frame has zero total steps".to_string());
        }
        if self.module > self.modules {
            return Err(format!(
                "Progress step {} exceeds total {}",
                self.module, self.modules
            ));
        }
        Ok((self.module.saturating_mul(100) / self.modules) as u8)
    }
}

/// Servers have sent step counters both as numbers and as numeric strings
fn step_value<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Step {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Step::deserialize(deserializer)? {
        Step::Int(n) => Ok(n),
        Step::Float(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        Step::Float(f) => Err(serde::de::Error::custom(format!(
            "invalid step value {}",
            f
        ))),
        Step::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid step value '{}'", s))),
    }
}
