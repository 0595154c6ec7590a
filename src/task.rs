//! The task record: identity, configuration, lifecycle timestamps, and outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, unique within the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Output image format requested for a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Svg,
    Pdf,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "svg" => Some(Self::Svg),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Svg => "image/svg+xml",
            Self::Pdf => "application/pdf",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Png
    }
}

/// The declarative chart description and render options submitted by a client.
///
/// `output_type`, `width`, and `height` are kept in their raw wire form
/// (a string and signed integers) rather than the stricter `OutputFormat`/
/// `u32` types, so an out-of-range or malformed submission still
/// deserializes successfully and surfaces as a `ServiceError::Validation`
/// from `validate()` instead of an opaque extractor-level rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// The ECharts-style option object; opaque to the engine beyond its
    /// series/dataset presence, which the rasterizer validates.
    pub option: serde_json::Value,
    #[serde(default, rename = "type")]
    pub output_type: Option<String>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub oss_path: Option<String>,
}

impl ChartConfig {
    /// Validates submission bounds, returning every violation found (not
    /// just the first) — type, then option shape, then dimensions.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if let Some(raw) = &self.output_type {
            if OutputFormat::parse(raw).is_none() {
                violations.push(format!(
                    "type must be one of png, jpeg, jpg, svg, pdf, got '{raw}'"
                ));
            }
        }

        if !self.option.is_object() {
            violations.push("option must be a JSON object".to_string());
        }

        if let Some(width) = self.width {
            if !(1..=4000).contains(&width) {
                violations.push(format!("width={width} out of range [1, 4000]"));
            }
        }
        if let Some(height) = self.height {
            if !(1..=4000).contains(&height) {
                violations.push(format!("height={height} out of range [1, 4000]"));
            }
        }

        violations
    }

    pub fn output_type(&self) -> OutputFormat {
        self.output_type
            .as_deref()
            .and_then(OutputFormat::parse)
            .unwrap_or_default()
    }
}

/// Lifecycle state of a task. Carries no payload of its own; outcome data
/// lives alongside it on `TaskRecord` so a single record type models the
/// whole lifecycle (see the data model's field table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The mutable record tracking one submission through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub config: ChartConfig,
    pub state: TaskState,
    pub image_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl TaskRecord {
    pub fn new(config: ChartConfig) -> Self {
        Self {
            id: TaskId::new(),
            config,
            state: TaskState::Pending,
            image_url: None,
            file_name: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_reports_type_and_width_together() {
        let config = ChartConfig {
            option: json!({"series": []}),
            output_type: Some("invalid".to_string()),
            width: Some(-1),
            height: None,
            download: false,
            oss_path: None,
        };
        let violations = config.validate();
        assert!(violations.iter().any(|v| v.contains("type")));
        assert!(violations.iter().any(|v| v.contains("width")));
    }

    #[test]
    fn validate_accepts_a_well_formed_submission() {
        let config = ChartConfig {
            option: json!({"series": [{"type": "bar", "data": [1, 2, 3]}]}),
            output_type: Some("png".to_string()),
            width: Some(600),
            height: Some(400),
            download: false,
            oss_path: None,
        };
        assert!(config.validate().is_empty());
        assert_eq!(config.output_type(), OutputFormat::Png);
    }
}
