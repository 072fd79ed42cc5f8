use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canvas::CanvasFormats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Creative,
    Product,
    Template,
}

impl PipelineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Creative => "creative",
            PipelineKind::Product => "product",
            PipelineKind::Template => "template",
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Processing` is the entry state; the other two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Processing)
    }
}

/// Why a run failed: a known business condition or an unexpected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Business,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    ClientError,
    ServerError,
}

impl ResponseClass {
    pub fn http_status(self) -> u16 {
        match self {
            ResponseClass::Success => 200,
            ResponseClass::ClientError => 400,
            ResponseClass::ServerError => 500,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ResponseClass::Success => 0,
            ResponseClass::ClientError => 2,
            ResponseClass::ServerError => 1,
        }
    }
}

/// Outward record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub pipeline: PipelineKind,
    pub status: RunStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub formats: CanvasFormats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_prompt: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl PipelineResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn response_class(&self) -> ResponseClass {
        match (self.status, self.failure) {
            (RunStatus::Completed, _) => ResponseClass::Success,
            (RunStatus::Failed, Some(FailureKind::Business)) => ResponseClass::ClientError,
            _ => ResponseClass::ServerError,
        }
    }
}

/// Writes `result` as pretty JSON with a `written_at` timestamp.
pub fn write_result(path: &Path, result: &PipelineResult) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(result)? {
        Value::Object(object) => object,
        other => anyhow::bail!("pipeline result serialized to non-object: {other}"),
    };
    payload.insert("written_at".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
