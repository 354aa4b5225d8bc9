//! The `export-report.json` summary written into every export archive.

use adcraft_render::CaptureQuality;
use adcraft_schema::{ProductId, Size, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Static,
    Dpa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Files written without rendering.
    Exported,
    Rendered,
    /// Rendered, but the ready flag never appeared.
    Degraded,
    Failed,
}

impl JobStatus {
    pub fn from_quality(quality: CaptureQuality) -> Self {
        match quality {
            CaptureQuality::Ready => JobStatus::Rendered,
            CaptureQuality::Degraded => JobStatus::Degraded,
        }
    }

    pub fn is_success(self) -> bool {
        !matches!(self, JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductId>,
    pub size: Size,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub kind: ExportKind,
    pub template: TemplateId,
    pub created_at: DateTime<Utc>,
    pub jobs: Vec<JobRecord>,
}

impl ExportReport {
    pub fn new(kind: ExportKind, template: TemplateId) -> Self {
        Self {
            kind,
            template,
            created_at: Utc::now(),
            jobs: Vec::new(),
        }
    }

    pub fn push(&mut self, record: JobRecord) {
        self.jobs.push(record);
    }

    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }

    pub fn degraded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Degraded)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.iter().filter(|j| !j.status.is_success())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}
