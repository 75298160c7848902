use serde::{Deserialize, Serialize};

use super::enums::PipelineStage;

/// Latest pipeline status for a consultation.
///
/// One record per consultation, overwritten on every stage transition;
/// readers only ever see the most recent state, never history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineProgress {
    pub consultation_id: String,
    pub stage: PipelineStage,
    pub progress_pct: u8,
    pub message: String,
}

impl PipelineProgress {
    pub fn new(consultation_id: &str, stage: PipelineStage, progress_pct: u8, message: &str) -> Self {
        Self {
            consultation_id: consultation_id.to_string(),
            stage,
            progress_pct,
            message: message.to_string(),
        }
    }
}
