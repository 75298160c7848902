use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Consultation, PipelineProgress};

use super::PipelineError;

/// In-memory registry of consultations and their pipeline progress.
///
/// The orchestrator is the sole writer; readers may poll progress for one
/// consultation while a pipeline run mutates another. Values are cloned
/// out so no caller ever holds a lock across a collaborator call.
pub struct ConsultationStore {
    consultations: RwLock<HashMap<String, Consultation>>,
    progress: RwLock<HashMap<String, PipelineProgress>>,
}

impl ConsultationStore {
    pub fn new() -> Self {
        Self {
            consultations: RwLock::new(HashMap::new()),
            progress: RwLock::new(HashMap::new()),
        }
    }

    /// Register a newly started consultation.
    pub fn insert(&self, consultation: Consultation) -> Result<(), PipelineError> {
        let mut consultations = self
            .consultations
            .write()
            .map_err(|_| poisoned("consultation"))?;
        consultations.insert(consultation.id.clone(), consultation);
        Ok(())
    }

    /// Fetch a consultation snapshot by id.
    pub fn get(&self, consultation_id: &str) -> Result<Consultation, PipelineError> {
        let consultations = self
            .consultations
            .read()
            .map_err(|_| poisoned("consultation"))?;
        consultations
            .get(consultation_id)
            .cloned()
            .ok_or_else(|| PipelineError::ConsultationNotFound(consultation_id.to_string()))
    }

    /// Mutate a stored consultation in place and return the updated snapshot.
    pub fn update<F>(&self, consultation_id: &str, apply: F) -> Result<Consultation, PipelineError>
    where
        F: FnOnce(&mut Consultation),
    {
        let mut consultations = self
            .consultations
            .write()
            .map_err(|_| poisoned("consultation"))?;
        let consultation = consultations
            .get_mut(consultation_id)
            .ok_or_else(|| PipelineError::ConsultationNotFound(consultation_id.to_string()))?;
        apply(consultation);
        Ok(consultation.clone())
    }

    /// Record the latest pipeline progress for a consultation. Last write wins.
    pub fn set_progress(&self, progress: PipelineProgress) -> Result<(), PipelineError> {
        let mut map = self.progress.write().map_err(|_| poisoned("progress"))?;
        map.insert(progress.consultation_id.clone(), progress);
        Ok(())
    }

    /// Fetch the most recent progress record for a consultation.
    pub fn progress(&self, consultation_id: &str) -> Result<PipelineProgress, PipelineError> {
        let map = self.progress.read().map_err(|_| poisoned("progress"))?;
        map.get(consultation_id)
            .cloned()
            .ok_or_else(|| PipelineError::ProgressNotFound(consultation_id.to_string()))
    }

    /// Number of consultations currently held.
    pub fn count(&self) -> Result<usize, PipelineError> {
        let consultations = self
            .consultations
            .read()
            .map_err(|_| poisoned("consultation"))?;
        Ok(consultations.len())
    }
}

impl Default for ConsultationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(registry: &str) -> PipelineError {
    PipelineError::Store(format!("{registry} registry lock poisoned"))
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
