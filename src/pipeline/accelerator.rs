use serde::{Deserialize, Serialize};

/// Accelerator memory snapshot for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorStatus {
    pub gpu_name: String,
    pub vram_used_bytes: u64,
    pub vram_total_bytes: u64,
}

impl AcceleratorStatus {
    /// Status reported when no accelerator runtime is reachable.
    pub fn unavailable() -> Self {
        Self {
            gpu_name: "cpu-mock".to_string(),
            vram_used_bytes: 0,
            vram_total_bytes: 0,
        }
    }
}

/// Cached accelerator memory held by the generation runtime.
///
/// `release` is best-effort and never fails; the exhaustion-retry policy
/// calls it before the second generation attempt.
pub trait AcceleratorCache {
    fn release(&self);
    fn status(&self) -> AcceleratorStatus;
}

/// Cache for fixture-backed runs where nothing holds accelerator memory.
pub struct NoopAcceleratorCache;

impl AcceleratorCache for NoopAcceleratorCache {
    fn release(&self) {}

    fn status(&self) -> AcceleratorStatus {
        AcceleratorStatus::unavailable()
    }
}

// ---------------------------------------------------------------------------
// Ollama-backed cache
// ---------------------------------------------------------------------------

/// Accelerator cache managed through the Ollama runtime.
///
/// Releasing asks Ollama to unload the letter model immediately by setting
/// `keep_alive` to zero; status sums the VRAM of whatever models the
/// runtime still holds resident.
pub struct OllamaAcceleratorCache {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct UnloadRequest<'a> {
    model: &'a str,
    keep_alive: u32,
}

#[derive(Deserialize)]
struct LoadedModels {
    #[serde(default)]
    models: Vec<LoadedModel>,
}

#[derive(Deserialize)]
struct LoadedModel {
    #[serde(default)]
    size_vram: u64,
}

impl OllamaAcceleratorCache {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        }
    }

    fn loaded_models(&self) -> Result<LoadedModels, reqwest::Error> {
        let url = format!("{}/api/ps", self.base_url);
        self.client.get(&url).send()?.error_for_status()?.json()
    }
}

impl AcceleratorCache for OllamaAcceleratorCache {
    fn release(&self) {
        let url = format!("{}/api/generate", self.base_url);
        let body = UnloadRequest {
            model: &self.model,
            keep_alive: 0,
        };
        match self.client.post(&url).json(&body).send() {
            Ok(response) if response.status().is_success() => {
                tracing::info!(model = %self.model, "Released accelerator cache");
            }
            Ok(response) => {
                tracing::warn!(
                    model = %self.model,
                    status = response.status().as_u16(),
                    "Accelerator cache release rejected"
                );
            }
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "Accelerator cache release failed");
            }
        }
    }

    fn status(&self) -> AcceleratorStatus {
        match self.loaded_models() {
            Ok(loaded) => AcceleratorStatus {
                gpu_name: "ollama".to_string(),
                vram_used_bytes: loaded.models.iter().map(|m| m.size_vram).sum(),
                // The runtime does not report total device memory.
                vram_total_bytes: 0,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Accelerator status query failed");
                AcceleratorStatus::unavailable()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
