//! Provider reachability probe.
//!
//! Calls `GET {api_base_url}/models` with the configured key and lists the
//! model identifiers the provider advertises.

use carbrain_types::CarError;
use serde::Deserialize;

/// A single entry of the `/models` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

pub(crate) fn models_url(base_url: &str) -> String {
    format!("{}/models", base_url.trim_end_matches('/'))
}

/// Fetch the provider's model list.
///
/// Returns `Err` when the provider is unreachable, rejects the key, or
/// answers with something other than a model listing.
pub fn fetch_models(base_url: &str, api_key: &str) -> Result<Vec<ModelInfo>, CarError> {
    let url = models_url(base_url);
    let response = reqwest::blocking::Client::new()
        .get(&url)
        .bearer_auth(api_key)
        .send()
        .map_err(|e| CarError::Provider(format!("unreachable at {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(CarError::Provider(format!(
            "{url} returned HTTP {}",
            response.status()
        )));
    }

    let listing: ModelsResponse = response
        .json()
        .map_err(|e| CarError::Provider(format!("unexpected /models response: {e}")))?;
    Ok(listing.data)
}

/// Whether `model` appears in `models`.
pub fn lists_model(models: &[ModelInfo], model: &str) -> bool {
    models.iter().any(|m| m.id == model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_url_joins_cleanly() {
        assert_eq!(
            models_url("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/models"
        );
        assert_eq!(
            models_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/models"
        );
    }

    #[test]
    fn listing_decodes_and_matches_model() {
        let raw = r#"{"object":"list","data":[{"id":"openai/gpt-4o","owned_by":"x"},{"id":"google/gemini-pro"}]}"#;
        let listing: ModelsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.data.len(), 2);
        assert!(lists_model(&listing.data, "openai/gpt-4o"));
        assert!(!lists_model(&listing.data, "gpt-4o"));
    }
}
