//! Model types
//!
//! Load requests, their TabbyAPI wire bodies, and the model catalog.

use serde::{Deserialize, Serialize};

/// KV cache quantization mode accepted by TabbyAPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CacheMode {
    #[default]
    #[serde(rename = "FP16")]
    Fp16,
    #[serde(rename = "FP8")]
    Fp8,
    #[serde(rename = "Q8")]
    Q8,
    #[serde(rename = "Q6")]
    Q6,
    #[serde(rename = "Q4")]
    Q4,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Fp16 => "FP16",
            CacheMode::Fp8 => "FP8",
            CacheMode::Q8 => "Q8",
            CacheMode::Q6 => "Q6",
            CacheMode::Q4 => "Q4",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FP16" => Ok(CacheMode::Fp16),
            "FP8" => Ok(CacheMode::Fp8),
            "Q8" => Ok(CacheMode::Q8),
            "Q6" => Ok(CacheMode::Q6),
            "Q4" => Ok(CacheMode::Q4),
            _ => Err(format!(
                "Unknown cache mode '{}' (expected FP16, FP8, Q8, Q6 or Q4)",
                value
            )),
        }
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speculative decoding model loaded alongside the primary one
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DraftRequest {
    pub model_name: String,
    pub rope_scale: Option<f64>,
    pub rope_alpha: Option<f64>,
}

impl DraftRequest {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }
}

/// Everything needed to ask the server to load a model
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub model_id: String,
    pub max_seq_len: Option<u32>,
    pub rope_scale: Option<f64>,
    pub rope_alpha: Option<f64>,
    pub no_flash_attention: bool,
    pub gpu_split_auto: bool,
    /// Per-device allocation in GB, used only when `gpu_split_auto` is off
    pub gpu_split: Vec<f64>,
    pub cache_mode: CacheMode,
    pub draft: Option<DraftRequest>,
}

impl LoadRequest {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            max_seq_len: None,
            rope_scale: None,
            rope_alpha: None,
            no_flash_attention: false,
            gpu_split_auto: true,
            gpu_split: Vec::new(),
            cache_mode: CacheMode::default(),
            draft: None,
        }
    }

    pub fn with_draft(mut self, draft: DraftRequest) -> Self {
        self.draft = Some(draft);
        self
    }

    pub fn with_manual_split(mut self, split: Vec<f64>) -> Self {
        self.gpu_split_auto = false;
        self.gpu_split = split;
        self
    }

    /// Number of `finished` frames the load stream must deliver
    pub fn expected_terminal_events(&self) -> u8 {
        if self.draft.is_some() {
            2
        } else {
            1
        }
    }

    /// Check the request before anything is sent.
    ///
    /// Catalog membership is checked separately, since it needs a fetched catalog.
    pub fn validate(&self) -> Result<(), String> {
        if self.model_id.trim().is_empty() {
            return Err("Model name is required".to_string());
        }

        if self.max_seq_len == Some(0) {
            return Err("max_seq_len must be greater than zero".to_string());
        }

        check_rope("rope_scale", self.rope_scale)?;
        check_rope("rope_alpha", self.rope_alpha)?;

        if !self.gpu_split_auto {
            if self.gpu_split.is_empty() {
                return Err(
                    "GPU split is manual but no split values were given".to_string(),
                );
            }
            if let Some(bad) = self
                .gpu_split
                .iter()
                .find(|v| !v.is_finite() || **v < 0.0)
            {
                return Err(format!("Invalid GPU split value: {}", bad));
            }
        }

        if let Some(draft) = &self.draft {
            if draft.model_name.trim().is_empty() {
                return Err("Draft model name is empty".to_string());
            }
            check_rope("draft_rope_scale", draft.rope_scale)?;
            check_rope("draft_rope_alpha", draft.rope_alpha)?;
        }

        Ok(())
    }
}

fn check_rope(field: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v <= 0.0 => {
            Err(format!("{} must be a positive number, got {}", field, v))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Wire bodies (field names fixed by TabbyAPI)
// ============================================================================

/// JSON body of `POST /v1/model/load`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_seq_len: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rope_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rope_alpha: Option<f64>,
    #[serde(default)]
    pub no_flash_attention: bool,
    #[serde(default = "default_split_auto")]
    pub gpu_split_auto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_split: Option<Vec<f64>>,
    #[serde(default)]
    pub cache_mode: CacheMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<DraftBody>,
}

fn default_split_auto() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftBody {
    pub draft_model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_rope_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_rope_alpha: Option<f64>,
}

impl From<&LoadRequest> for LoadBody {
    fn from(req: &LoadRequest) -> Self {
        Self {
            name: req.model_id.clone(),
            max_seq_len: req.max_seq_len,
            rope_scale: req.rope_scale,
            rope_alpha: req.rope_alpha,
            no_flash_attention: req.no_flash_attention,
            gpu_split_auto: req.gpu_split_auto,
            gpu_split: if req.gpu_split_auto {
                None
            } else {
                Some(req.gpu_split.clone())
            },
            cache_mode: req.cache_mode,
            draft: req.draft.as_ref().map(|d| DraftBody {
                draft_model_name: d.model_name.clone(),
                draft_rope_scale: d.rope_scale,
                draft_rope_alpha: d.rope_alpha,
            }),
        }
    }
}

impl From<LoadBody> for LoadRequest {
    fn from(body: LoadBody) -> Self {
        Self {
            model_id: body.name,
            max_seq_len: body.max_seq_len,
            rope_scale: body.rope_scale,
            rope_alpha: body.rope_alpha,
            no_flash_attention: body.no_flash_attention,
            gpu_split_auto: body.gpu_split_auto,
            gpu_split: body.gpu_split.unwrap_or_default(),
            cache_mode: body.cache_mode,
            draft: body.draft.map(|d| DraftRequest {
                model_name: d.draft_model_name,
                rope_scale: d.draft_rope_scale,
                rope_alpha: d.draft_rope_alpha,
            }),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Model names the server offers, as last fetched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub models: Vec<String>,
    pub draft_models: Vec<String>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.draft_models.is_empty()
    }

    /// Reject names missing from a populated list. Empty lists are treated as "not fetched".
    pub fn check(&self, request: &LoadRequest) -> Result<(), String> {
        if !self.models.is_empty() && !self.models.iter().any(|m| m == &request.model_id) {
            return Err(format!(
                "Model '{}' is not in the server's model list",
                request.model_id
            ));
        }

        if let Some(draft) = &request.draft {
            if !self.draft_models.is_empty()
                && !self.draft_models.iter().any(|m| m == &draft.model_name)
            {
                return Err(format!(
                    "Draft model '{}' is not in the server's draft model list",
                    draft.model_name
                ));
            }
        }

        Ok(())
    }
}

/// Response of `GET /v1/model/list` and `GET /v1/model/draft/list`
#[derive(Debug, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelCard>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelCard {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_is_valid() {
        let req = LoadRequest::new("llama-7b");
        assert!(req.validate().is_ok());
        assert_eq!(req.expected_terminal_events(), 1);
    }

    #[test]
    fn test_manual_split_requires_values() {
        let req = LoadRequest::new("llama-7b").with_manual_split(vec![]);
        let err = req.validate().unwrap_err();
        assert!(err.contains("GPU split"));

        let req = LoadRequest::new("llama-7b").with_manual_split(vec![12.0, f64::NAN]);
        assert!(req.validate().is_err());

        let req = LoadRequest::new("llama-7b").with_manual_split(vec![12.0, 20.5]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_blank_names_rejected() {
        assert!(LoadRequest::new("  ").validate().is_err());
        let req = LoadRequest::new("llama-7b").with_draft(DraftRequest::new(""));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_invalid_tuning_rejected() {
        let mut req = LoadRequest::new("llama-7b");
        req.max_seq_len = Some(0);
        assert!(req.validate().is_err());

        let mut req = LoadRequest::new("llama-7b");
        req.rope_alpha = Some(-1.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_wire_shape_auto_split() {
        let mut req = LoadRequest::new("llama-7b");
        req.max_seq_len = Some(4096);
        let json = serde_json::to_string(&LoadBody::from(&req)).unwrap();
        assert_eq!(
            json,
            r#"{"name":"llama-7b","max_seq_len":4096,"no_flash_attention":false,"gpu_split_auto":true,"cache_mode":"FP16"}"#
        );
    }

    #[test]
    fn test_wire_shape_manual_split_and_draft() {
        let mut req = LoadRequest::new("llama-70b")
            .with_manual_split(vec![20.0, 24.0])
            .with_draft(DraftRequest {
                model_name: "llama-1b".to_string(),
                rope_scale: Some(1.0),
                rope_alpha: Some(2.5),
            });
        req.rope_scale = Some(1.5);
        req.rope_alpha = Some(1.0);
        req.no_flash_attention = true;
        req.cache_mode = CacheMode::Q4;

        let json = serde_json::to_string(&LoadBody::from(&req)).unwrap();
        assert_eq!(
            json,
            r#"{"name":"llama-70b","rope_scale":1.5,"rope_alpha":1.0,"no_flash_attention":true,"gpu_split_auto":false,"gpu_split":[20.0,24.0],"cache_mode":"Q4","draft":{"draft_model_name":"llama-1b","draft_rope_scale":1.0,"draft_rope_alpha":2.5}}"#
        );
    }

    #[test]
    fn test_draft_fields_survive_reparse() {
        let req = LoadRequest::new("llama-7b").with_draft(DraftRequest {
            model_name: "tiny-draft".to_string(),
            rope_scale: Some(2.0),
            rope_alpha: None,
        });
        let json = serde_json::to_string(&LoadBody::from(&req)).unwrap();
        let parsed: LoadBody = serde_json::from_str(&json).unwrap();
        let draft = parsed.draft.clone().expect("draft missing");
        assert_eq!(draft.draft_model_name, "tiny-draft");
        assert_eq!(draft.draft_rope_scale, Some(2.0));
        assert_eq!(draft.draft_rope_alpha, None);
        assert_eq!(LoadRequest::from(parsed), req);
    }

    #[test]
    fn test_cache_mode_parse() {
        assert_eq!(CacheMode::parse("q6").unwrap(), CacheMode::Q6);
        assert_eq!(CacheMode::parse("FP8").unwrap(), CacheMode::Fp8);
        assert!(CacheMode::parse("Q2").is_err());
        assert_eq!(CacheMode::Q8.to_string(), "Q8");
    }

    #[test]
    fn test_catalog_membership() {
        let catalog = Catalog {
            models: vec!["llama-7b".to_string()],
            draft_models: vec!["tiny".to_string()],
        };
        assert!(catalog.check(&LoadRequest::new("llama-7b")).is_ok());
        assert!(catalog.check(&LoadRequest::new("mistral")).is_err());
        let req = LoadRequest::new("llama-7b").with_draft(DraftRequest::new("huge"));
        assert!(catalog.check(&req).is_err());

        // Unfetched catalog accepts anything
        assert!(Catalog::default().check(&req).is_ok());
    }
}
