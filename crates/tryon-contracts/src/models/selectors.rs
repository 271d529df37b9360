use super::registry::{ModelRegistry, ModelSpec};
use crate::tryon::QualityTier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves the remote model for a tier. A blank request silently uses the tier
    /// default; an unknown or mismatched request falls back with a reason.
    pub fn select(
        &self,
        requested: Option<&str>,
        tier: QualityTier,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, tier) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for tier '{tier}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (None, None)
        };

        let candidates = self.registry.by_tier(tier);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!("No models available for tier '{tier}'."));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{ModelRegistry, ModelSpec};
    use crate::tryon::QualityTier;

    #[test]
    fn tiers_map_to_distinct_default_models() {
        let selector = ModelSelector::new(None);
        let standard = selector.select(None, QualityTier::Standard).unwrap();
        let enhanced = selector.select(None, QualityTier::Enhanced).unwrap();
        assert_eq!(standard.model.name, "gemini-2.5-flash-image");
        assert_eq!(enhanced.model.name, "gemini-3-pro-image-preview");
        assert_eq!(standard.model.image_size, None);
        assert_eq!(enhanced.model.image_size.as_deref(), Some("4K"));
        assert!(standard.fallback_reason.is_none());
    }

    #[test]
    fn blank_request_uses_default_without_reason() {
        let selection = ModelSelector::new(None)
            .select(Some("   "), QualityTier::Standard)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image");
        assert!(selection.requested.is_none());
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn mismatched_tier_falls_back_with_reason() {
        let selection = ModelSelector::new(None)
            .select(Some("gemini-2.5-flash-image"), QualityTier::Enhanced)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-3-pro-image-preview");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'gemini-2.5-flash-image' unavailable for tier 'enhanced'.")
        );
    }

    #[test]
    fn known_override_is_honoured() {
        let selection = ModelSelector::new(None)
            .select(Some("gemini-2.5-flash-image-preview"), QualityTier::Standard)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image-preview");
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn empty_tier_is_an_error() {
        let mut models = IndexMap::new();
        models.insert(
            "standard-only".to_string(),
            ModelSpec {
                name: "standard-only".to_string(),
                tiers: vec![QualityTier::Standard],
                image_size: None,
            },
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(None, QualityTier::Enhanced)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for tier 'enhanced'.");
    }
}
