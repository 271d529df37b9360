use indexmap::IndexMap;

use crate::tryon::QualityTier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub tiers: Vec<QualityTier>,
    /// `imageSize` hint sent with the request; `None` leaves the remote default.
    pub image_size: Option<String>,
}

impl ModelSpec {
    pub fn supports(&self, tier: QualityTier) -> bool {
        self.tiers.contains(&tier)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Models for a tier, in registration order; the first one is the tier default.
    pub fn by_tier(&self, tier: QualityTier) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(tier))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, tier: QualityTier) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(tier) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, tiers: &[QualityTier], image_size: Option<&str>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                tiers: tiers.to_vec(),
                image_size: image_size.map(str::to_string),
            },
        );
    };

    insert("gemini-2.5-flash-image", &[QualityTier::Standard], None);
    insert(
        "gemini-2.5-flash-image-preview",
        &[QualityTier::Standard],
        None,
    );
    insert(
        "gemini-3-pro-image-preview",
        &[QualityTier::Enhanced],
        Some("4K"),
    );

    map
}
