use std::collections::HashSet;

use serde::Deserialize;

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Model listing payload. OpenAI-compatible servers answer with `data[].id`,
/// Ollama's native tag endpoint with `models[].name`.
#[derive(Debug, Default, Deserialize)]
struct ModelListPayload {
    #[serde(default)]
    data: Vec<CompatibleModelEntry>,
    #[serde(default)]
    models: Vec<TagModelEntry>,
}

#[derive(Debug, Deserialize)]
struct CompatibleModelEntry {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagModelEntry {
    name: String,
}

/// Decodes a model listing, keeping backend order.
///
/// Blank identifiers are skipped and duplicates keep their first position, so
/// the first entry stays the one the backend listed first.
pub fn parse_model_list(payload: &str) -> Result<Vec<Model>, serde_json::Error> {
    let payload: ModelListPayload = serde_json::from_str(payload)?;

    let compatible = payload.data.into_iter().map(|entry| {
        let model = Model::from_id(entry.id.trim());
        match entry.owned_by {
            Some(owner) if !owner.trim().is_empty() => model.with_description(owner),
            _ => model,
        }
    });
    let tagged = payload
        .models
        .into_iter()
        .map(|entry| Model::from_id(entry.name.trim()));

    let mut seen = HashSet::new();
    Ok(compatible
        .chain(tagged)
        .filter(|model| !model.id.is_empty())
        .filter(|model| seen.insert(model.id.clone()))
        .collect())
}
