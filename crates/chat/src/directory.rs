use llama_link_llm::{LlmProvider, Model};
use snafu::ResultExt;

use crate::error::{ChatResult, DirectoryUnavailableSnafu};

/// Load state of the model directory, for rendering the selector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DirectoryStatus {
    #[default]
    Unloaded,
    Ready,
    Unavailable(String),
}

/// Models offered by the backend plus the active selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelDirectory {
    models: Vec<Model>,
    selected: Option<String>,
    status: DirectoryStatus,
}

impl ModelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ready directory; the first model becomes the selection.
    pub fn from_models(models: Vec<Model>) -> Self {
        let selected = models.first().map(|model| model.id.clone());
        Self {
            models,
            selected,
            status: DirectoryStatus::Ready,
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn status(&self) -> &DirectoryStatus {
        &self.status
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|model| model.id == model_id)
    }

    /// Fetches the model list from `provider`.
    ///
    /// On failure the directory is emptied, nothing is selected and the status
    /// records the reason.
    pub async fn refresh(&mut self, provider: &dyn LlmProvider) -> ChatResult<()> {
        let fetched = provider
            .fetch_models()
            .await
            .context(DirectoryUnavailableSnafu {
                stage: "refresh-model-directory",
            });

        match fetched {
            Ok(models) => {
                if models.is_empty() {
                    tracing::warn!(provider_id = %provider.id(), "provider reported no models");
                } else {
                    tracing::info!(
                        provider_id = %provider.id(),
                        model_count = models.len(),
                        default_model = %models[0].id,
                        "model directory loaded"
                    );
                }
                *self = Self::from_models(models);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    provider_id = %provider.id(),
                    error = %error,
                    "model directory unavailable"
                );
                *self = Self {
                    models: Vec::new(),
                    selected: None,
                    status: DirectoryStatus::Unavailable(error.to_string()),
                };
                Err(error)
            }
        }
    }

    /// Sets the active model. Ids outside the fetched list are accepted as-is.
    pub fn select(&mut self, model_id: impl Into<String>) {
        let model_id = model_id.into();
        if !self.contains(&model_id) {
            tracing::debug!(model_id = %model_id, "selected model is not in the fetched list");
        }
        self.selected = Some(model_id);
    }

    pub fn display_name(&self, model_id: &str) -> String {
        self.models
            .iter()
            .find(|model| model.id == model_id)
            .map(|model| model.name.clone())
            .unwrap_or_else(|| model_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use llama_link_llm::{
        BoxFuture, ProviderError, ProviderResult, ProviderStreamHandle, StreamRequest,
    };

    use super::*;
    use crate::error::ChatError;

    struct FixedModels(Option<Vec<&'static str>>);

    impl LlmProvider for FixedModels {
        fn id(&self) -> &str {
            "fixed"
        }

        fn name(&self) -> &str {
            "Fixed"
        }

        fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<Model>>> {
            Box::pin(async move {
                match &self.0 {
                    Some(ids) => Ok(ids.iter().copied().map(Model::from_id).collect()),
                    None => Err(ProviderError::ModelFetchStatus {
                        stage: "test",
                        status: 503,
                        body: "ollama is not running".to_string(),
                    }),
                }
            })
        }

        fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
            Err(ProviderError::EmptyMessageSet {
                stage: "test",
                exchange_id: request.exchange_id,
            })
        }
    }

    #[tokio::test]
    async fn first_listed_model_becomes_the_default() {
        let mut directory = ModelDirectory::new();

        directory
            .refresh(&FixedModels(Some(vec!["llama-7b", "mistral"])))
            .await
            .unwrap();

        assert_eq!(directory.selected(), Some("llama-7b"));
        assert_eq!(directory.models().len(), 2);
        assert_eq!(directory.status(), &DirectoryStatus::Ready);
    }

    #[tokio::test]
    async fn empty_listing_selects_nothing() {
        let mut directory = ModelDirectory::new();

        directory.refresh(&FixedModels(Some(Vec::new()))).await.unwrap();

        assert_eq!(directory.selected(), None);
        assert!(directory.models().is_empty());
    }

    #[tokio::test]
    async fn failed_listing_leaves_directory_empty() {
        let mut directory = ModelDirectory::from_models(vec![Model::from_id("stale")]);

        let error = directory.refresh(&FixedModels(None)).await.unwrap_err();

        assert!(matches!(error, ChatError::DirectoryUnavailable { .. }));
        assert!(directory.models().is_empty());
        assert_eq!(directory.selected(), None);
        assert!(matches!(
            directory.status(),
            DirectoryStatus::Unavailable(reason) if reason.contains("503")
        ));
    }

    #[test]
    fn select_accepts_any_id() {
        let mut directory = ModelDirectory::from_models(vec![
            Model::from_id("llama-7b"),
            Model::new("mistral", "Mistral 7B"),
        ]);

        directory.select("mistral");
        assert_eq!(directory.selected(), Some("mistral"));
        assert_eq!(directory.display_name("mistral"), "Mistral 7B");

        directory.select("custom:latest");
        assert_eq!(directory.selected(), Some("custom:latest"));
        assert_eq!(directory.display_name("custom:latest"), "custom:latest");
    }
}
