use llama_link_llm::ProviderError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("model directory unavailable on `{stage}`: {source}"))]
    DirectoryUnavailable {
        stage: &'static str,
        source: ProviderError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
