use std::process::ExitCode;

use llama_link::settings::{Settings, SettingsStore};
use llama_link::shell::Shell;
use llama_link_chat::ChatSession;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> ExitCode {
    // Chat output owns stdout.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let store = SettingsStore::load();
    // Leave an editable template behind on first run; environment overrides stay out of it.
    if !store.config_path().exists()
        && let Err(error) = store.save(&Settings::default())
    {
        tracing::warn!(error = %error, "failed to write default settings");
    }
    let settings = store.settings();

    let provider = match llama_link_llm::create_provider(settings.to_provider_config()) {
        Ok(provider) => provider,
        Err(error) => {
            tracing::error!(
                provider_id = %settings.provider_id,
                error = %error,
                "failed to create provider"
            );
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(provider = %provider.name(), "provider ready");

    let mut session = ChatSession::with_options(provider, settings.exchange_options());
    session.load_models().await;

    let mut shell = Shell::new(session, std::io::stdout());
    match shell.run(BufReader::new(tokio::io::stdin())).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "shell stopped");
            ExitCode::FAILURE
        }
    }
}
