//! # hub-cli
//!
//! Console front end for llama-hub: an interactive chat loop over one
//! session, and single stateless generation.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use hub_engine::HubError;
use hub_executor::ExecutorKind;
use hub_models::{ConfigError, HubConfig, ModelRegistry};
use hub_runtime::TinyBackend;
use hub_sampling::SamplingParams;
use hub_session::{SessionConfig, SessionRegistry};

const CHAT_SESSION: &str = "console";
const GENERATE_SESSION: &str = "generate";

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty prompt")]
    EmptyPrompt,
}

/// Session settings taken from the command line.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub mode: ExecutorKind,
    pub prompt: String,
    /// Comma-separated, as in a session creation request.
    pub anti_prompt: String,
    pub max_tokens: i32,
    pub temperature: f32,
}

impl ChatOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            mode: ExecutorKind::Interactive,
            prompt: String::new(),
            anti_prompt: String::new(),
            max_tokens: -1,
            temperature: SamplingParams::default().temperature,
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.model.clone())
            .with_executor(self.mode)
            .with_prompt(self.prompt.clone())
            .with_anti_prompt(self.anti_prompt.clone())
            .with_max_tokens(self.max_tokens)
            .with_sampling(SamplingParams::default().with_temperature(self.temperature))
    }
}

/// Session registry over the models in the config file at `path`.
pub fn load_sessions(path: &Path) -> Result<SessionRegistry, CliError> {
    let config = HubConfig::from_file(path)?;
    let models = ModelRegistry::with_config(Arc::new(TinyBackend::new()), &config);
    Ok(SessionRegistry::new(Arc::new(models)))
}

/// Read lines from `input` and answer each one until end of input.
/// Returns the number of turns.
pub async fn chat<R, W>(
    sessions: &SessionRegistry,
    options: &ChatOptions,
    input: R,
    output: &mut W,
) -> Result<usize, CliError>
where
    R: BufRead,
    W: Write,
{
    sessions.create(CHAT_SESSION, options.session_config()).await?;

    let mut turns = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fragments = Box::pin(sessions.infer(CHAT_SESSION, &line));
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            if fragment.is_last {
                writeln!(output)?;
                tracing::debug!(elapsed_ms = fragment.elapsed_ms, "turn finished");
            } else {
                write!(output, "{}", fragment.content)?;
            }
            output.flush()?;
        }
        turns += 1;
    }

    sessions.remove(CHAT_SESSION);
    Ok(turns)
}

/// Run `text` once through a stateless session and return the output.
pub async fn generate(
    sessions: &SessionRegistry,
    options: &ChatOptions,
    text: &str,
) -> Result<String, CliError> {
    if text.is_empty() {
        return Err(CliError::EmptyPrompt);
    }
    let mut options = options.clone();
    options.mode = ExecutorKind::Stateless;
    sessions.create(GENERATE_SESSION, options.session_config()).await?;

    let mut out = String::new();
    let mut fragments = Box::pin(sessions.infer(GENERATE_SESSION, text));
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        if !fragment.is_first && !fragment.is_last {
            out.push_str(&fragment.content);
        }
    }
    drop(fragments);

    sessions.remove(GENERATE_SESSION);
    Ok(out)
}
