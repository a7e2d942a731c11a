use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use hub_cli::{chat, generate, load_sessions, ChatOptions, CliError};
use hub_executor::ExecutorKind;
use tracing_subscriber::EnvFilter;

/// llama-hub console
#[derive(Parser)]
#[command(name = "hub-cli")]
struct Cli {
    /// Hub configuration file listing the available models.
    #[arg(short, long, global = true, default_value = "hub.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Chat with a model, one turn per line of standard input.
    Chat {
        /// Configured model name.
        #[arg(short, long)]
        model: String,

        /// Executor: interactive, instruct or stateless.
        #[arg(long, default_value_t = ExecutorKind::Interactive)]
        mode: ExecutorKind,

        /// Prompt evaluated once when the session starts.
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// Comma-separated strings that end a turn.
        #[arg(short, long, default_value = "")]
        anti_prompt: String,

        /// Token budget per turn; negative means unlimited.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        max_tokens: i32,

        #[arg(short, long, default_value_t = 0.8)]
        temperature: f32,
    },
    /// Run a single stateless call and print the result.
    Generate {
        /// Configured model name.
        #[arg(short, long)]
        model: String,

        /// Input text.
        #[arg(short, long)]
        prompt: String,

        /// Maximum number of tokens to generate.
        #[arg(long, default_value_t = 64)]
        max_tokens: i32,

        #[arg(short, long, default_value_t = 0.8)]
        temperature: f32,
    },
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let sessions = load_sessions(&cli.config)?;

    match cli.command {
        Command::Chat {
            model,
            mode,
            prompt,
            anti_prompt,
            max_tokens,
            temperature,
        } => {
            let options = ChatOptions {
                model,
                mode,
                prompt,
                anti_prompt,
                max_tokens,
                temperature,
            };
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            chat(&sessions, &options, stdin.lock(), &mut stdout).await?;
        }
        Command::Generate {
            model,
            prompt,
            max_tokens,
            temperature,
        } => {
            let mut options = ChatOptions::new(model);
            options.max_tokens = max_tokens;
            options.temperature = temperature;
            let text = generate(&sessions, &options, &prompt).await?;
            let mut stdout = io::stdout();
            writeln!(stdout, "{text}")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
