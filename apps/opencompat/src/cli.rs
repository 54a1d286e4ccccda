use clap::{Parser, Subcommand};

const AFTER_HELP: &str = "Environment Variables:
  OPENCOMPAT_HOST                         Server bind address (default: 127.0.0.1)
  OPENCOMPAT_PORT                         Server listen port (default: 8080)
  OPENCOMPAT_LOG_LEVEL                    debug, info, warn, error (default: info)
  OPENCOMPAT_LOG_FORMAT                   text, json (default: text)
  OPENCOMPAT_CHATGPT_INSTRUCTIONS_REFRESH Instructions refresh interval in minutes (default: 1440)
  OPENCOMPAT_COPILOT_MODELS_REFRESH       Models refresh interval in minutes (default: 1440)
  XDG_DATA_HOME, XDG_CACHE_HOME           Base directories for persisted state";

#[derive(Parser)]
#[command(
    name = "opencompat",
    about = "Personal OpenAI-compatible gateway for consumer chat subscriptions",
    after_help = AFTER_HELP
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Authenticate with a provider
    Login {
        /// Provider id (e.g. chatgpt, copilot)
        provider: String,
    },
    /// Remove stored credentials for a provider
    Logout {
        /// Provider id (e.g. chatgpt, copilot)
        provider: String,
    },
    /// Show authentication status per provider
    Info,
    /// List models available through active providers
    Models,
    /// Start the API server (default)
    Serve,
    /// Show version information
    Version,
}
