use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Anthropic Messages API gateway for OpenAI, Ollama, vLLM, Gemini and GLM
#[derive(Debug, Parser)]
#[command(name = "claude-proxy", version, about)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "claude-proxy.toml", env = "CLAUDE_PROXY_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "CLAUDE_PROXY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, default_value = "info", env = "CLAUDE_PROXY_LOG")]
    pub log: String,
}
