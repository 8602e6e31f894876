//! Command-line interface for lobbyroute

use clap::{Parser, Subcommand};

/// Resilient gateway in front of rate-limited LLM providers
#[derive(Parser)]
#[command(name = "lobbyroute")]
#[command(version)]
#[command(about = "Resilient gateway in front of rate-limited LLM providers")]
#[command(
    long_about = "lobbyroute classifies each chat request, answers it from a state-aware \
    cache when it can, and otherwise walks an ordered cascade of providers, diverting away \
    from rate-limited ones before they reject."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# lobbyroute configuration
# ========================

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
host = "0.0.0.0"
port = 3000

# End-to-end budget for one request; every tier timeout must fit inside it
request_timeout_seconds = 60

[observability]
# "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# ─────────────────────────────────────────────────────────────────────────────
# CLASSIFIER
# ─────────────────────────────────────────────────────────────────────────────
#
# Keyword match first, then an optional local model, then an optional remote
# model (only for requests that trip an escalation marker), then heuristics.

[classifier]
min_confidence = 0.6

# [classifier.local]
# base_url = "http://127.0.0.1:11434/v1"
# model = "qwen3:8b"
# timeout_seconds = 5

# [classifier.remote]
# base_url = "https://api.groq.com/openai/v1"
# model = "llama-3.3-70b-versatile"
# api_key_env = "GROQ_API_KEY"

# Intent → domain overrides (defaults: engineering intents → "engineering",
# security → "security", status_check → "operations", rest → "general")
# [classifier.domains]
# security = "appsec"

# ─────────────────────────────────────────────────────────────────────────────
# CACHE
# ─────────────────────────────────────────────────────────────────────────────

[cache]
similarity_threshold = 0.85
sweep_interval_seconds = 300
primer_ttl_seconds = 3600
# snapshot_path = "data/cache.json"

# Seconds per intent; 0 disables caching for that intent
[cache.ttl]
status_check = 60
how_to = 3600
trivial = 86400

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDER HEALTH
# ─────────────────────────────────────────────────────────────────────────────

[health]
failure_threshold = 3
failure_cooldown_seconds = 30
default_reset_seconds = 60

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS AND CASCADE
# ─────────────────────────────────────────────────────────────────────────────
#
# `provider` is the logical name used for health tracking; destinations that
# share a provider and model share one health record.

[[providers]]
id = "groq-fast"
provider = "groq"
model = "llama-3.1-8b-instant"
base_url = "https://api.groq.com/openai/v1"
api_key_env = "GROQ_API_KEY"
max_tokens = 2048
temperature = 0.7
timeout_seconds = 20

[[providers]]
id = "local-deep"
provider = "local"
model = "qwen3:32b"
base_url = "http://127.0.0.1:11434/v1"
max_tokens = 4096

# Tiers are tried in order. kind: primary | domain_buffer | generic_buffer |
# arbitration | last_resort (last_resort only as the final tier)

[[cascade]]
id = "primary"
kind = "primary"
provider = "groq-fast"
timeout_seconds = 20

[[cascade]]
id = "engineering"
kind = "domain_buffer"
provider = "local-deep"
timeout_seconds = 30
domains = ["engineering", "security"]

[[cascade]]
id = "fallback"
kind = "last_resort"
provider = "local-deep"
timeout_seconds = 30

# Allowance per arbitration tier
[arbitration]
max_calls = 20
window_seconds = 3600

[dispatch]
# "normal" or "brownout"; brownout keeps arbitration tiers for requests
# that trip an escalation marker or arrive with high priority
mode = "normal"
canned_trivial = true
default_retry_seconds = 60
retry_jitter_seconds = 5
# system_prompt = "You are the team's engineering assistant."

# [persona]
# base_url = "http://127.0.0.1:8700"
# timeout_ms = 500

# Without a path, audit records are kept in memory only
# [audit]
# path = "data/audit.jsonl"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::CommandFactory;
    use std::str::FromStr;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["lobbyroute"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["lobbyroute", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["lobbyroute", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn template_is_a_valid_config() {
        let config = Config::from_str(generate_config_template())
            .expect("template should pass validation");
        assert_eq!(config.cascade.len(), 3);
        assert_eq!(config.providers.len(), 2);
    }
}
