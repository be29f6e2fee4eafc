use clap::Parser;

#[derive(Parser)]
#[command(name = "gwrap", about = "Caching, cost-governing Gemini proxy")]
pub(crate) struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "GWRAP_CONFIG", default_value = "config.yaml")]
    pub(crate) config: String,
}
