use clap::Parser;

/// Local Anthropic Messages proxy for OpenAI-compatible and
/// Anthropic-native upstreams.
///
/// All behavior is driven by environment variables; the flags here only
/// mirror the logging knobs.
#[derive(Debug, Parser)]
#[command(name = "throne", version)]
pub struct Args {
    /// Log filter, e.g. "info" or "proxy=debug,server=debug". Defaults to
    /// "info", or "debug" when the DEBUG environment variable is set.
    #[arg(long, env = "LOG_FILTER")]
    pub log_filter: Option<String>,
}
