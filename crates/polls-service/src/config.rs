use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use polls_core::DEFAULT_INDEX_LIMIT;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Service configuration, read from flags with environment fallbacks.
#[derive(Debug, Parser)]
#[command(name = "polls-service")]
#[command(about = "Local HTTP service for polls")]
pub struct Args {
    #[arg(long, env = "POLLS_DB", default_value = "./polls.sqlite3")]
    pub db: PathBuf,
    #[arg(long, env = "POLLS_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,
    /// Number of questions shown on the index page.
    #[arg(long, env = "POLLS_INDEX_LIMIT", default_value_t = DEFAULT_INDEX_LIMIT)]
    pub index_limit: usize,
    /// `tracing` filter directives, e.g. `polls_service=debug,tower_http=info`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
    /// Evaluate visibility at this RFC 3339 instant instead of the wall clock.
    /// Useful for previewing questions scheduled for later.
    #[arg(long, env = "POLLS_AS_OF", value_parser = parse_rfc3339)]
    pub as_of: Option<OffsetDateTime>,
}

fn parse_rfc3339(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| format!("invalid RFC3339 timestamp: {err}"))
}
