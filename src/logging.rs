use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// Env var checked before `RUST_LOG`.
pub const LOG_ENV: &str = "CATALOGIFY_LOG";

const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,reqwest=warn";

pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES))
        .context("build log filter")?;

    // Summaries go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
