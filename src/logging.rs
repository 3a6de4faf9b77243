use anyhow::Context as _;

/// Default directives when `RUST_LOG` is unset: our pipeline at info, the
/// HTTP stack quieted to warn so per-request noise does not drown refresh
/// progress.
const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn,hyper_util=warn";

/// Structured logs to stderr; stdout stays reserved for command output.
pub fn init() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_FILTER))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
