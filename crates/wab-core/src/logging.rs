use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for the agent.
///
/// Default: info for our crates, warn for everything else.
/// Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let target = service_name.replace('-', "_");
        EnvFilter::new(format!(
            "warn,wab=info,wab_core=info,wab_bridge=info,{target}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))?;

    Ok(())
}
