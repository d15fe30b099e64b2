mod config;
mod host;
mod script_kernel;

use std::{error::Error, sync::Arc};

use script_kernel::ScriptKernel;
use tokio::io::{self, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use weave_kernel::{launch, CompositeKernel};

/// Serves one session over stdio. Logs go to stderr.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::load()?;
    let kernel = CompositeKernel::new("weave")
        .add(Arc::new(ScriptKernel))
        .with_default(script_kernel::NAME);
    info!(kernels = ?kernel.child_names().collect::<Vec<_>>(), "kernels registered");

    let handle = launch(Arc::new(kernel), config);
    host::serve(BufReader::new(io::stdin()), io::stdout(), handle).await?;

    Ok(())
}
