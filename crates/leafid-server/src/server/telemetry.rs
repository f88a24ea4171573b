//! Console logging for the server.
//!
//! Events from the server and from `leafid` (built with its `tracing`
//! feature) go through one `tracing_subscriber` registry. The filter is read
//! from `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=leafid=debug,info cargo run -p leafid-server
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
