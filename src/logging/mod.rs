//! Logging setup and helpers.
//!
//! - `init_tracing` - installs the global `tracing` subscriber
//! - `LogThrottle` - keyed rate limiter for repetitive warnings

pub mod throttle;

pub use throttle::LogThrottle;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbosity` when set. `json` switches to one JSON
/// object per line for log shippers.
pub fn init_tracing(
    verbosity: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(verbosity))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().try_init()?;
    } else {
        builder.try_init()?;
    }
    Ok(())
}
