//! Log setup for the binary

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise one level per `-v`.
pub fn create_env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbosity {
            0 => EnvFilter::new("jupyter_tunnel=warn"),
            1 => EnvFilter::new("jupyter_tunnel=info"),
            2 => EnvFilter::new("jupyter_tunnel=debug"),
            _ => EnvFilter::new("jupyter_tunnel=trace,portable_pty=debug"),
        }
    }
}

/// Send log records to stderr so they never mix with relayed remote output.
///
/// A second call is a no-op.
pub fn init_logging(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(create_env_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
