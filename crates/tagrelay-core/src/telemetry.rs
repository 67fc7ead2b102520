//! Tracing setup for the `tagrelay` binary.
//!
//! [`init_tracing`] installs one global subscriber: an `EnvFilter` plus a
//! stderr `fmt` layer, as plain text or JSON lines.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Dependencies that are chatty at `info` and below.
const QUIET_TARGETS: &[&str] = &["aws_config", "aws_smithy_runtime", "hyper", "surrealdb"];

/// Filter used when `RUST_LOG` is unset: `level` for tagrelay, `warn` for
/// [`QUIET_TARGETS`].
pub fn default_filter(level: Level) -> String {
    std::iter::once(level.as_str().to_ascii_lowercase())
        .chain(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over `level`. Output goes to stderr so stdout carries
/// only command results (a rendered buildspec, `--output json`). Only the
/// first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}
