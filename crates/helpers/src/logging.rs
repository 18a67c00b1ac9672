use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Verbosity requested on the command line via repeated `v` characters
/// (`--log ''`, `--log v`, `--log vv`, ...). The numeric level is simply
/// the length of the string, matching the behaviour the proxy is expected
/// to preserve from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verbosity(pub usize);

impl Verbosity {
    pub fn from_flag(flag: &str) -> Self {
        Verbosity(flag.len())
    }

    fn level_filter(&self) -> LevelFilter {
        match self.0 {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    }
}

/// Sets up the global tracing subscriber for the process.
///
/// `RUST_LOG` always takes precedence when set, mirroring the way the
/// rest of the ecosystem layers `EnvFilter` on top of an explicit default.
pub fn setup_tracing(verbosity: Verbosity) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.level_filter().to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
