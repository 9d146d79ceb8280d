use std::sync::OnceLock;

static TRACING: OnceLock<()> = OnceLock::new();

/// Initialize tracing once, safe to call multiple times.
///
/// `RUST_LOG` sets the filter (default `info`); `SB_LOG_FORMAT=json` switches
/// to JSON lines, anything else is compact text on stderr.
pub fn init_tracing_once() {
    TRACING.get_or_init(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
        let fmt_json = std::env::var("SB_LOG_FORMAT")
            .ok()
            .is_some_and(|v| v == "json");
        let builder = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .with_target(true);
        let _ = if fmt_json {
            builder.json().try_init()
        } else {
            builder.compact().try_init()
        };
        tracing::debug!("tracing initialized (json={})", fmt_json);
    });
}
