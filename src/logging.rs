use tracing_subscriber::EnvFilter;

/// Verbose per-task logs in debug builds, lifecycle events only in release.
fn default_directive() -> &'static str {
    if cfg!(debug_assertions) {
        "accel_dispatch=debug"
    } else {
        "accel_dispatch=info"
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
///
/// Output goes to stderr with thread names so dispatcher and worker lines
/// can be told apart; stdout stays reserved for summaries.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive()));
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
