//! Logging integration.
//!
//! The library crates only emit [`tracing`] events; an application (or a test)
//! installs a subscriber once through [`setup_logging`].

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter directive is read from `settings.log_level` (e.g. "debug",
/// "relq_db=trace"). In debug mode a pretty, human-readable format is used;
/// otherwise events are written as JSON lines.
///
/// Returns `false` when a global subscriber was already installed.
pub fn setup_logging(settings: &Settings) -> bool {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .is_ok()
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .is_ok()
    }
}

/// Installs a test-friendly subscriber writing to the captured test output.
///
/// Safe to call from every test; only the first call installs anything.
pub fn try_setup_test_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Creates a span covering the compilation and execution of one statement.
///
/// # Examples
///
/// ```
/// use relq_core::logging::statement_span;
///
/// let span = statement_span("UPDATE", "queries_note");
/// let _guard = span.enter();
/// tracing::debug!("running update");
/// ```
pub fn statement_span(kind: &str, table: &str) -> tracing::Span {
    tracing::debug_span!("statement", kind, table)
}
