use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_ENV: &str = "DOCQA_LOG";
pub const DEFAULT_DIRECTIVES: &str = "docqa=info,dqa_core=info,dqa_ai=info";

/// Install the global subscriber once.
///
/// Levels come from `DOCQA_LOG` (e.g. `DOCQA_LOG=dqa_ai=debug`), falling back to
/// [`DEFAULT_DIRECTIVES`]. Logs go to stderr so answers on stdout stay clean.
pub fn init_tracing(json: bool) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

        if json {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .with(filter)
                .init();
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    });
}
