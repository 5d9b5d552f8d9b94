pub mod config;
pub mod pipeline;

pub use config::ScannerConfig;
pub use pipeline::extraction::{
    ExtractionError, ImageInput, LocateOutcome, RosterDocument, RosterExtractor, ShiftLookup,
};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber (`RUST_LOG`, else `config::default_log_filter()`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("roster-scan v{} logging initialized", config::APP_VERSION);
    }
}
