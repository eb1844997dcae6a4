pub mod config;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod presets;
pub mod service;
pub mod session_store;

pub use jobs::{JobKind, JobRegistry, JobSnapshot, JobStatus};
pub use pipeline::UploadedFile;
pub use service::{PipelineService, ServiceError};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
