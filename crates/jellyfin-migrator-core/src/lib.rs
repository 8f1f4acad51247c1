pub mod config;
pub mod engine;
pub mod error;
pub mod formats;
pub mod identifier;
pub mod paths;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod timestamps;

pub use config::AppConfig;
pub use engine::{AcceptAll, Acknowledge, Acknowledgement, DeclineAll, MigrationState, Migrator};
pub use error::{Error, Result};
pub use progress::{Phase, ProgressReporter, SilentReporter};
pub use report::{Diagnostic, Diagnostics, MigrationReport};
