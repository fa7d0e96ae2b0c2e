#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod app_data;
pub mod config;
pub mod create;
pub mod discovery;
pub mod error;
pub mod fs;
pub mod outcome;
pub mod process;
pub mod seed;
pub mod session;
pub mod wheels;

pub use app_data::{AppData, AppDataMode, AppDataOptions, TOOL_VERSION};
pub use config::{ConfigSources, EnvSnapshot, IniConfig, IniState};
pub use create::{creator_names, CreatorChoice, CreatorKind, CreatorOptions};
pub use discovery::PyInfo;
pub use error::VirtualenvError;
pub use outcome::{CommandStatus, ExecutionOutcome};
pub use process::RunOutput;
pub use seed::{SeedOptions, SeederKind, SEED_DISTRIBUTIONS};
pub use session::{create_environment, Session, SessionOptions};
pub use wheels::{PeriodicUpdateArgs, Version, PERIODIC_UPDATE_COMMAND};
