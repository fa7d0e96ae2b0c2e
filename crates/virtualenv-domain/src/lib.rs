#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod pyvenv_cfg;
pub mod requires_python;
pub mod spec;
pub mod version;
pub mod wheel_name;

pub use pyvenv_cfg::PyEnvCfg;
pub use requires_python::requires_python_allows;
pub use spec::{normalize_machine, PythonSpec};
pub use version::VersionInfo;
pub use wheel_name::{VersionPart, WheelName};
