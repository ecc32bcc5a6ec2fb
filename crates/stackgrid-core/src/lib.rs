pub mod config;
pub mod deadline;
pub mod duration;
pub mod types;

pub use config::{
    DeployConfig, MigrationsConfig, ObjectStorageConfig, RegionsConfig, StackgridConfig,
    StateConfig, TemplatesConfig, ZoneConfig,
};
pub use deadline::{Deadline, Expiry};
pub use duration::parse_duration;
pub use types::*;
