pub mod config;
pub mod types;

pub use config::{
    ConfigError, ConfigResult, ControllerConfig, ControllerSection, GroupSection, LoadSection,
    ReconcileSection, RemovalOrder, ThresholdConfig,
};
pub use types::{Node, NodeId, NodeStatus};
