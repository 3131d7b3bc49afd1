//! Configuration management
//!
//! TOML-backed configuration with lock-free reads and change
//! notification. The schema is split per subsystem; transport settings
//! are re-exported from the modules that own them.

pub mod schema;
pub mod store;

pub use schema::{
    AppConfig, EndpointConfig, EndpointRole, IceSettings, SessionConfig, SignalingConfig,
    TurnServer,
};
pub use store::{ConfigChange, ConfigStore};
