//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → cli.rs (flag overrides, route table JSON)
//!     → validation.rs (semantic checks)
//!     → ShadowConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow running from flags alone
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    CaptureConfig, ForwardConfig, HealthConfig, ObservabilityConfig, ReassemblyConfig,
    SamplingConfig, ShadowConfig, ShutdownConfig,
};
pub use validation::ValidationError;
