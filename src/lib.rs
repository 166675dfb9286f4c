//! Traffic shadowing library: passive capture, TCP reassembly, HTTP request
//! extraction, sampling and fire-and-forget forwarding.

pub mod capture;
pub mod cli;
pub mod config;
pub mod forward;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod reassembly;
pub mod routing;
pub mod sampling;

pub use config::schema::ShadowConfig;
pub use forward::Forwarder;
pub use lifecycle::Shutdown;
pub use sampling::{Decision, FilterEngine};
