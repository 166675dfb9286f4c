//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route table (at startup):
//!     --route-table-json / [routes] in TOML
//!     → validated host → base URL map
//!     → RouteTable (immutable, shared by Arc)
//!
//! Per request:
//!     request host → table.rs lookup → base URL or miss
//! ```
//!
//! # Design Decisions
//! - Built once, never mutated; no locking on the request path
//! - Host lookup is exact apart from ASCII case
//! - A miss is an ordinary outcome, not an error

pub mod table;

pub use table::RouteTable;
