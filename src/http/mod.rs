//! HTTP request extraction subsystem.
//!
//! # Data Flow
//! ```text
//! FlowReader (reassembled client → server bytes)
//!     → extractor.rs (read loop, one task per flow)
//!     → framing.rs (httparse head, Content-Length / chunked body)
//!     → request.rs (CapturedRequest with flow context)
//!     → RequestHandler (sampling + forwarding, pipeline)
//! ```

pub mod extractor;
pub mod framing;
pub mod request;

pub use extractor::{Extractor, RequestHandler};
pub use framing::{BodyKind, HttpParseError};
pub use request::CapturedRequest;
