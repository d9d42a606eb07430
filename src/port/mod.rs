//! Virtual port layer.
//!
//! The emulation backend (`VirtualBinding`), the in-memory implementation of
//! it, and the per-path instance and stream types the session hands out.

pub mod error;
pub mod instance;
pub mod mock;
pub mod stream;
pub mod traits;

pub use error::PortError;
pub use instance::{VirtualPortInstance, WriteEmitter, WriteListener};
pub use mock::{MockBinding, MockPortHandle};
pub use stream::{VirtualPortStream, WriteSink};
pub use traits::*;
