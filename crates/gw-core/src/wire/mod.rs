//! Wire protocol: frame codec, method registry, and message envelope.

pub mod envelope;
pub mod frame;
pub mod method;

pub use envelope::{Envelope, EnvelopeKind, ErrorEnvelope, Value};
pub use frame::BinaryFrame;
pub use method::Method;
