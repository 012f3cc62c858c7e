// Wire protocol for the scrimlink presence relay.

pub mod envelope;

pub use envelope::{ClientCommand, Envelope, Header, ProtocolViolation};
