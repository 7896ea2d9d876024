/// Value objects shared across the commit engine, persistence contract, and
/// backend adapters.
///
/// Value objects are immutable, self-validating, and compared by value
/// rather than identity.
pub mod partition;
pub mod stream_id;

pub use partition::Partition;
pub use stream_id::StreamId;
