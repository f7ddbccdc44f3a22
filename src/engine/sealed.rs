// ABOUTME: Sealed trait pattern for the engine port.
// ABOUTME: Prevents external implementations, allowing non-breaking evolution.

/// Sealed trait to prevent external implementations.
///
/// Allows new methods to be added to `Engine` without breaking semver for
/// any implementation outside this crate; only `BollardEngine` and the
/// in-memory `FakeEngine` implement it.
pub trait Sealed {}
