// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing what flows through
// a training run: decoded image batches, their labels, and the
// streams that produce them.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// The data layer produces these types, the ML layer turns them
// into tensors (see `Model::feed_dict`).

// Decoded samples and batches
pub mod record;

// Core abstractions (traits) that other layers implement
pub mod traits;
