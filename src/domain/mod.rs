// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe what the system works with:
// signal sequences and the step-rule configuration.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A synthetic input/target signal pair
pub mod signal;

// Optimisation algorithm names and hyperparameters
pub mod algorithm;

// Core abstractions (traits) that other layers implement
pub mod traits;
