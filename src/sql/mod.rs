//! SQL text layer.
//!
//! Nothing outside `emit` composes dynamic SQL. The compiler assembles
//! statements from static keywords plus the emitter's outputs, which
//! keeps the entire injection surface inside one reviewed file.

pub mod emit;

pub use emit::EmitError;
