//! The weak-form assembly engine.
//!
//! [`term`] defines the polymorphic integrand contract, [`local`] the
//! per-element integration and code-number machinery, [`global`] the sweep
//! over all elements and the scatter into the global system, and
//! [`operators`] a few sample scalar-field terms exercising the engine.
pub mod global;
pub mod local;
pub mod operators;
pub mod term;
