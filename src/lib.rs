//! Generic weak-form finite element assembly.
//!
//! The crate provides the two subsystems that make an FE engine generic across
//! physics and correct under kinematic constraints:
//!
//! - a polymorphic abstraction of unknown/test fields ([`variable::Variable`])
//!   and weak-form integrands ([`assembly::term::Term`]), driven by a single
//!   element-integration machinery ([`assembly::local`], [`assembly::global`]);
//! - a degree-of-freedom dependency resolver ([`dof::DofStore`]) that expresses
//!   a slave dof as a weighted combination of master dofs and flattens
//!   arbitrary (acyclic) master chains to primary dofs for both value queries
//!   and equation-number bookkeeping.
//!
//! Constitutive laws, element geometry, meshes and solvers are external
//! collaborators; the crate only defines their interfaces.
use nalgebra::RealField;

pub mod assembly;
pub mod dof;
pub mod element;
pub mod error;
pub mod field;
pub mod quadrature;
pub mod variable;

pub mod workspace;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// Trait alias for real scalar types used throughout the crate.
pub trait Real: RealField + Copy {}

impl<T> Real for T where T: RealField + Copy {}
