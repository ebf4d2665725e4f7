//! The weak-form integrand contract.
use crate::dof::DofStore;
use crate::element::WeakFormCell;
use crate::field::{TimeStep, UnknownSource};
use crate::variable::Variable;
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrixViewMut, DVectorViewMut, DefaultAllocator, DimName, OPoint};
use std::sync::Arc;

/// Explicit handle to the state a term evaluation reads: the dof store and
/// the source of current unknown values. Passed into every evaluation so the
/// engine stays reentrant under concurrent assembly.
#[derive(Copy, Clone)]
pub struct EvalContext<'a, T: Real> {
    pub dofs: &'a DofStore<T>,
    pub source: &'a dyn UnknownSource<T>,
}

impl<'a, T: Real> EvalContext<'a, T> {
    pub fn new(dofs: &'a DofStore<T>, source: &'a dyn UnknownSource<T>) -> Self {
        Self { dofs, source }
    }
}

/// A weak-form term, evaluated per integration point.
///
/// Implementations are shared across all elements using the same physics and
/// must hold no per-call mutable state: any working storage belongs to the
/// caller. The engine depends only on this contract and never inspects the
/// concrete term.
pub trait Term<T, D>: Send + Sync
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// The unknown (trial) field of the term.
    fn trial_variable(&self) -> &Arc<Variable>;

    /// The test field of the term.
    fn test_variable(&self) -> &Arc<Variable>;

    /// Shape of the local Jacobian block the engine must allocate before
    /// integration: rows span the test-side dofs on the cell, columns the
    /// trial-side dofs.
    fn dimensions_dw(&self, cell: &dyn WeakFormCell<T, D>) -> (usize, usize) {
        let rows = cell.variable_nodes(self.test_variable()).len() * self.test_variable().size();
        let cols = cell.variable_nodes(self.trial_variable()).len() * self.trial_variable().size();
        (rows, cols)
    }

    /// One-shot per-element setup, invoked by the engine before every
    /// integration-point loop. Must not retain per-element state.
    fn initialize_cell(&self, _cell: &dyn WeakFormCell<T, D>) -> eyre::Result<()> {
        Ok(())
    }

    /// Local Jacobian contribution at one integration point. `output` is
    /// zeroed by the engine and sized per [`Term::dimensions_dw`].
    fn evaluate_dw(
        &self,
        output: DMatrixViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()>;

    /// Local residual/flux contribution at one integration point. `output`
    /// is zeroed by the engine, with one entry per test-side dof.
    fn evaluate_c(
        &self,
        output: DVectorViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()>;
}
