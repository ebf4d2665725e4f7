//! The element-side collaborator surface of the assembly engine.
//!
//! A cell owns its geometry, interpolation and incident node list; the engine
//! only sees it through [`WeakFormCell`]: which nodes carry a variable's
//! dofs, the differential integration weight at a reference point, and basis
//! values/gradients there. Concrete geometry and shape-function
//! implementations live outside this crate.
use crate::variable::Variable;
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Dyn, MatrixViewMut, OPoint};

/// A cell (element) as seen by the weak-form assembly engine.
///
/// Implementations must be pure queries: the same cell is read concurrently
/// by parallel assembly sweeps.
pub trait WeakFormCell<T, D>: Send + Sync
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// Incident nodes of the cell, in local order.
    fn nodes(&self) -> &[usize];

    fn num_nodes(&self) -> usize {
        self.nodes().len()
    }

    /// Nodes carrying the variable's dofs on this cell, in local order,
    /// determined by the variable's interpolation.
    fn variable_nodes(&self, variable: &Variable) -> Vec<usize> {
        variable.interpolation().cell_nodes(self.nodes())
    }

    /// Differential volume/area/length weight at a reference point (the
    /// Jacobian determinant factor). Excludes the quadrature weight, which
    /// the engine applies itself.
    fn differential_weight(&self, point: &OPoint<T, D>) -> T;

    /// Basis function values of the variable's interpolation at a reference
    /// point. `values` has one entry per variable node.
    fn populate_basis(&self, variable: &Variable, values: &mut [T], point: &OPoint<T, D>);

    /// Basis function gradients with respect to *physical* coordinates at a
    /// reference point, one column per variable node.
    fn populate_basis_gradients(
        &self,
        variable: &Variable,
        gradients: MatrixViewMut<'_, T, D, Dyn>,
        point: &OPoint<T, D>,
    );
}
