//! Sample scalar-field weak-form terms.
//!
//! These operators cover the standard transient scalar problem
//! `c u̇ - ∇·(k ∇u) = q` and double as reference implementations of the
//! [`Term`] contract: a stiffness-like term reading gradients, a mass-like
//! term reading basis values and the velocity mode, and a pure load term.
use crate::assembly::local::unknown_vector;
use crate::assembly::term::{EvalContext, Term};
use crate::element::WeakFormCell;
use crate::field::{TimeStep, ValueMode};
use crate::variable::Variable;
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::storage::RawStorage;
use nalgebra::{
    DMatrixViewMut, DVectorViewMut, DefaultAllocator, DimName, Dyn, MatrixViewMut, OMatrix,
    OPoint, OVector, U1,
};
use std::sync::Arc;

/// Pointwise material response of a scalar-field operator: the conductivity,
/// capacity or source density at an integration point, possibly depending on
/// the current field value (a nonlinear material) and the time step.
///
/// A failure here is a constitutive failure and aborts the sweep.
pub trait ConstitutiveModel<T, D>: Send + Sync
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn characteristic_value(
        &self,
        point: &OPoint<T, D>,
        field_value: T,
        step: &TimeStep<T>,
    ) -> eyre::Result<T>;
}

/// A spatially uniform, field-independent material parameter.
#[derive(Debug, Copy, Clone)]
pub struct ConstantModel<T>(pub T);

impl<T, D> ConstitutiveModel<T, D> for ConstantModel<T>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn characteristic_value(
        &self,
        _point: &OPoint<T, D>,
        _field_value: T,
        _step: &TimeStep<T>,
    ) -> eyre::Result<T> {
        Ok(self.0)
    }
}

/// The diffusion (conductivity/stiffness) term `∫ k ∇w · ∇u`.
pub struct DiffusionTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    trial: Arc<Variable>,
    test: Arc<Variable>,
    model: Arc<dyn ConstitutiveModel<T, D>>,
}

impl<T, D> DiffusionTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn new(
        trial: Arc<Variable>,
        test: Arc<Variable>,
        model: Arc<dyn ConstitutiveModel<T, D>>,
    ) -> Self {
        Self { trial, test, model }
    }

    /// The current field value at the reference point, interpolated from the
    /// nodal total unknowns.
    fn field_value(
        &self,
        cell: &dyn WeakFormCell<T, D>,
        context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<T> {
        let unknowns = unknown_vector(cell, &self.trial, context, ValueMode::Total, step)?;
        let mut basis = vec![T::zero(); unknowns.len()];
        cell.populate_basis(&self.trial, &mut basis, point);
        let mut value = T::zero();
        for (phi, u) in basis.iter().zip(unknowns.iter()) {
            value += *phi * *u;
        }
        Ok(value)
    }
}

impl<T, D> Term<T, D> for DiffusionTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D> + Allocator<T, D, Dyn>,
    <DefaultAllocator as Allocator<T, D, Dyn>>::Buffer:
        RawStorage<T, D, Dyn, RStride = U1, CStride = D>,
{
    fn trial_variable(&self) -> &Arc<Variable> {
        &self.trial
    }

    fn test_variable(&self) -> &Arc<Variable> {
        &self.test
    }

    fn evaluate_dw(
        &self,
        mut output: DMatrixViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let num_test = cell.variable_nodes(&self.test).len();
        let num_trial = cell.variable_nodes(&self.trial).len();
        let mut test_gradients = OMatrix::<T, D, Dyn>::zeros_generic(D::name(), Dyn(num_test));
        let mut trial_gradients = OMatrix::<T, D, Dyn>::zeros_generic(D::name(), Dyn(num_trial));
        cell.populate_basis_gradients(&self.test, MatrixViewMut::from(&mut test_gradients), point);
        cell.populate_basis_gradients(
            &self.trial,
            MatrixViewMut::from(&mut trial_gradients),
            point,
        );

        let u = self.field_value(cell, context, point, step)?;
        let k = self.model.characteristic_value(point, u, step)?;
        for i in 0..num_test {
            for j in 0..num_trial {
                output[(i, j)] = k * test_gradients.column(i).dot(&trial_gradients.column(j));
            }
        }
        Ok(())
    }

    fn evaluate_c(
        &self,
        mut output: DVectorViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let num_test = cell.variable_nodes(&self.test).len();
        let num_trial = cell.variable_nodes(&self.trial).len();
        let mut test_gradients = OMatrix::<T, D, Dyn>::zeros_generic(D::name(), Dyn(num_test));
        let mut trial_gradients = OMatrix::<T, D, Dyn>::zeros_generic(D::name(), Dyn(num_trial));
        cell.populate_basis_gradients(&self.test, MatrixViewMut::from(&mut test_gradients), point);
        cell.populate_basis_gradients(
            &self.trial,
            MatrixViewMut::from(&mut trial_gradients),
            point,
        );

        let unknowns = unknown_vector(cell, &self.trial, context, ValueMode::Total, step)?;
        let mut field_gradient = OVector::<T, D>::zeros();
        for (j, u) in unknowns.iter().enumerate() {
            field_gradient += trial_gradients.column(j) * *u;
        }

        let value = self.field_value(cell, context, point, step)?;
        let k = self.model.characteristic_value(point, value, step)?;
        for i in 0..num_test {
            output[i] = k * test_gradients.column(i).dot(&field_gradient);
        }
        Ok(())
    }
}

/// The capacity (mass-like) term `∫ c w u` in the Jacobian, with a residual
/// contribution `∫ c w u̇` driven by the velocity mode of the unknown source.
pub struct CapacityTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    trial: Arc<Variable>,
    test: Arc<Variable>,
    model: Arc<dyn ConstitutiveModel<T, D>>,
}

impl<T, D> CapacityTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn new(
        trial: Arc<Variable>,
        test: Arc<Variable>,
        model: Arc<dyn ConstitutiveModel<T, D>>,
    ) -> Self {
        Self { trial, test, model }
    }
}

impl<T, D> Term<T, D> for CapacityTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn trial_variable(&self) -> &Arc<Variable> {
        &self.trial
    }

    fn test_variable(&self) -> &Arc<Variable> {
        &self.test
    }

    fn evaluate_dw(
        &self,
        mut output: DMatrixViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        _context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let num_test = cell.variable_nodes(&self.test).len();
        let num_trial = cell.variable_nodes(&self.trial).len();
        let mut test_basis = vec![T::zero(); num_test];
        let mut trial_basis = vec![T::zero(); num_trial];
        cell.populate_basis(&self.test, &mut test_basis, point);
        cell.populate_basis(&self.trial, &mut trial_basis, point);

        let c = self.model.characteristic_value(point, T::zero(), step)?;
        for (i, w) in test_basis.iter().enumerate() {
            for (j, phi) in trial_basis.iter().enumerate() {
                output[(i, j)] = c * *w * *phi;
            }
        }
        Ok(())
    }

    fn evaluate_c(
        &self,
        mut output: DVectorViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let num_test = cell.variable_nodes(&self.test).len();
        let num_trial = cell.variable_nodes(&self.trial).len();
        let mut test_basis = vec![T::zero(); num_test];
        let mut trial_basis = vec![T::zero(); num_trial];
        cell.populate_basis(&self.test, &mut test_basis, point);
        cell.populate_basis(&self.trial, &mut trial_basis, point);

        let rates = unknown_vector(cell, &self.trial, context, ValueMode::Velocity, step)?;
        let mut rate = T::zero();
        for (phi, v) in trial_basis.iter().zip(rates.iter()) {
            rate += *phi * *v;
        }

        let c = self.model.characteristic_value(point, T::zero(), step)?;
        for (i, w) in test_basis.iter().enumerate() {
            output[i] = c * *w * rate;
        }
        Ok(())
    }
}

/// The distributed source term `∫ w q`, contributing only to the residual
/// side; its Jacobian block is identically zero.
pub struct SourceTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    trial: Arc<Variable>,
    test: Arc<Variable>,
    model: Arc<dyn ConstitutiveModel<T, D>>,
}

impl<T, D> SourceTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn new(
        trial: Arc<Variable>,
        test: Arc<Variable>,
        model: Arc<dyn ConstitutiveModel<T, D>>,
    ) -> Self {
        Self { trial, test, model }
    }
}

impl<T, D> Term<T, D> for SourceTerm<T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn trial_variable(&self) -> &Arc<Variable> {
        &self.trial
    }

    fn test_variable(&self) -> &Arc<Variable> {
        &self.test
    }

    fn evaluate_dw(
        &self,
        _output: DMatrixViewMut<'_, T>,
        _cell: &dyn WeakFormCell<T, D>,
        _context: &EvalContext<'_, T>,
        _point: &OPoint<T, D>,
        _step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        Ok(())
    }

    fn evaluate_c(
        &self,
        mut output: DVectorViewMut<'_, T>,
        cell: &dyn WeakFormCell<T, D>,
        _context: &EvalContext<'_, T>,
        point: &OPoint<T, D>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let num_test = cell.variable_nodes(&self.test).len();
        let mut test_basis = vec![T::zero(); num_test];
        cell.populate_basis(&self.test, &mut test_basis, point);

        let q = self.model.characteristic_value(point, T::zero(), step)?;
        for (i, w) in test_basis.iter().enumerate() {
            output[i] = -q * *w;
        }
        Ok(())
    }
}
