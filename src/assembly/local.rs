//! Per-element integration and code-number mapping.
//!
//! Drives a [`Term`] over a caller-supplied integration rule, gathers nodal
//! unknowns (resolving slave dofs transparently) and maps element-local dof
//! slots to global equation numbers for the scatter step.
use crate::assembly::global::ScatterTarget;
use crate::assembly::term::{EvalContext, Term};
use crate::define_thread_local_workspace;
use crate::dof::{Dof, DofStore, EquationNumber};
use crate::element::WeakFormCell;
use crate::error::DofError;
use crate::field::{TimeStep, ValueMode};
use crate::quadrature::Quadrature;
use crate::variable::Variable;
use crate::workspace::with_thread_local_workspace;
use crate::Real;
use itertools::izip;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorViewMut, DefaultAllocator, DimName};

/// One element-local dof slot of a code-number map.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeEntry<T> {
    /// A free dof and its equation number.
    Free(EquationNumber),
    /// A slave dof, resolved to its flattened primary equation numbers with
    /// contribution weights.
    Resolved(Vec<(EquationNumber, T)>),
}

impl<T: Real> CodeEntry<T> {
    /// Visits the `(equation, weight)` pairs of the slot; a free dof is a
    /// single pair with unit weight.
    pub fn for_each_weighted(&self, mut f: impl FnMut(EquationNumber, T)) {
        match self {
            CodeEntry::Free(equation) => f(*equation, T::one()),
            CodeEntry::Resolved(pairs) => {
                for &(equation, weight) in pairs {
                    f(equation, weight);
                }
            }
        }
    }
}

/// Element-local code numbers of one variable: one slot per (node, dof-id)
/// combination, in node order. The slot count is always
/// `variable.size() × node_count`, independent of how many primaries a slave
/// slot resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeNumbers<T> {
    entries: Vec<CodeEntry<T>>,
}

impl<T: Real> CodeNumbers<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CodeEntry<T>] {
        &self.entries
    }
}

/// Collects the element's local-to-global code-number map for a variable:
/// for each incident node (in node order) and each dof id of the variable's
/// mask, the equation number of the free dof there, or the flattened primary
/// equation numbers of a slave dof.
pub fn local_code_numbers<T, D>(
    cell: &dyn WeakFormCell<T, D>,
    variable: &Variable,
    dofs: &DofStore<T>,
) -> Result<CodeNumbers<T>, DofError>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    let mut entries = Vec::new();
    for node in cell.variable_nodes(variable) {
        for &id in variable.dof_ids() {
            let handle = dofs.dof_at(node, id)?;
            match dofs.dof(handle) {
                Dof::Free(_) => entries.push(CodeEntry::Free(dofs.equation_number(handle)?)),
                Dof::Slave(_) => {
                    let pairs = dofs
                        .flatten(handle)?
                        .into_iter()
                        .map(|(primary, weight)| Ok((dofs.equation_number(primary)?, weight)))
                        .collect::<Result<Vec<_>, DofError>>()?;
                    entries.push(CodeEntry::Resolved(pairs));
                }
            }
        }
    }
    Ok(CodeNumbers { entries })
}

/// Gathers the element's nodal unknowns for a variable at the requested value
/// mode and time step. Slave dofs are resolved transparently; the caller
/// never distinguishes slave from free.
pub fn unknown_vector<T, D>(
    cell: &dyn WeakFormCell<T, D>,
    variable: &Variable,
    context: &EvalContext<'_, T>,
    mode: ValueMode,
    step: &TimeStep<T>,
) -> Result<DVector<T>, DofError>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    let mut values = Vec::with_capacity(cell.num_nodes() * variable.size());
    for node in cell.variable_nodes(variable) {
        for &id in variable.dof_ids() {
            let handle = context.dofs.dof_at(node, id)?;
            values.push(context.dofs.unknown(handle, context.source, mode, step)?);
        }
    }
    Ok(DVector::from_vec(values))
}

struct IntegrationWorkspace<T: Real> {
    point_matrix: DMatrix<T>,
    point_vector: DVector<T>,
}

impl<T: Real> Default for IntegrationWorkspace<T> {
    fn default() -> Self {
        Self {
            point_matrix: DMatrix::zeros(0, 0),
            point_vector: DVector::zeros(0),
        }
    }
}

define_thread_local_workspace!(INTEGRATION_WORKSPACE);

/// Numerically integrates the term's Jacobian contribution over the cell.
///
/// For every point of the rule, evaluates `evaluate_dw`, scales by the
/// quadrature weight times the cell's differential weight at that point and
/// accumulates into `output` (resized and zeroed first). The term's
/// `initialize_cell` runs before the point loop. No quadrature-order
/// inference happens here: the rule must match the integrand.
pub fn integrate_term_dw<T, D>(
    output: &mut DMatrix<T>,
    term: &dyn Term<T, D>,
    cell: &dyn WeakFormCell<T, D>,
    context: &EvalContext<'_, T>,
    quadrature: &dyn Quadrature<T, D>,
    step: &TimeStep<T>,
) -> eyre::Result<()>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    let (rows, cols) = term.dimensions_dw(cell);
    output.resize_mut(rows, cols, T::zero());
    output.fill(T::zero());
    term.initialize_cell(cell)?;

    with_thread_local_workspace(&INTEGRATION_WORKSPACE, |ws: &mut IntegrationWorkspace<T>| {
        ws.point_matrix.resize_mut(rows, cols, T::zero());
        for (&weight, point) in izip!(quadrature.weights(), quadrature.points()) {
            ws.point_matrix.fill(T::zero());
            term.evaluate_dw(
                DMatrixViewMut::from(&mut ws.point_matrix),
                cell,
                context,
                point,
                step,
            )?;
            let scale = weight * cell.differential_weight(point);
            for (out, contribution) in output.iter_mut().zip(ws.point_matrix.iter()) {
                *out += *contribution * scale;
            }
        }
        Ok(())
    })
}

/// Numerically integrates the term's residual contribution over the cell.
/// Same contract as [`integrate_term_dw`], with one output entry per
/// test-side dof.
pub fn integrate_term_c<T, D>(
    output: &mut DVector<T>,
    term: &dyn Term<T, D>,
    cell: &dyn WeakFormCell<T, D>,
    context: &EvalContext<'_, T>,
    quadrature: &dyn Quadrature<T, D>,
    step: &TimeStep<T>,
) -> eyre::Result<()>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    let (rows, _) = term.dimensions_dw(cell);
    output.resize_vertically_mut(rows, T::zero());
    output.fill(T::zero());
    term.initialize_cell(cell)?;

    with_thread_local_workspace(&INTEGRATION_WORKSPACE, |ws: &mut IntegrationWorkspace<T>| {
        ws.point_vector.resize_vertically_mut(rows, T::zero());
        for (&weight, point) in izip!(quadrature.weights(), quadrature.points()) {
            ws.point_vector.fill(T::zero());
            term.evaluate_c(
                DVectorViewMut::from(&mut ws.point_vector),
                cell,
                context,
                point,
                step,
            )?;
            let scale = weight * cell.differential_weight(point);
            for (out, contribution) in output.iter_mut().zip(ws.point_vector.iter()) {
                *out += *contribution * scale;
            }
        }
        Ok(())
    })
}

/// Scatters an integrated term block into the target at row indices given by
/// the test-side code numbers and column indices given by the trial-side
/// code numbers. Slave slots are distributed over their primaries with the
/// flattened weights; prescribed equations are skipped.
pub fn assemble_term_contribution<T, D>(
    target: &mut dyn ScatterTarget<T>,
    contribution: &DMatrix<T>,
    term: &dyn Term<T, D>,
    cell: &dyn WeakFormCell<T, D>,
    dofs: &DofStore<T>,
) -> Result<(), DofError>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    let rows = local_code_numbers(cell, term.test_variable(), dofs)?;
    let cols = local_code_numbers(cell, term.trial_variable(), dofs)?;
    scatter_contribution(target, contribution, &rows, &cols, false);
    Ok(())
}

/// Same scatter with rows and columns swapped; coupled multiphysics Jacobian
/// blocks are generally asymmetric between the test and trial spaces.
pub fn assemble_term_contribution_transposed<T, D>(
    target: &mut dyn ScatterTarget<T>,
    contribution: &DMatrix<T>,
    term: &dyn Term<T, D>,
    cell: &dyn WeakFormCell<T, D>,
    dofs: &DofStore<T>,
) -> Result<(), DofError>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    let rows = local_code_numbers(cell, term.test_variable(), dofs)?;
    let cols = local_code_numbers(cell, term.trial_variable(), dofs)?;
    scatter_contribution(target, contribution, &rows, &cols, true);
    Ok(())
}

/// Additive scatter of a local block keyed by code numbers. With `transpose`
/// set, `contribution[(i, j)]` lands at `(col_j, row_i)` instead of
/// `(row_i, col_j)`.
pub fn scatter_contribution<T: Real>(
    target: &mut dyn ScatterTarget<T>,
    contribution: &DMatrix<T>,
    rows: &CodeNumbers<T>,
    cols: &CodeNumbers<T>,
    transpose: bool,
) {
    assert_eq!(contribution.nrows(), rows.len(), "contribution row count mismatch");
    assert_eq!(contribution.ncols(), cols.len(), "contribution column count mismatch");

    for (i, row_entry) in rows.entries().iter().enumerate() {
        row_entry.for_each_weighted(|row_equation, row_weight| {
            let row = match row_equation {
                EquationNumber::Active(n) => n - 1,
                EquationNumber::Prescribed(_) => return,
            };
            for (j, col_entry) in cols.entries().iter().enumerate() {
                col_entry.for_each_weighted(|col_equation, col_weight| {
                    let col = match col_equation {
                        EquationNumber::Active(n) => n - 1,
                        EquationNumber::Prescribed(_) => return,
                    };
                    let value = row_weight * col_weight * contribution[(i, j)];
                    if transpose {
                        target.add_entry(col, row, value);
                    } else {
                        target.add_entry(row, col, value);
                    }
                });
            }
        });
    }
}

/// Additive scatter of a local residual/load block into the global vector.
pub fn scatter_vector_contribution<T: Real>(
    target: &mut DVector<T>,
    contribution: &DVector<T>,
    rows: &CodeNumbers<T>,
) {
    assert_eq!(contribution.len(), rows.len(), "contribution length mismatch");
    for (i, row_entry) in rows.entries().iter().enumerate() {
        row_entry.for_each_weighted(|row_equation, row_weight| {
            if let EquationNumber::Active(n) = row_equation {
                target[n - 1] += row_weight * contribution[i];
            }
        });
    }
}
