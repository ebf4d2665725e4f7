//! The assembly sweep over all elements and the scatter into the global
//! system.
//!
//! The scatter is an additive, commutative accumulation keyed by
//! active equation numbers; [`ScatterTarget`] is implemented for a dense
//! matrix and for a COO triplet store from `nalgebra-sparse`. The parallel
//! sweep computes element-local blocks concurrently with per-thread
//! workspaces and scatters them race-free on the calling thread.
use crate::assembly::local::{
    integrate_term_c, integrate_term_dw, local_code_numbers, scatter_contribution,
    scatter_vector_contribution, CodeNumbers,
};
use crate::assembly::term::{EvalContext, Term};
use crate::element::WeakFormCell;
use crate::field::TimeStep;
use crate::quadrature::Quadrature;
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DVector, DefaultAllocator, DimName};
use nalgebra_sparse::CooMatrix;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// Target of the additive scatter. Accumulation must be commutative; making
/// concurrent scatters race-free is the caller's responsibility.
pub trait ScatterTarget<T: Real> {
    /// Adds `value` at the (0-based) position derived from active equation
    /// numbers.
    fn add_entry(&mut self, row: usize, col: usize, value: T);
}

impl<T: Real> ScatterTarget<T> for DMatrix<T> {
    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        self[(row, col)] += value;
    }
}

impl<T: Real> ScatterTarget<T> for CooMatrix<T> {
    fn add_entry(&mut self, row: usize, col: usize, value: T) {
        self.push(row, col, value);
    }
}

/// Supplies the integration rule for each element. The engine never infers
/// quadrature orders; the table is the caller's policy.
pub trait QuadratureTable<T, D>: Sync
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn element_quadrature(&self, element_index: usize) -> &dyn Quadrature<T, D>;
}

/// The same rule for every element.
#[derive(Debug, Clone)]
pub struct UniformQuadratureTable<Q>(pub Q);

impl<T, D, Q> QuadratureTable<T, D> for UniformQuadratureTable<Q>
where
    T: Real,
    D: DimName,
    Q: Quadrature<T, D>,
    DefaultAllocator: Allocator<T, D>,
{
    fn element_quadrature(&self, _element_index: usize) -> &dyn Quadrature<T, D> {
        &self.0
    }
}

/// An integrated element-local block together with its code-number maps,
/// ready to scatter.
#[derive(Debug, Clone)]
pub struct LocalBlock<T> {
    pub rows: CodeNumbers<T>,
    pub cols: CodeNumbers<T>,
    pub matrix: DMatrix<T>,
}

/// Drives the assembly sweep: for every cell and every term, integrate the
/// local Jacobian block and scatter it by flattened code numbers.
pub struct WeakFormAssembler<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    cells: &'a [&'a dyn WeakFormCell<T, D>],
    terms: &'a [&'a dyn Term<T, D>],
    quadrature: &'a dyn QuadratureTable<T, D>,
    context: EvalContext<'a, T>,
}

impl<'a, T, D> WeakFormAssembler<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn new(
        cells: &'a [&'a dyn WeakFormCell<T, D>],
        terms: &'a [&'a dyn Term<T, D>],
        quadrature: &'a dyn QuadratureTable<T, D>,
        context: EvalContext<'a, T>,
    ) -> Self {
        Self {
            cells,
            terms,
            quadrature,
            context,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.cells.len()
    }

    /// Integrates every term on the given cell into local blocks.
    pub fn assemble_element_blocks(
        &self,
        element_index: usize,
        scratch: &mut DMatrix<T>,
        step: &TimeStep<T>,
    ) -> eyre::Result<Vec<LocalBlock<T>>> {
        let cell = self.cells[element_index];
        let quadrature = self.quadrature.element_quadrature(element_index);
        let mut blocks = Vec::with_capacity(self.terms.len());
        for term in self.terms {
            integrate_term_dw(scratch, *term, cell, &self.context, quadrature, step)?;
            let rows = local_code_numbers(cell, term.test_variable(), self.context.dofs)?;
            let cols = local_code_numbers(cell, term.trial_variable(), self.context.dofs)?;
            blocks.push(LocalBlock {
                rows,
                cols,
                matrix: scratch.clone(),
            });
        }
        Ok(blocks)
    }

    /// Sequential sweep: integrate and scatter every (cell, term) pair into
    /// the target. A failing term evaluation aborts the sweep; nothing of a
    /// failed sweep should be used.
    pub fn assemble_into(
        &self,
        target: &mut dyn ScatterTarget<T>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let mut scratch = DMatrix::zeros(0, 0);
        for element_index in 0..self.cells.len() {
            for block in self.assemble_element_blocks(element_index, &mut scratch, step)? {
                scatter_contribution(target, &block.matrix, &block.rows, &block.cols, false);
            }
        }
        log::debug!(
            "assembled {} elements × {} terms",
            self.cells.len(),
            self.terms.len()
        );
        Ok(())
    }

    /// Sequential residual sweep: integrate `evaluate_c` contributions and
    /// scatter them into the global vector.
    pub fn assemble_residual_into(
        &self,
        target: &mut DVector<T>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()> {
        let mut scratch = DVector::zeros(0);
        for (element_index, cell) in self.cells.iter().enumerate() {
            let quadrature = self.quadrature.element_quadrature(element_index);
            for term in self.terms {
                integrate_term_c(&mut scratch, *term, *cell, &self.context, quadrature, step)?;
                let rows = local_code_numbers(*cell, term.test_variable(), self.context.dofs)?;
                scatter_vector_contribution(target, &scratch, &rows);
            }
        }
        Ok(())
    }

    /// Parallel sweep: element-local integration runs on the rayon pool with
    /// per-thread scratch matrices; the scatter itself happens on the calling
    /// thread, so the additive accumulation stays race-free.
    pub fn par_assemble_into(
        &self,
        target: &mut dyn ScatterTarget<T>,
        step: &TimeStep<T>,
    ) -> eyre::Result<()>
    where
        T: Send + Sync,
    {
        let workspaces: ThreadLocal<RefCell<DMatrix<T>>> = ThreadLocal::new();
        let blocks: Vec<Vec<LocalBlock<T>>> = (0..self.cells.len())
            .into_par_iter()
            .map(|element_index| {
                let scratch = workspaces.get_or(|| RefCell::new(DMatrix::zeros(0, 0)));
                self.assemble_element_blocks(element_index, &mut scratch.borrow_mut(), step)
            })
            .collect::<eyre::Result<_>>()?;

        for element_blocks in &blocks {
            for block in element_blocks {
                scatter_contribution(target, &block.matrix, &block.rows, &block.cols, false);
            }
        }
        log::debug!(
            "assembled {} elements × {} terms (parallel)",
            self.cells.len(),
            self.terms.len()
        );
        Ok(())
    }
}
