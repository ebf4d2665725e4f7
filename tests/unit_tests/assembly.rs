use matrixcompare::assert_matrix_eq;
use mpfem::assembly::global::{UniformQuadratureTable, WeakFormAssembler};
use mpfem::assembly::local::{
    assemble_term_contribution, assemble_term_contribution_transposed, integrate_term_c,
    integrate_term_dw, local_code_numbers, unknown_vector, CodeEntry,
};
use mpfem::assembly::operators::{CapacityTerm, ConstantModel, DiffusionTerm, SourceTerm};
use mpfem::assembly::term::{EvalContext, Term};
use mpfem::dof::{DofId, DofStore, MasterWeight};
use mpfem::element::WeakFormCell;
use mpfem::field::{SolutionVectors, TimeStep, ValueMode};
use mpfem::variable::{FullInterpolation, Quantity, Valence, Variable};
use nalgebra::{DMatrix, DVector, Dyn, Matrix2, MatrixViewMut, Point1, U1};
use nalgebra_sparse::convert::serial::convert_coo_dense;
use nalgebra_sparse::CooMatrix;
use std::sync::Arc;

/// A two-node line element of the given length with linear basis functions
/// on the reference interval [-1, 1].
struct LineCell {
    nodes: [usize; 2],
    length: f64,
}

impl LineCell {
    fn new(nodes: [usize; 2], length: f64) -> Self {
        Self { nodes, length }
    }
}

impl WeakFormCell<f64, U1> for LineCell {
    fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    fn differential_weight(&self, _point: &Point1<f64>) -> f64 {
        self.length / 2.0
    }

    fn populate_basis(&self, _variable: &Variable, values: &mut [f64], point: &Point1<f64>) {
        let xi = point.x;
        values[0] = (1.0 - xi) / 2.0;
        values[1] = (1.0 + xi) / 2.0;
    }

    fn populate_basis_gradients(
        &self,
        _variable: &Variable,
        mut gradients: MatrixViewMut<'_, f64, U1, Dyn>,
        _point: &Point1<f64>,
    ) {
        gradients[(0, 0)] = -1.0 / self.length;
        gradients[(0, 1)] = 1.0 / self.length;
    }
}

/// Two-point Gauss rule on [-1, 1], exact for cubic integrands.
fn gauss2() -> (Vec<f64>, Vec<Point1<f64>>) {
    let p = (1.0f64 / 3.0).sqrt();
    (vec![1.0, 1.0], vec![Point1::new(-p), Point1::new(p)])
}

fn temperature_pair() -> (Arc<Variable>, Arc<Variable>) {
    let trial = Arc::new(Variable::new(
        Arc::new(FullInterpolation),
        Quantity::Temperature,
        Valence::Scalar,
        vec![DofId::Temperature],
    ));
    let test = Arc::new(Variable::dual(&trial));
    (trial, test)
}

fn free_pair_store(values: [f64; 2]) -> (DofStore<f64>, SolutionVectors<f64>) {
    let mut dofs = DofStore::new();
    dofs.add_free(0, DofId::Temperature);
    dofs.add_free(1, DofId::Temperature);
    dofs.number_equations();
    let source = SolutionVectors::new()
        .with_mode(ValueMode::Total, DVector::from_vec(values.to_vec()));
    (dofs, source)
}

fn step() -> TimeStep<f64> {
    TimeStep::new(1, 1.0, 0.5)
}

#[test]
fn diffusion_stiffness_matches_exact_integral() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = free_pair_store([1.0, 4.0]);
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 2.0);
    let term = DiffusionTerm::new(trial, test, Arc::new(ConstantModel(3.0)));

    let mut output = DMatrix::zeros(0, 0);
    integrate_term_dw(&mut output, &term, &cell, &context, &gauss2(), &step()).unwrap();

    // k/L * [1 -1; -1 1] with k = 3, L = 2.
    let expected = Matrix2::new(1.5, -1.5, -1.5, 1.5);
    assert_matrix_eq!(output, expected, comp = abs, tol = 1e-12);
}

#[test]
fn diffusion_stiffness_scales_linearly_in_conductivity() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = free_pair_store([1.0, 4.0]);
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 1.5);

    let single = DiffusionTerm::new(trial.clone(), test.clone(), Arc::new(ConstantModel(1.0)));
    let double = DiffusionTerm::new(trial, test, Arc::new(ConstantModel(2.0)));

    let mut reference = DMatrix::zeros(0, 0);
    let mut scaled = DMatrix::zeros(0, 0);
    integrate_term_dw(&mut reference, &single, &cell, &context, &gauss2(), &step()).unwrap();
    integrate_term_dw(&mut scaled, &double, &cell, &context, &gauss2(), &step()).unwrap();

    assert_matrix_eq!(scaled, reference * 2.0, comp = abs, tol = 1e-12);
}

#[test]
fn capacity_matrix_matches_consistent_mass() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = free_pair_store([0.0, 0.0]);
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 3.0);
    let term = CapacityTerm::new(trial, test, Arc::new(ConstantModel(2.0)));

    let mut output = DMatrix::zeros(0, 0);
    integrate_term_dw(&mut output, &term, &cell, &context, &gauss2(), &step()).unwrap();

    // c*L/6 * [2 1; 1 2] with c = 2, L = 3.
    let expected = Matrix2::new(2.0, 1.0, 1.0, 2.0);
    assert_matrix_eq!(output, expected, comp = abs, tol = 1e-12);
}

#[test]
fn diffusion_residual_is_stiffness_times_unknowns() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = free_pair_store([1.0, 4.0]);
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 2.0);
    let term = DiffusionTerm::new(trial.clone(), test, Arc::new(ConstantModel(3.0)));

    let mut stiffness = DMatrix::zeros(0, 0);
    integrate_term_dw(&mut stiffness, &term, &cell, &context, &gauss2(), &step()).unwrap();
    let mut residual = DVector::zeros(0);
    integrate_term_c(&mut residual, &term, &cell, &context, &gauss2(), &step()).unwrap();

    let unknowns =
        unknown_vector(&cell, &trial, &context, ValueMode::Total, &step()).unwrap();
    assert_matrix_eq!(residual, stiffness * unknowns, comp = abs, tol = 1e-12);
}

#[test]
fn capacity_residual_uses_the_velocity_mode() {
    let (trial, test) = temperature_pair();
    let mut dofs = DofStore::new();
    dofs.add_free(0, DofId::Temperature);
    dofs.add_free(1, DofId::Temperature);
    dofs.number_equations();
    let source = SolutionVectors::new()
        .with_mode(ValueMode::Total, DVector::from_vec(vec![1.0, 4.0]))
        .with_mode(ValueMode::Velocity, DVector::from_vec(vec![0.5, -1.0]));
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 3.0);
    let term = CapacityTerm::new(trial, test, Arc::new(ConstantModel(2.0)));

    let mut mass = DMatrix::zeros(0, 0);
    integrate_term_dw(&mut mass, &term, &cell, &context, &gauss2(), &step()).unwrap();
    let mut residual = DVector::zeros(0);
    integrate_term_c(&mut residual, &term, &cell, &context, &gauss2(), &step()).unwrap();

    let rates = DVector::from_vec(vec![0.5, -1.0]);
    assert_matrix_eq!(residual, mass * rates, comp = abs, tol = 1e-12);
}

#[test]
fn source_term_loads_each_node_with_half_the_cell() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = free_pair_store([0.0, 0.0]);
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 2.0);
    let term = SourceTerm::new(trial, test, Arc::new(ConstantModel(5.0)));

    let mut residual = DVector::zeros(0);
    integrate_term_c(&mut residual, &term, &cell, &context, &gauss2(), &step()).unwrap();
    let expected = DVector::from_vec(vec![-5.0, -5.0]);
    assert_matrix_eq!(residual, expected, comp = abs, tol = 1e-12);

    // The source contributes nothing to the Jacobian.
    let mut jacobian = DMatrix::zeros(0, 0);
    integrate_term_dw(&mut jacobian, &term, &cell, &context, &gauss2(), &step()).unwrap();
    assert_matrix_eq!(jacobian, DMatrix::zeros(2, 2), comp = abs, tol = 1e-15);
}

/// Node 1 of the cell hangs between nodes 0 and 2, which carry the free dofs.
fn hanging_node_store() -> DofStore<f64> {
    let mut dofs = DofStore::new();
    let a = dofs.add_free(0, DofId::Temperature);
    let b = dofs.add_free(2, DofId::Temperature);
    dofs.add_slave(
        1,
        DofId::Temperature,
        vec![MasterWeight::new(a, 0.5), MasterWeight::new(b, 0.5)],
    )
    .unwrap();
    dofs.number_equations();
    dofs
}

#[test]
fn code_numbers_keep_one_slot_per_local_dof() {
    let (trial, _) = temperature_pair();
    let dofs = hanging_node_store();
    let cell = LineCell::new([0, 1], 1.0);

    let code = local_code_numbers(&cell, &trial, &dofs).unwrap();
    assert_eq!(code.len(), 2);
    assert!(matches!(code.entries()[0], CodeEntry::Free(_)));
    match &code.entries()[1] {
        CodeEntry::Resolved(pairs) => assert_eq!(pairs.len(), 2),
        entry => panic!("expected a resolved slave slot, got {:?}", entry),
    }
}

#[test]
fn unknown_vector_resolves_hanging_nodes_transparently() {
    let (trial, _) = temperature_pair();
    let dofs = hanging_node_store();
    let source = SolutionVectors::new()
        .with_mode(ValueMode::Total, DVector::from_vec(vec![2.0, 6.0]));
    let context = EvalContext::new(&dofs, &source);
    let cell = LineCell::new([0, 1], 1.0);

    let unknowns =
        unknown_vector(&cell, &trial, &context, ValueMode::Total, &step()).unwrap();
    assert_matrix_eq!(
        unknowns,
        DVector::from_vec(vec![2.0, 4.0]),
        comp = abs,
        tol = 1e-12
    );
}

#[test]
fn scatter_distributes_slave_slots_by_master_weights() {
    let (trial, test) = temperature_pair();
    let dofs = hanging_node_store();
    let cell = LineCell::new([0, 1], 1.0);
    let term = DiffusionTerm::new(trial, test, Arc::new(ConstantModel(1.0)));

    let contribution = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    let mut target = DMatrix::zeros(2, 2);
    assemble_term_contribution(&mut target, &contribution, &term, &cell, &dofs).unwrap();

    // Local slot 0 maps to equation 1; slot 1 splits evenly over both.
    let map = Matrix2::new(1.0, 0.0, 0.5, 0.5);
    let expected = map.transpose() * Matrix2::new(1.0, 2.0, 3.0, 4.0) * map;
    assert_matrix_eq!(target, expected, comp = abs, tol = 1e-12);

    let mut transposed = DMatrix::zeros(2, 2);
    assemble_term_contribution_transposed(&mut transposed, &contribution, &term, &cell, &dofs)
        .unwrap();
    assert_matrix_eq!(transposed, expected.transpose(), comp = abs, tol = 1e-12);
}

#[test]
fn scatter_skips_prescribed_equations() {
    let (trial, test) = temperature_pair();
    let mut dofs = DofStore::new();
    dofs.add_free(0, DofId::Temperature);
    dofs.add_free_conditioned(1, DofId::Temperature, Some(0), None);
    dofs.number_equations();
    let cell = LineCell::new([0, 1], 1.0);
    let term = DiffusionTerm::new(trial, test, Arc::new(ConstantModel(1.0)));

    let contribution = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    // Only one active equation exists; the driven dof's row and column are
    // eliminated by the scatter.
    let mut target = DMatrix::zeros(1, 1);
    assemble_term_contribution(&mut target, &contribution, &term, &cell, &dofs).unwrap();
    assert_eq!(target[(0, 0)], 1.0);
}

/// A chain of two unit cells with three active temperature dofs.
fn two_cell_problem() -> (DofStore<f64>, SolutionVectors<f64>) {
    let mut dofs = DofStore::new();
    for node in 0..3 {
        dofs.add_free(node, DofId::Temperature);
    }
    dofs.number_equations();
    let source = SolutionVectors::new()
        .with_mode(ValueMode::Total, DVector::from_vec(vec![1.0, 2.0, 4.0]));
    (dofs, source)
}

#[test]
fn sweeps_agree_across_targets_and_threading() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = two_cell_problem();
    let context = EvalContext::new(&dofs, &source);
    let cell_a = LineCell::new([0, 1], 1.0);
    let cell_b = LineCell::new([1, 2], 1.0);
    let cells: Vec<&dyn WeakFormCell<f64, U1>> = vec![&cell_a, &cell_b];
    let term = DiffusionTerm::new(trial, test, Arc::new(ConstantModel(1.0)));
    let terms: Vec<&dyn Term<f64, U1>> = vec![&term];
    let table = UniformQuadratureTable(gauss2());
    let assembler = WeakFormAssembler::new(&cells, &terms, &table, context);

    let mut sequential = DMatrix::zeros(3, 3);
    assembler.assemble_into(&mut sequential, &step()).unwrap();
    let expected =
        DMatrix::from_row_slice(3, 3, &[1.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 1.0]);
    assert_matrix_eq!(sequential, expected, comp = abs, tol = 1e-12);

    let mut parallel = DMatrix::zeros(3, 3);
    assembler.par_assemble_into(&mut parallel, &step()).unwrap();
    assert_matrix_eq!(parallel, sequential, comp = abs, tol = 1e-12);

    // Duplicate COO triplets must sum to the same dense matrix.
    let mut coo = CooMatrix::new(3, 3);
    assembler.assemble_into(&mut coo, &step()).unwrap();
    assert_matrix_eq!(convert_coo_dense(&coo), sequential, comp = abs, tol = 1e-12);
}

#[test]
fn residual_sweep_matches_global_stiffness_action() {
    let (trial, test) = temperature_pair();
    let (dofs, source) = two_cell_problem();
    let context = EvalContext::new(&dofs, &source);
    let cell_a = LineCell::new([0, 1], 1.0);
    let cell_b = LineCell::new([1, 2], 1.0);
    let cells: Vec<&dyn WeakFormCell<f64, U1>> = vec![&cell_a, &cell_b];
    let term = DiffusionTerm::new(trial, test, Arc::new(ConstantModel(1.0)));
    let terms: Vec<&dyn Term<f64, U1>> = vec![&term];
    let table = UniformQuadratureTable(gauss2());
    let assembler = WeakFormAssembler::new(&cells, &terms, &table, context);

    let mut stiffness = DMatrix::zeros(3, 3);
    assembler.assemble_into(&mut stiffness, &step()).unwrap();
    let mut residual = DVector::zeros(3);
    assembler.assemble_residual_into(&mut residual, &step()).unwrap();

    let unknowns = DVector::from_vec(vec![1.0, 2.0, 4.0]);
    assert_matrix_eq!(residual, stiffness * unknowns, comp = abs, tol = 1e-12);
}
