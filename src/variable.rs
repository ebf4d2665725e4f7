//! Field descriptors for weak forms.
//!
//! A [`Variable`] describes an unknown field (or its paired test field): the
//! physical quantity, whether it is scalar- or vector-valued, its size and
//! the dof-id mask it occupies at each node. A test (dual) variable shares
//! the primal's dof-id mask but never carries stored unknowns of its own.
use crate::dof::DofId;
use std::fmt;
use std::sync::Arc;

/// Whether a field is scalar- or vector-valued.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Valence {
    Scalar,
    Vector,
}

/// Physical quantity a variable represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Quantity {
    Displacement,
    Temperature,
    Pressure,
    MoistureContent,
}

/// Interpolation collaborator: decides which of a cell's incident nodes carry
/// dofs for a variable (e.g. only the corner nodes of a quadratic cell for a
/// linearly interpolated field). Shape-function data surfaces on the cell
/// through [`crate::element::WeakFormCell`].
pub trait Interpolation: fmt::Debug + Send + Sync {
    /// Dof-carrying nodes for this interpolation, given the cell's full
    /// incident node list.
    fn cell_nodes(&self, cell_nodes: &[usize]) -> Vec<usize>;
}

/// Interpolation over every incident node of the cell.
#[derive(Debug, Copy, Clone, Default)]
pub struct FullInterpolation;

impl Interpolation for FullInterpolation {
    fn cell_nodes(&self, cell_nodes: &[usize]) -> Vec<usize> {
        cell_nodes.to_vec()
    }
}

/// Descriptor of an unknown or test field in a weak form.
#[derive(Debug, Clone)]
pub struct Variable {
    quantity: Quantity,
    valence: Valence,
    dof_ids: Vec<DofId>,
    interpolation: Arc<dyn Interpolation>,
    dual_of: Option<Arc<Variable>>,
}

impl Variable {
    /// A primal (unknown-carrying) variable. The size of the variable is the
    /// length of its dof-id mask.
    ///
    /// # Panics
    ///
    /// Panics if the dof-id mask is empty, or if a scalar variable is given
    /// more than one dof id.
    pub fn new(
        interpolation: Arc<dyn Interpolation>,
        quantity: Quantity,
        valence: Valence,
        dof_ids: Vec<DofId>,
    ) -> Self {
        assert!(!dof_ids.is_empty(), "variable needs at least one dof id");
        if valence == Valence::Scalar {
            assert_eq!(dof_ids.len(), 1, "scalar variable must have exactly one dof id");
        }
        Self {
            quantity,
            valence,
            dof_ids,
            interpolation,
            dual_of: None,
        }
    }

    /// The test (dual) variable paired with a primal variable. It shares the
    /// primal's interpolation and dof-id mask; the relation is read-only and
    /// the dual never owns stored unknowns.
    pub fn dual(primal: &Arc<Variable>) -> Self {
        Self {
            quantity: primal.quantity,
            valence: primal.valence,
            dof_ids: primal.dof_ids.clone(),
            interpolation: Arc::clone(&primal.interpolation),
            dual_of: Some(Arc::clone(primal)),
        }
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn valence(&self) -> Valence {
        self.valence
    }

    /// Number of scalar dofs the variable occupies per node.
    pub fn size(&self) -> usize {
        self.dof_ids.len()
    }

    /// Dof-id mask the variable occupies at each of its nodes.
    pub fn dof_ids(&self) -> &[DofId] {
        &self.dof_ids
    }

    pub fn interpolation(&self) -> &Arc<dyn Interpolation> {
        &self.interpolation
    }

    pub fn is_dual(&self) -> bool {
        self.dual_of.is_some()
    }

    /// The primal variable this one is the test field of, if any.
    pub fn primal(&self) -> Option<&Arc<Variable>> {
        self.dual_of.as_ref()
    }
}
