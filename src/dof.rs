//! Degrees of freedom and the dependency resolver.
//!
//! A [`Dof`] is a single scalar unknown attached to a node. It is either
//! *free*, in which case it owns an equation number in the global system, or
//! a *slave*: a weighted combination of master dofs, themselves free or
//! slave. Slaves have no equation number, no boundary or initial condition
//! and no local coordinate system; every query on a slave is answered by
//! recursively flattening its master chain to *primary* (free) dofs.
//!
//! All dofs live in a [`DofStore`] arena and are addressed by [`DofHandle`].
//! Resolver queries never cache: a mutation of a master's weight or master
//! set is visible to the next query without invalidation bookkeeping.
use crate::error::{ContextError, DofError};
use crate::field::{TimeStep, UnknownSource, ValueMode};
use crate::Real;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Index of a dof in a [`DofStore`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DofHandle(usize);

impl DofHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Physical identity of a dof within a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DofId {
    DisplacementX,
    DisplacementY,
    DisplacementZ,
    RotationX,
    RotationY,
    RotationZ,
    Temperature,
    Pressure,
    MoistureContent,
    /// Escape hatch for physics this crate does not name.
    Other(u16),
}

/// Position of a free dof in the global algebraic system.
///
/// Free dofs without a Dirichlet condition receive `Active` numbers; dofs
/// driven by a Dirichlet condition are numbered separately as `Prescribed`.
/// Both are 1-based and unique within their class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquationNumber {
    Active(usize),
    Prescribed(usize),
}

impl EquationNumber {
    pub fn number(&self) -> usize {
        match self {
            EquationNumber::Active(n) | EquationNumber::Prescribed(n) => *n,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, EquationNumber::Active(_))
    }
}

/// One weighted master reference of a slave dof.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MasterWeight<T> {
    pub master: DofHandle,
    pub weight: T,
}

impl<T> MasterWeight<T> {
    pub fn new(master: DofHandle, weight: T) -> Self {
        Self { master, weight }
    }
}

/// A free dof: owns its equation number and may carry bc/ic ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeDof {
    equation: Option<EquationNumber>,
    bc: Option<usize>,
    ic: Option<usize>,
}

/// A slave dof: an ordered weighted combination of master dofs.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveDof<T> {
    masters: Vec<MasterWeight<T>>,
}

impl<T> SlaveDof<T> {
    pub fn masters(&self) -> &[MasterWeight<T>] {
        &self.masters
    }
}

/// A single scalar unknown attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Dof<T> {
    Free(FreeDof),
    Slave(SlaveDof<T>),
}

impl<T> Dof<T> {
    pub fn is_slave(&self) -> bool {
        matches!(self, Dof::Slave(_))
    }
}

#[derive(Debug, Clone)]
struct DofEntry<T> {
    node: usize,
    id: DofId,
    dof: Dof<T>,
}

/// Supplies the values a boundary condition prescribes. The bc records
/// themselves live with an external collaborator; the store only hands over
/// the attached bc id.
pub trait BcValueSource<T: Real> {
    fn values(&self, bc: usize, mode: ValueMode, step: &TimeStep<T>) -> Vec<T>;
}

/// Counters handed out by equation numbering; renumbering a single dof with
/// [`DofStore::ask_new_equation_number`] draws from the same cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EquationCursor {
    pub active: usize,
    pub prescribed: usize,
}

/// Arena of all dofs of a domain, with the dependency resolver operating on it.
#[derive(Debug, Clone, Default)]
pub struct DofStore<T> {
    entries: Vec<DofEntry<T>>,
    by_node: FxHashMap<(usize, DofId), DofHandle>,
}

impl<T: Real> DofStore<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_node: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = DofHandle> {
        (0..self.entries.len()).map(DofHandle)
    }

    /// Adds a free dof without boundary or initial condition.
    pub fn add_free(&mut self, node: usize, id: DofId) -> DofHandle {
        self.add_free_conditioned(node, id, None, None)
    }

    /// Adds a free dof, optionally subject to a boundary and/or initial
    /// condition (ids refer to external collaborator records).
    pub fn add_free_conditioned(
        &mut self,
        node: usize,
        id: DofId,
        bc: Option<usize>,
        ic: Option<usize>,
    ) -> DofHandle {
        self.push(node, id, Dof::Free(FreeDof { equation: None, bc, ic }))
    }

    /// Adds a slave dof. Masters must already exist in the store, which makes
    /// a dependency cycle impossible at construction time.
    pub fn add_slave(
        &mut self,
        node: usize,
        id: DofId,
        masters: Vec<MasterWeight<T>>,
    ) -> Result<DofHandle, DofError> {
        let handle = DofHandle(self.entries.len());
        Self::check_masters(handle, self.entries.len(), &masters)?;
        Ok(self.push(node, id, Dof::Slave(SlaveDof { masters })))
    }

    /// Replaces the master set of an existing slave dof.
    ///
    /// This is the only way to introduce a cycle; run [`DofStore::validate`]
    /// before the next assembly after mutating master sets.
    pub fn set_slave_masters(
        &mut self,
        dof: DofHandle,
        masters: Vec<MasterWeight<T>>,
    ) -> Result<(), DofError> {
        Self::check_masters(dof, self.entries.len(), &masters)?;
        match &mut self.entries[dof.0].dof {
            Dof::Slave(slave) => {
                slave.masters = masters;
                Ok(())
            }
            Dof::Free(_) => Err(DofError::UnsupportedOperation {
                dof,
                operation: "set_slave_masters",
            }),
        }
    }

    fn check_masters(
        dof: DofHandle,
        store_len: usize,
        masters: &[MasterWeight<T>],
    ) -> Result<(), DofError> {
        if masters.is_empty() {
            return Err(DofError::EmptyMasterList { dof });
        }
        for (index, mw) in masters.iter().enumerate() {
            if mw.master.0 >= store_len || mw.master == dof {
                return Err(DofError::InvalidMaster { dof, master: mw.master });
            }
            if !mw.weight.is_finite() {
                return Err(DofError::NonFiniteWeight { dof, index });
            }
        }
        Ok(())
    }

    fn push(&mut self, node: usize, id: DofId, dof: Dof<T>) -> DofHandle {
        let handle = DofHandle(self.entries.len());
        self.entries.push(DofEntry { node, id, dof });
        self.by_node.insert((node, id), handle);
        handle
    }

    pub fn dof(&self, handle: DofHandle) -> &Dof<T> {
        &self.entries[handle.0].dof
    }

    pub fn node(&self, handle: DofHandle) -> usize {
        self.entries[handle.0].node
    }

    pub fn dof_id(&self, handle: DofHandle) -> DofId {
        self.entries[handle.0].id
    }

    /// Looks up the dof with the given id at the given node.
    pub fn dof_at(&self, node: usize, id: DofId) -> Result<DofHandle, DofError> {
        self.by_node
            .get(&(node, id))
            .copied()
            .ok_or(DofError::MissingDof { node, dof_id: id })
    }

    // ----- configuration validation -------------------------------------

    /// Checks the whole store for configuration errors: empty or dangling
    /// master lists, non-finite weights, slave→master cycles and duplicate
    /// equation numbers. Must pass before any assembly runs; resolver queries
    /// assume a validated store.
    pub fn validate(&self) -> Result<(), DofError> {
        for (index, entry) in self.entries.iter().enumerate() {
            if let Dof::Slave(slave) = &entry.dof {
                Self::check_masters(DofHandle(index), self.entries.len(), &slave.masters)?;
            }
        }
        self.check_acyclic()?;
        self.check_unique_equations()?;
        log::debug!("dof store validated: {} dofs", self.entries.len());
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), DofError> {
        // Iterative three-state DFS over the slave→master graph.
        #[derive(Copy, Clone, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; self.entries.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.entries.len() {
            if marks[start] != Mark::White {
                continue;
            }
            stack.push((start, 0));
            marks[start] = Mark::Grey;
            while !stack.is_empty() {
                let (current, child) = {
                    let frame = stack.last_mut().unwrap();
                    let masters: &[MasterWeight<T>] = match &self.entries[frame.0].dof {
                        Dof::Slave(slave) => &slave.masters,
                        Dof::Free(_) => &[],
                    };
                    let child = masters.get(frame.1).map(|mw| mw.master.0);
                    frame.1 += 1;
                    (frame.0, child)
                };
                match child {
                    Some(child) => match marks[child] {
                        Mark::Grey => {
                            return Err(DofError::CyclicDependency { dof: DofHandle(child) })
                        }
                        Mark::White => {
                            marks[child] = Mark::Grey;
                            stack.push((child, 0));
                        }
                        Mark::Black => {}
                    },
                    None => {
                        marks[current] = Mark::Black;
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }

    fn check_unique_equations(&self) -> Result<(), DofError> {
        let mut seen: FxHashMap<EquationNumber, DofHandle> = FxHashMap::default();
        for (index, entry) in self.entries.iter().enumerate() {
            if let Dof::Free(free) = &entry.dof {
                if let Some(equation) = free.equation {
                    if let Some(&other) = seen.get(&equation) {
                        return Err(DofError::DuplicateEquationNumber {
                            dof: DofHandle(index),
                            other,
                            equation,
                        });
                    }
                    seen.insert(equation, DofHandle(index));
                }
            }
        }
        Ok(())
    }

    // ----- equation numbering -------------------------------------------

    /// Assigns equation numbers to all free dofs in handle order: dofs with a
    /// Dirichlet bc are numbered in the prescribed class, all others in the
    /// active class. Any previous numbering is discarded.
    pub fn number_equations(&mut self) -> EquationCursor {
        let mut cursor = EquationCursor::default();
        for entry in &mut self.entries {
            if let Dof::Free(free) = &mut entry.dof {
                free.equation = Some(Self::next_equation(free, &mut cursor));
            }
        }
        log::debug!(
            "numbered equations: {} active, {} prescribed",
            cursor.active,
            cursor.prescribed
        );
        cursor
    }

    /// Renumbers a single dof against the given cursor. On a slave this is a
    /// no-op success: a slave is satisfied once its masters are renumbered.
    pub fn ask_new_equation_number(
        &mut self,
        dof: DofHandle,
        cursor: &mut EquationCursor,
    ) -> Result<(), DofError> {
        match &mut self.entries[dof.0].dof {
            Dof::Free(free) => {
                free.equation = Some(Self::next_equation(free, cursor));
                Ok(())
            }
            Dof::Slave(_) => Ok(()),
        }
    }

    fn next_equation(free: &FreeDof, cursor: &mut EquationCursor) -> EquationNumber {
        if free.bc.is_some() {
            cursor.prescribed += 1;
            EquationNumber::Prescribed(cursor.prescribed)
        } else {
            cursor.active += 1;
            EquationNumber::Active(cursor.active)
        }
    }

    /// The equation number of a free dof.
    ///
    /// Fails on a slave: a slave has no independent equation number; use
    /// [`DofStore::equation_numbers`] for its flattened primaries instead.
    pub fn equation_number(&self, dof: DofHandle) -> Result<EquationNumber, DofError> {
        match self.dof(dof) {
            Dof::Free(free) => free.equation.ok_or(DofError::Unnumbered { dof }),
            Dof::Slave(_) => Err(DofError::UnsupportedOperation {
                dof,
                operation: "equation_number",
            }),
        }
    }

    /// The prescribed equation number of a Dirichlet-driven free dof.
    /// Fails on a slave.
    pub fn prescribed_equation_number(&self, dof: DofHandle) -> Result<usize, DofError> {
        match self.equation_number(dof)? {
            EquationNumber::Prescribed(n) => Ok(n),
            EquationNumber::Active(_) => Err(DofError::Unnumbered { dof }),
        }
    }

    // ----- dependency resolution ----------------------------------------

    /// Flattens the dof to primary (free) dofs with accumulated weights.
    ///
    /// A free dof flattens to itself with weight one. For a slave, free
    /// masters are emitted directly and slave masters are flattened
    /// recursively with their weights scaled; a primary reached via several
    /// paths appears once, with the path weights summed. Order is the order
    /// in which primaries are first reached.
    ///
    /// Termination relies on the acyclicity invariant checked by
    /// [`DofStore::validate`].
    pub fn flatten(&self, dof: DofHandle) -> Result<Vec<(DofHandle, T)>, DofError> {
        let mut primaries = Vec::new();
        let mut positions = FxHashMap::default();
        self.flatten_into(dof, T::one(), &mut primaries, &mut positions)?;
        Ok(primaries)
    }

    fn flatten_into(
        &self,
        dof: DofHandle,
        scale: T,
        primaries: &mut Vec<(DofHandle, T)>,
        positions: &mut FxHashMap<DofHandle, usize>,
    ) -> Result<(), DofError> {
        match self.dof(dof) {
            Dof::Free(_) => {
                match positions.get(&dof) {
                    Some(&position) => primaries[position].1 += scale,
                    None => {
                        positions.insert(dof, primaries.len());
                        primaries.push((dof, scale));
                    }
                }
                Ok(())
            }
            Dof::Slave(slave) => {
                if slave.masters.is_empty() {
                    return Err(DofError::EmptyMasterList { dof });
                }
                for mw in &slave.masters {
                    self.flatten_into(mw.master, scale * mw.weight, primaries, positions)?;
                }
                Ok(())
            }
        }
    }

    /// Number of distinct primary dofs the receiver flattens to.
    pub fn num_primary_master_dofs(&self, dof: DofHandle) -> Result<usize, DofError> {
        Ok(self.flatten(dof)?.len())
    }

    /// Equation numbers of the flattened primaries, in flattening order.
    pub fn equation_numbers(&self, dof: DofHandle) -> Result<Vec<EquationNumber>, DofError> {
        self.flatten(dof)?
            .into_iter()
            .map(|(primary, _)| self.equation_number(primary))
            .collect()
    }

    /// Flattened contribution weights, in the same order as
    /// [`DofStore::equation_numbers`].
    pub fn master_weights(&self, dof: DofHandle) -> Result<Vec<T>, DofError> {
        Ok(self.flatten(dof)?.into_iter().map(|(_, w)| w).collect())
    }

    /// Direct (unflattened) master handles of a slave dof.
    pub fn master_dof_handles(&self, dof: DofHandle) -> Result<Vec<DofHandle>, DofError> {
        match self.dof(dof) {
            Dof::Slave(slave) => Ok(slave.masters.iter().map(|mw| mw.master).collect()),
            Dof::Free(_) => Err(DofError::UnsupportedOperation {
                dof,
                operation: "master_dof_handles",
            }),
        }
    }

    /// Value of the unknown associated with the dof, resolving slaves through
    /// their primaries: `Σ wᵢ · value(primaryᵢ)`. The value mode is forwarded
    /// unchanged to the source for every primary.
    pub fn unknown(
        &self,
        dof: DofHandle,
        source: &dyn UnknownSource<T>,
        mode: ValueMode,
        step: &TimeStep<T>,
    ) -> Result<T, DofError> {
        let mut total = T::zero();
        for (primary, weight) in self.flatten(dof)? {
            let equation = self.equation_number(primary)?;
            total += weight * source.value(equation, mode, step)?;
        }
        Ok(total)
    }

    /// Values of the flattened primaries, in flattening order.
    pub fn unknowns_of_masters(
        &self,
        dof: DofHandle,
        source: &dyn UnknownSource<T>,
        mode: ValueMode,
        step: &TimeStep<T>,
    ) -> Result<Vec<T>, DofError> {
        self.flatten(dof)?
            .into_iter()
            .map(|(primary, _)| {
                let equation = self.equation_number(primary)?;
                source.value(equation, mode, step)
            })
            .collect()
    }

    /// Value of the unknown in the dof's local coordinate system.
    ///
    /// A slave has no local coordinate system; the query always fails on a
    /// slave. A free dof in this core has no rotated local system either, so
    /// the local value coincides with [`DofStore::unknown`].
    pub fn local_unknown(
        &self,
        dof: DofHandle,
        source: &dyn UnknownSource<T>,
        mode: ValueMode,
        step: &TimeStep<T>,
    ) -> Result<T, DofError> {
        if self.dof(dof).is_slave() {
            return Err(DofError::UnsupportedOperation {
                dof,
                operation: "local_unknown",
            });
        }
        self.unknown(dof, source, mode, step)
    }

    // ----- boundary and initial conditions ------------------------------

    /// Whether the dof is subject to a boundary condition. A slave never is:
    /// its value is entirely derived from its masters.
    pub fn has_bc(&self, dof: DofHandle) -> bool {
        matches!(self.dof(dof), Dof::Free(free) if free.bc.is_some())
    }

    pub fn has_ic(&self, dof: DofHandle) -> bool {
        matches!(self.dof(dof), Dof::Free(free) if free.ic.is_some())
    }

    /// Whether an initial condition prescribes the given mode. The ic record
    /// itself lives with the external collaborator; this core only knows
    /// whether one is attached.
    pub fn has_ic_on(&self, dof: DofHandle, _mode: ValueMode) -> bool {
        self.has_ic(dof)
    }

    /// Values prescribed on the dof by its boundary condition, obtained from
    /// the bc collaborator. Empty when no bc is attached; always empty on a
    /// slave, whose value is entirely derived from its masters.
    pub fn bc_values(
        &self,
        dof: DofHandle,
        bcs: &dyn BcValueSource<T>,
        mode: ValueMode,
        step: &TimeStep<T>,
    ) -> Vec<T> {
        match self.dof(dof) {
            Dof::Free(free) => free
                .bc
                .map(|bc| bcs.values(bc, mode, step))
                .unwrap_or_default(),
            Dof::Slave(_) => Vec::new(),
        }
    }

    /// Id of the attached boundary condition, `None` on slaves and
    /// unconditioned free dofs.
    pub fn bc_id(&self, dof: DofHandle) -> Option<usize> {
        match self.dof(dof) {
            Dof::Free(free) => free.bc,
            Dof::Slave(_) => None,
        }
    }

    pub fn ic_id(&self, dof: DofHandle) -> Option<usize> {
        match self.dof(dof) {
            Dof::Free(free) => free.ic,
            Dof::Slave(_) => None,
        }
    }
}

// ----- persistence -------------------------------------------------------

/// Serialized state of a slave dof: master count, master references, master
/// dof-id array and contribution weights, in that order.
#[derive(Debug, Serialize, Deserialize)]
struct SlaveContext<T> {
    master_count: usize,
    masters: Vec<usize>,
    dof_ids: Vec<DofId>,
    weights: Vec<T>,
}

impl<T: Real + Serialize + DeserializeOwned> DofStore<T> {
    /// Writes the state of a slave dof to the stream.
    pub fn save_slave_context<W: Write>(
        &self,
        dof: DofHandle,
        writer: W,
    ) -> Result<(), ContextError> {
        let slave = match self.dof(dof) {
            Dof::Slave(slave) => slave,
            Dof::Free(_) => {
                return Err(ContextError::Malformed(format!(
                    "dof {:?} is not a slave",
                    dof
                )))
            }
        };
        let context = SlaveContext {
            master_count: slave.masters.len(),
            masters: slave.masters.iter().map(|mw| mw.master.0).collect(),
            dof_ids: slave
                .masters
                .iter()
                .map(|mw| self.dof_id(mw.master))
                .collect(),
            weights: slave.masters.iter().map(|mw| mw.weight).collect(),
        };
        serde_json::to_writer(writer, &context)?;
        Ok(())
    }

    /// Restores a slave dof's state previously written with
    /// [`DofStore::save_slave_context`]. The restored store should be
    /// re-validated before assembly.
    pub fn restore_slave_context<R: Read>(
        &mut self,
        dof: DofHandle,
        reader: R,
    ) -> Result<(), ContextError> {
        let context: SlaveContext<T> = serde_json::from_reader(reader)?;
        if context.masters.len() != context.master_count
            || context.weights.len() != context.master_count
            || context.dof_ids.len() != context.master_count
        {
            return Err(ContextError::Malformed(format!(
                "master arrays disagree with master count {}",
                context.master_count
            )));
        }
        let mut masters = Vec::with_capacity(context.master_count);
        for ((&master, &weight), &id) in context
            .masters
            .iter()
            .zip(&context.weights)
            .zip(&context.dof_ids)
        {
            if master >= self.entries.len() {
                return Err(ContextError::Malformed(format!(
                    "master reference {} points outside the store",
                    master
                )));
            }
            let handle = DofHandle(master);
            if self.dof_id(handle) != id {
                return Err(ContextError::Malformed(format!(
                    "master {} carries dof id {:?}, context recorded {:?}",
                    master,
                    self.dof_id(handle),
                    id
                )));
            }
            masters.push(MasterWeight::new(handle, weight));
        }
        self.set_slave_masters(dof, masters)
            .map_err(|err| ContextError::Malformed(err.to_string()))
    }
}
