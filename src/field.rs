//! Time stepping and access to stored unknowns.
//!
//! The dof resolver never stores field values itself: it resolves equation
//! numbers and asks an [`UnknownSource`] for the value of each primary dof.
//! Two access paths are provided with identical resolver semantics: the
//! classic per-mode solution vectors ([`SolutionVectors`]) and a generic
//! primary field carrying step history ([`PrimaryField`]).
use crate::dof::EquationNumber;
use crate::error::DofError;
use crate::Real;
use nalgebra::DVector;
use rustc_hash::FxHashMap;

/// Selects the semantics of an unknown value query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueMode {
    /// Total accumulated value of the unknown.
    Total,
    /// Increment over the previous time step.
    Incremental,
    /// First time derivative.
    Velocity,
    /// Second time derivative.
    Acceleration,
}

/// A discrete time step.
///
/// `dt` is the length of the step, i.e. `time - previous.time`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeStep<T> {
    pub number: usize,
    pub time: T,
    pub dt: T,
}

impl<T: Real> TimeStep<T> {
    pub fn new(number: usize, time: T, dt: T) -> Self {
        Self { number, time, dt }
    }
}

/// Source of stored unknown values, keyed by equation number.
///
/// Implementations must be pure queries: concurrent calls from many elements
/// during an assembly sweep must not interfere.
pub trait UnknownSource<T: Real>: Sync {
    fn value(
        &self,
        equation: EquationNumber,
        mode: ValueMode,
        step: &TimeStep<T>,
    ) -> Result<T, DofError>;
}

/// Classic access path: one global vector per value mode, indexed by active
/// equation number (1-based), plus an optional vector of prescribed values
/// indexed by prescribed equation number.
#[derive(Debug, Clone, Default)]
pub struct SolutionVectors<T: Real> {
    vectors: FxHashMap<ValueMode, DVector<T>>,
    prescribed: Option<DVector<T>>,
}

impl<T: Real> SolutionVectors<T> {
    pub fn new() -> Self {
        Self {
            vectors: FxHashMap::default(),
            prescribed: None,
        }
    }

    pub fn insert(&mut self, mode: ValueMode, values: DVector<T>) -> &mut Self {
        self.vectors.insert(mode, values);
        self
    }

    pub fn with_mode(mut self, mode: ValueMode, values: DVector<T>) -> Self {
        self.insert(mode, values);
        self
    }

    pub fn with_prescribed(mut self, values: DVector<T>) -> Self {
        self.prescribed = Some(values);
        self
    }
}

impl<T: Real> UnknownSource<T> for SolutionVectors<T> {
    fn value(
        &self,
        equation: EquationNumber,
        mode: ValueMode,
        _step: &TimeStep<T>,
    ) -> Result<T, DofError> {
        let unavailable = || DofError::ValueUnavailable { equation, mode };
        match equation {
            EquationNumber::Active(n) => {
                let vector = self.vectors.get(&mode).ok_or_else(unavailable)?;
                vector.get(n - 1).copied().ok_or_else(unavailable)
            }
            // Prescribed values are only meaningful as totals; the increments
            // and rates of a driven dof belong to the bc collaborator.
            EquationNumber::Prescribed(n) => match mode {
                ValueMode::Total => {
                    let vector = self.prescribed.as_ref().ok_or_else(unavailable)?;
                    vector.get(n - 1).copied().ok_or_else(unavailable)
                }
                _ => Err(unavailable()),
            },
        }
    }
}

/// Generic primary field: stores one solution state per time step and derives
/// incremental, velocity and acceleration values from the history.
#[derive(Debug, Clone, Default)]
pub struct PrimaryField<T: Real> {
    states: FxHashMap<usize, DVector<T>>,
}

impl<T: Real> PrimaryField<T> {
    pub fn new() -> Self {
        Self {
            states: FxHashMap::default(),
        }
    }

    /// Records the converged solution of the given step.
    pub fn advance(&mut self, step_number: usize, values: DVector<T>) {
        self.states.insert(step_number, values);
    }

    pub fn state(&self, step_number: usize) -> Option<&DVector<T>> {
        self.states.get(&step_number)
    }

    fn entry(&self, step_number: usize, index: usize) -> Option<T> {
        self.states
            .get(&step_number)
            .and_then(|state| state.get(index))
            .copied()
    }
}

impl<T: Real> UnknownSource<T> for PrimaryField<T> {
    fn value(
        &self,
        equation: EquationNumber,
        mode: ValueMode,
        step: &TimeStep<T>,
    ) -> Result<T, DofError> {
        let unavailable = || DofError::ValueUnavailable { equation, mode };
        let n = match equation {
            EquationNumber::Active(n) => n,
            // Prescribed values come from the bc collaborator, not the field.
            EquationNumber::Prescribed(_) => return Err(unavailable()),
        };
        let index = n - 1;
        let current = self.entry(step.number, index).ok_or_else(unavailable)?;
        match mode {
            ValueMode::Total => Ok(current),
            ValueMode::Incremental => {
                let previous = self.entry(step.number.wrapping_sub(1), index).ok_or_else(unavailable)?;
                Ok(current - previous)
            }
            ValueMode::Velocity => {
                let previous = self.entry(step.number.wrapping_sub(1), index).ok_or_else(unavailable)?;
                Ok((current - previous) / step.dt)
            }
            ValueMode::Acceleration => {
                let previous = self.entry(step.number.wrapping_sub(1), index).ok_or_else(unavailable)?;
                let before = self.entry(step.number.wrapping_sub(2), index).ok_or_else(unavailable)?;
                Ok((current - previous - previous + before) / (step.dt * step.dt))
            }
        }
    }
}
