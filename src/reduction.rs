//! Dynamic mechanism reduction: picks, for the current state, the species
//! whose chemistry matters and marks the rest inactive.
//!
//! Each strategy builds a graph over the species and keeps what is reachable
//! from the search-seed species. The resulting [`ActiveSet`] sizes the entries
//! the tabulation stores.
pub mod drg;
pub mod efa;
pub mod mechanism;
pub mod reconcile;

use std::collections::VecDeque;

use crate::storage::active_set::ActiveSet;

pub use drg::Drg;
pub use efa::Efa;
pub use mechanism::{MassActionNetwork, Reaction, ReactionNetwork};
pub use reconcile::{ActiveSetReconciler, LocalReconciler, Reconciled, SingleWorker};

///
/// Capability shared by the reduction strategies.
///
pub trait MechanismReduction
{
    ///
    /// Computes the active set for `input` (concentrations followed by
    /// temperature and pressure).
    ///
    fn reduce(&mut self, input: &[f64]) -> &ActiveSet;

    /// Active set of the last call to `reduce`, after reconciliation.
    fn active_set(&self) -> &ActiveSet;

    fn active_set_mut(&mut self) -> &mut ActiveSet;

    ///
    /// Makes the activation decision consistent across workers: a species
    /// active on any worker becomes active here. Locally active species are
    /// never deactivated. Collective: every worker must call it once per
    /// outer time step.
    ///
    fn reconcile(&mut self, reconciler: &dyn ActiveSetReconciler) -> Reconciled
    {
        reconcile::reconcile_active_set(self.active_set_mut(), reconciler)
    }
}

/// Closed set of reduction strategies.
pub enum ReductionMethod
{
    /// Every species always active.
    None(ActiveSet),
    Drg(Drg),
    Efa(Efa),
}

impl ReductionMethod
{
    pub fn none(num_species: usize) -> Self
    {
        ReductionMethod::None(ActiveSet::full(num_species))
    }

    pub fn is_reducing(&self) -> bool
    {
        !matches!(self, ReductionMethod::None(_))
    }

    ///
    /// Active set to hand to the tabulation: `None` when no reduction is done,
    /// so that entries use the full state.
    ///
    pub fn tabulation_frame(&self) -> Option<&ActiveSet>
    {
        if self.is_reducing() { Some(self.active_set()) } else { None }
    }
}

impl MechanismReduction for ReductionMethod
{
    fn reduce(&mut self, input: &[f64]) -> &ActiveSet
    {
        match self
        {
            ReductionMethod::None(active) => &*active,
            ReductionMethod::Drg(drg) => drg.reduce(input),
            ReductionMethod::Efa(efa) => efa.reduce(input),
        }
    }

    fn active_set(&self) -> &ActiveSet
    {
        match self
        {
            ReductionMethod::None(active) => active,
            ReductionMethod::Drg(drg) => drg.active_set(),
            ReductionMethod::Efa(efa) => efa.active_set(),
        }
    }

    fn active_set_mut(&mut self) -> &mut ActiveSet
    {
        match self
        {
            ReductionMethod::None(active) => active,
            ReductionMethod::Drg(drg) => drg.active_set_mut(),
            ReductionMethod::Efa(efa) => efa.active_set_mut(),
        }
    }
}

///
/// Species reachable from `seeds` along `adjacency`, seeds included.
///
pub(crate) fn reachable_from(seeds: &[usize], adjacency: &[Vec<usize>]) -> ActiveSet
{
    let mut visited = vec![false; adjacency.len()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for &seed in seeds
    {
        if !visited[seed]
        {
            visited[seed] = true;
            queue.push_back(seed);
        }
    }
    while let Some(species) = queue.pop_front()
    {
        for &next in &adjacency[species]
        {
            if !visited[next]
            {
                visited[next] = true;
                queue.push_back(next);
            }
        }
    }
    ActiveSet::from_flags(&visited)
}

#[test]
fn test_reachable_from()
{
    let adjacency = vec![vec![1], vec![2], vec![], vec![0], vec![]];
    let active = reachable_from(&[0], &adjacency);
    assert_eq!(active.to_flags(), vec![true, true, true, false, false]);
    let active = reachable_from(&[4, 3], &adjacency);
    assert_eq!(active.to_flags(), vec![true, true, true, true, true]);
}

#[test]
fn test_no_reduction()
{
    let mut method = ReductionMethod::none(4);
    assert!(!method.is_reducing());
    assert_eq!(method.reduce(&[0.0; 6]).len(), 4);
    assert!(method.tabulation_frame().is_none());
    let reconciled = method.reconcile(&SingleWorker);
    assert!(reconciled.newly_activated.is_empty());
}
