use std::sync::{Barrier, Mutex, PoisonError};

use tracing::debug;

use crate::storage::active_set::ActiveSet;

///
/// Collective that merges per-worker activation flags. After the call every
/// participating worker holds the elementwise OR of all workers' flags.
///
pub trait ActiveSetReconciler: Send + Sync
{
    fn reconcile(&self, flags: &mut [bool]);
}

/// The only worker: nothing to merge.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleWorker;

impl ActiveSetReconciler for SingleWorker
{
    fn reconcile(&self, _flags: &mut [bool]) {}
}

///
/// Reconciles a fixed number of threads of one process. Every thread must
/// call [`ActiveSetReconciler::reconcile`] the same number of times; each
/// call blocks until all threads have contributed.
///
#[derive(Debug)]
pub struct LocalReconciler
{
    barrier: Barrier,
    merged: Mutex<Vec<bool>>,
}

impl LocalReconciler
{
    pub fn new(num_workers: usize) -> Self
    {
        Self { barrier: Barrier::new(num_workers), merged: Mutex::new(Vec::new()) }
    }
}

impl ActiveSetReconciler for LocalReconciler
{
    fn reconcile(&self, flags: &mut [bool])
    {
        {
            let mut merged = self.merged.lock().unwrap_or_else(PoisonError::into_inner);
            if merged.len() < flags.len()
            {
                merged.resize(flags.len(), false);
            }
            for (m, &f) in merged.iter_mut().zip(flags.iter())
            {
                *m |= f;
            }
        }
        self.barrier.wait();
        {
            let merged = self.merged.lock().unwrap_or_else(PoisonError::into_inner);
            flags.copy_from_slice(&merged[..flags.len()]);
        }
        // everyone has read before the buffer is reset for the next round
        if self.barrier.wait().is_leader()
        {
            self.merged.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
        self.barrier.wait();
    }
}

/// Outcome of a reconciliation round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciled
{
    /// Species activated because another worker needed them.
    pub newly_activated: Vec<usize>,
}

///
/// Runs the collective on `active` and activates every species some other
/// worker has active. Newly activated species are appended to the
/// simplified order, so locally active species keep their indices.
///
pub fn reconcile_active_set(active: &mut ActiveSet, reconciler: &dyn ActiveSetReconciler) -> Reconciled
{
    let mut flags = active.to_flags();
    reconciler.reconcile(&mut flags);
    let newly_activated: Vec<usize> = flags.iter().enumerate().filter(|&(i, &f)| f && !active.is_active(i)).map(|(i, _)| i).collect();
    for &species in &newly_activated
    {
        active.activate(species);
    }
    if !newly_activated.is_empty()
    {
        debug!(count = newly_activated.len(), "species activated by reconciliation");
    }
    Reconciled { newly_activated }
}

#[test]
fn test_two_workers_see_the_union()
{
    let reconciler = LocalReconciler::new(2);
    let rounds = [
        (vec![true, false, false, true], vec![false, false, true, true]),
        (vec![false, false, false, false], vec![false, true, false, false]),
    ];
    std::thread::scope(|scope|
    {
        let a = scope.spawn(|| rounds.iter().map(|(a, _)|
        {
            let mut flags = a.clone();
            reconciler.reconcile(&mut flags);
            flags
        }).collect::<Vec<_>>());
        let b = scope.spawn(|| rounds.iter().map(|(_, b)|
        {
            let mut flags = b.clone();
            reconciler.reconcile(&mut flags);
            flags
        }).collect::<Vec<_>>());
        let a = a.join().unwrap();
        let b = b.join().unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], vec![true, false, true, true]);
        // the second round does not see the first round's flags
        assert_eq!(a[1], vec![false, true, false, false]);
    });
}

#[test]
fn test_reconcile_is_sticky()
{
    struct ForceSpecies(usize);
    impl ActiveSetReconciler for ForceSpecies
    {
        fn reconcile(&self, flags: &mut [bool])
        {
            flags[self.0] = true;
        }
    }
    let mut active = ActiveSet::from_flags(&[false, true, false, true]);
    let reconciled = reconcile_active_set(&mut active, &ForceSpecies(2));
    assert_eq!(reconciled.newly_activated, vec![2]);
    // local species keep their simplified indices, the new one is appended
    assert_eq!(active.iter().collect::<Vec<_>>(), vec![1, 3, 2]);

    let reconciled = reconcile_active_set(&mut active, &SingleWorker);
    assert!(reconciled.newly_activated.is_empty());
    assert_eq!(active.len(), 3);
}
