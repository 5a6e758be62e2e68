//! Adaptive tabulation of an expensive mapping `R(phi)`.
//!
//! The host calls [`Tabulation::retrieve`] first; on a miss it evaluates the
//! mapping itself and hands the result to [`Tabulation::add`].
pub mod isat;
pub mod mru;
pub mod sensitivity;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::storage::active_set::ActiveSet;

pub use isat::Isat;

/// What `add` did with a computed result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome
{
    /// An existing entry's region was grown to cover the query.
    Grown,
    /// A new entry was stored.
    Inserted,
    /// Nothing was stored (tabulation disabled, or the result was malformed).
    Skipped,
}

/// Performance counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics
{
    pub hits: usize,
    /// Hits found through the MRU list after the tree candidate missed.
    pub mru_hits: usize,
    pub misses: usize,
    pub growths: usize,
    pub insertions: usize,
    pub removals: usize,
    pub balances: usize,
    pub size: usize,
}

///
/// Capability shared by every tabulation strategy. Query-path methods are
/// total: they never fail, a miss or a skipped insertion is reported instead.
///
pub trait Tabulation
{
    /// False when tabulation is switched off.
    fn active(&self) -> bool;

    ///
    /// Tries to answer `query` from the table. On a hit the approximation is
    /// written to `result` and `true` is returned.
    ///
    fn retrieve(&mut self, query: &[f64], result: &mut [f64]) -> bool;

    ///
    /// Records the exact `output` of the mapping at `query` and its
    /// `sensitivity` (square, in the frame of `active` when given).
    ///
    fn add(&mut self, query: &[f64], output: &[f64], sensitivity: &Array2<f64>, active: Option<&ActiveSet>) -> AddOutcome;

    /// Runs pending maintenance. Returns true if the table changed.
    fn update(&mut self) -> bool;

    fn size(&self) -> usize;

    fn statistics(&self) -> Statistics;
}

/// Closed set of tabulation strategies.
#[derive(Clone, Debug, Default)]
pub enum TabulationMethod
{
    #[default]
    Disabled,
    Isat(Box<Isat>),
}

impl Tabulation for TabulationMethod
{
    fn active(&self) -> bool
    {
        !matches!(self, TabulationMethod::Disabled)
    }

    fn retrieve(&mut self, query: &[f64], result: &mut [f64]) -> bool
    {
        match self
        {
            TabulationMethod::Disabled => false,
            TabulationMethod::Isat(isat) => isat.retrieve(query, result),
        }
    }

    fn add(&mut self, query: &[f64], output: &[f64], sensitivity: &Array2<f64>, active: Option<&ActiveSet>) -> AddOutcome
    {
        match self
        {
            TabulationMethod::Disabled => AddOutcome::Skipped,
            TabulationMethod::Isat(isat) => isat.add(query, output, sensitivity, active),
        }
    }

    fn update(&mut self) -> bool
    {
        match self
        {
            TabulationMethod::Disabled => false,
            TabulationMethod::Isat(isat) => isat.update(),
        }
    }

    fn size(&self) -> usize
    {
        match self
        {
            TabulationMethod::Disabled => 0,
            TabulationMethod::Isat(isat) => isat.size(),
        }
    }

    fn statistics(&self) -> Statistics
    {
        match self
        {
            TabulationMethod::Disabled => Statistics::default(),
            TabulationMethod::Isat(isat) => isat.statistics(),
        }
    }
}

#[test]
fn test_disabled_tabulation_always_misses()
{
    let mut method = TabulationMethod::default();
    let mut result = [0.0; 3];
    assert!(!method.active());
    assert!(!method.retrieve(&[1.0, 2.0, 3.0], &mut result));
    assert_eq!(method.add(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], &crate::linalg::identity(3), None), AddOutcome::Skipped);
    assert!(!method.update());
    assert_eq!(method.size(), 0);
}

#[test]
fn test_isat_through_trait_object()
{
    use crate::options::TabulationOptions;
    let isat = Isat::new(3, TabulationOptions::new(0.1)).unwrap();
    let mut method = TabulationMethod::Isat(Box::new(isat));
    let table: &mut dyn Tabulation = &mut method;
    let mut result = [0.0; 3];
    assert!(table.active());
    assert!(!table.retrieve(&[1.0, 0.0, 0.0], &mut result));
    assert_eq!(table.add(&[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0], &crate::linalg::identity(3), None), AddOutcome::Inserted);
    assert!(table.retrieve(&[1.0, 0.0, 0.0], &mut result));
    assert_eq!(result, [2.0, 0.0, 0.0]);
    let statistics = table.statistics();
    assert_eq!((statistics.hits, statistics.misses, statistics.insertions, statistics.size), (1, 1, 1, 1));
}
