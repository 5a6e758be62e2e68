use std::io::Write;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::TabulationError;
use crate::linalg::identity;
use crate::options::{TabulationOptions, NUM_STATE_VARIABLES};
use crate::serialization::SerializationFormat;
use crate::storage::active_set::ActiveSet;
use crate::storage::entry::{RegionContext, StoredEntry};
use crate::storage::EntryId;
use crate::tabulation::mru::MruList;
use crate::tabulation::{AddOutcome, Statistics, Tabulation};
use crate::tree::BinaryTree;

fn context<'a>(options: &TabulationOptions, scale_factors: &'a [f64]) -> RegionContext<'a>
{
    RegionContext {
        tolerance: options.tolerance,
        scale_factors,
        max_num_new_dim: options.max_num_new_dim,
        print_proportion: options.print_proportion,
    }
}

///
/// In situ adaptive tabulation.
///
/// Stores computed results of the mapping with their sensitivity and an
/// ellipsoid of accuracy in a binary tree. The clock counts retrieve calls;
/// entry lifetimes and the maintenance interval are measured in that unit.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Isat
{
    options: TabulationOptions,
    scale_factors: Vec<f64>,
    num_dims: usize,
    tree: BinaryTree,
    mru: MruList,
    /// Tree candidate of the last missed retrieve.
    last_search: Option<EntryId>,
    clock: u64,
    last_maintenance: u64,
    cleaning_required: bool,
    statistics: Statistics,
}

impl Isat
{
    ///
    /// Creates an empty table for states of `num_dims` dimensions (species,
    /// then temperature and pressure). Fails on invalid options.
    ///
    pub fn new(num_dims: usize, options: TabulationOptions) -> Result<Self, TabulationError>
    {
        let scale_factors = options.validate(num_dims)?;
        Ok(Self {
            mru: MruList::new(options.max_mru_size),
            options,
            scale_factors,
            num_dims,
            tree: BinaryTree::new(),
            last_search: None,
            clock: 0,
            last_maintenance: 0,
            cleaning_required: false,
            statistics: Statistics::default(),
        })
    }

    #[inline]
    pub fn options(&self) -> &TabulationOptions
    {
        &self.options
    }

    #[inline]
    pub fn num_dims(&self) -> usize
    {
        self.num_dims
    }

    #[inline]
    pub fn scale_factors(&self) -> &[f64]
    {
        &self.scale_factors
    }

    #[inline]
    pub fn tree(&self) -> &BinaryTree
    {
        &self.tree
    }

    #[inline]
    pub fn mru(&self) -> &MruList
    {
        &self.mru
    }

    #[inline]
    pub fn size(&self) -> usize
    {
        self.tree.size()
    }

    #[inline]
    pub fn depth(&self) -> usize
    {
        self.tree.depth()
    }

    #[inline]
    pub fn clock(&self) -> u64
    {
        self.clock
    }

    #[inline]
    pub fn last_search(&self) -> Option<EntryId>
    {
        self.last_search
    }

    #[inline]
    pub fn cleaning_required(&self) -> bool
    {
        self.cleaning_required
    }

    pub fn statistics(&self) -> Statistics
    {
        Statistics { size: self.tree.size(), ..self.statistics }
    }

    /// Drops every entry and resets the clock and the counters.
    pub fn clear(&mut self)
    {
        self.tree.clear();
        self.mru.clear();
        self.last_search = None;
        self.clock = 0;
        self.last_maintenance = 0;
        self.cleaning_required = false;
        self.statistics = Statistics::default();
    }

    ///
    /// Looks `query` up. Descends the tree to a candidate; if the query lies
    /// in its ellipsoid the linear approximation is written to `result`.
    /// Otherwise, with `mru_retrieve`, the recently used entries are tried in
    /// order. On a miss the tree candidate is remembered for [`Isat::add`].
    ///
    pub fn retrieve(&mut self, query: &[f64], result: &mut [f64]) -> bool
    {
        self.clock += 1;
        self.last_search = None;
        if query.len() != self.num_dims || result.len() != self.num_dims
        {
            warn!(expected = self.num_dims, query = query.len(), result = result.len(), "retrieve called with a state of the wrong dimension");
            self.statistics.misses += 1;
            return false;
        }
        let ctx = context(&self.options, &self.scale_factors);
        let Some(candidate) = self.tree.find_closest(query) else
        {
            self.statistics.misses += 1;
            return false;
        };

        let mut found = self.tree.entry(candidate).filter(|e| e.in_region(query, &ctx)).map(|_| candidate);
        if found.is_none() && self.options.mru_retrieve
        {
            found = self.mru.iter()
                .filter(|&id| id != candidate)
                .find(|&id| self.tree.entry(id).is_some_and(|e| e.in_region(query, &ctx)));
            if found.is_some()
            {
                self.statistics.mru_hits += 1;
            }
        }

        match found.and_then(|id| self.tree.entry_mut(id).map(|e| (id, e)))
        {
            Some((id, entry)) =>
            {
                entry.approximate(query, result);
                entry.last_used_time = self.clock;
                self.mru.touch(id);
                self.statistics.hits += 1;
                true
            }
            None =>
            {
                self.last_search = Some(candidate);
                self.statistics.misses += 1;
                false
            }
        }
    }

    ///
    /// Records the exact result of the mapping at `query`.
    ///
    /// With `grow_points`, the candidate of the last missed retrieve (or the
    /// leaf `query` reaches) is grown if its linear approximation reproduces
    /// `output` within the tolerance. Otherwise a new entry is built and
    /// inserted next to the leaf `query` reaches. Never fails: a malformed
    /// sensitivity is replaced by the identity, a malformed state is skipped.
    ///
    pub fn add(&mut self, query: &[f64], output: &[f64], sensitivity: &Array2<f64>, active: Option<&ActiveSet>) -> AddOutcome
    {
        if query.len() != self.num_dims || output.len() != self.num_dims
        {
            warn!(expected = self.num_dims, query = query.len(), output = output.len(), "add called with a state of the wrong dimension, result not stored");
            return AddOutcome::Skipped;
        }
        let num_species = self.num_dims - NUM_STATE_VARIABLES;
        let active = match active
        {
            Some(a) if a.num_species() != num_species =>
            {
                warn!(expected = num_species, got = a.num_species(), "active set does not match the state, treating every species as active");
                None
            }
            a => a,
        };

        let outcome = if self.options.grow_points && self.try_grow(query, output, active)
        {
            AddOutcome::Grown
        }
        else
        {
            self.insert(query, output, sensitivity, active);
            AddOutcome::Inserted
        };
        self.last_search = None;

        if self.maintenance_due()
        {
            self.clean_and_balance();
        }
        outcome
    }

    fn try_grow(&mut self, query: &[f64], output: &[f64], active: Option<&ActiveSet>) -> bool
    {
        let candidate = match self.last_search.filter(|&id| self.tree.entry(id).is_some())
        {
            Some(id) => id,
            None => match self.tree.find_closest(query)
            {
                Some(id) => id,
                None => return false,
            },
        };
        let ctx = context(&self.options, &self.scale_factors);
        let Some(entry) = self.tree.entry_mut(candidate) else { return false };

        if entry.growth_count() > self.options.max_growth
        {
            debug!(growth_count = entry.growth_count(), "entry grown too often, marked for removal");
            entry.set_to_remove(true);
            self.cleaning_required = true;
            return false;
        }
        if !entry.check_solution(query, output, &ctx)
        {
            debug!("growth refused: linear approximation outside tolerance");
            return false;
        }
        if !entry.grow(query, active, &ctx)
        {
            return false;
        }
        entry.last_used_time = self.clock;
        self.mru.touch(candidate);
        self.statistics.growths += 1;
        true
    }

    fn insert(&mut self, query: &[f64], output: &[f64], sensitivity: &Array2<f64>, active: Option<&ActiveSet>)
    {
        let dim = active.map_or(self.num_dims, |a| a.len() + NUM_STATE_VARIABLES);
        let sensitivity = if sensitivity.dim() == (dim, dim)
        {
            sensitivity.clone()
        }
        else
        {
            warn!(expected = dim, rows = sensitivity.nrows(), cols = sensitivity.ncols(), "sensitivity has the wrong shape, using the identity");
            identity(dim)
        };
        let ctx = context(&self.options, &self.scale_factors);

        let mut closest = self.tree.find_closest(query);
        if let Some(id) = closest.filter(|&id| self.tree.entry(id).is_some_and(|e| e.input() == query))
        {
            // one entry per input: the new result replaces the old one
            debug!("replacing entry with identical input");
            self.tree.delete_leaf(id);
            self.statistics.removals += 1;
            closest = self.tree.find_closest(query);
        }

        let entry = StoredEntry::new(query.to_vec(), output.to_vec(), sensitivity, active.cloned(), &ctx, self.clock);
        let id = self.tree.insert_new_leaf(closest, entry, &ctx);
        self.mru.touch(id);
        self.statistics.insertions += 1;
        debug!(size = self.tree.size(), "inserted new entry");
    }

    fn maintenance_due(&self) -> bool
    {
        self.cleaning_required || self.clock.saturating_sub(self.last_maintenance) >= self.options.check_entire_tree_interval as u64
    }

    ///
    /// Runs maintenance if cleaning was requested or the check interval has
    /// elapsed. Meant to be called by the host once per outer time step.
    ///
    pub fn update(&mut self) -> bool
    {
        if self.maintenance_due()
        {
            self.clean_and_balance()
        }
        else
        {
            false
        }
    }

    ///
    /// Removes entries marked for removal or older than `max_lifetime`, then
    /// rebalances the tree if it is deeper than
    /// `max_depth_factor * log2(size)`. Returns true if the table changed.
    ///
    pub fn clean_and_balance(&mut self) -> bool
    {
        let clock = self.clock;
        let max_lifetime = self.options.max_lifetime as u64;
        let stale: Vec<EntryId> = self.tree.entries()
            .filter(|(_, e)| e.to_remove() || clock.saturating_sub(e.creation_time()) > max_lifetime)
            .map(|(id, _)| id)
            .collect();
        for &id in &stale
        {
            self.tree.delete_leaf(id);
        }
        self.statistics.removals += stale.len();
        let tree = &self.tree;
        self.mru.retain(|&id| tree.entry(id).is_some());
        if self.last_search.is_some_and(|id| self.tree.entry(id).is_none())
        {
            self.last_search = None;
        }

        let mut changed = !stale.is_empty();
        let size = self.tree.size();
        if size > self.options.min_balance_threshold && self.tree.depth() as f64 > self.options.max_depth_factor * (size as f64).log2()
        {
            let ctx = context(&self.options, &self.scale_factors);
            self.tree.balance(&ctx);
            self.statistics.balances += 1;
            changed = true;
        }
        self.cleaning_required = false;
        self.last_maintenance = clock;
        debug!(removed = stale.len(), size, changed, "cleaned tabulation");
        changed
    }

    ///
    /// Writes a snapshot of the whole table (entries, tree, MRU list, clock
    /// and counters).
    ///
    pub fn write(&self, path: &str, format: SerializationFormat) -> Result<(), TabulationError>
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        let buffer = crate::serialization::serialize(self, format)?;
        file.write_all(&buffer)?;
        file.flush()?;
        Ok(())
    }

    ///
    /// Decodes a snapshot and checks that its tree is intact, so that a
    /// damaged snapshot is rejected here rather than on the query path.
    ///
    pub fn read_buffer(buffer: &[u8], format: SerializationFormat) -> Result<Self, TabulationError>
    {
        let isat: Self = crate::serialization::deserialize(buffer, format)?;
        isat.options.validate(isat.num_dims)?;
        if isat.scale_factors.len() != isat.num_dims || !isat.tree.is_consistent(isat.num_dims)
        {
            warn!(num_dims = isat.num_dims, size = isat.tree.size(), "snapshot tree is inconsistent");
            return Err(TabulationError::DeserializationFailed);
        }
        Ok(isat)
    }

    ///
    /// Reads a snapshot written by [`Isat::write`].
    ///
    pub fn read<Reader: std::io::Read>(mut reader: Reader, format: SerializationFormat) -> Result<Self, TabulationError>
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::read_buffer(&bytes, format)
    }
}

impl Tabulation for Isat
{
    fn active(&self) -> bool
    {
        true
    }

    fn retrieve(&mut self, query: &[f64], result: &mut [f64]) -> bool
    {
        Isat::retrieve(self, query, result)
    }

    fn add(&mut self, query: &[f64], output: &[f64], sensitivity: &Array2<f64>, active: Option<&ActiveSet>) -> AddOutcome
    {
        Isat::add(self, query, output, sensitivity, active)
    }

    fn update(&mut self) -> bool
    {
        Isat::update(self)
    }

    fn size(&self) -> usize
    {
        Isat::size(self)
    }

    fn statistics(&self) -> Statistics
    {
        Isat::statistics(self)
    }
}

#[cfg(test)]
fn scenario_table() -> Isat
{
    // two species, temperature and pressure held fixed
    let options = TabulationOptions { grow_points: false, ..TabulationOptions::new(0.1) };
    let mut isat = Isat::new(4, options).unwrap();
    let mut result = [0.0; 4];
    for x in [[1.0, 0.0, 1.0, 1.0], [0.0, 1.0, 1.0, 1.0]]
    {
        assert!(!isat.retrieve(&x, &mut result));
        assert_eq!(isat.add(&x, &x, &identity(4), None), AddOutcome::Inserted);
    }
    isat
}

#[test]
fn test_scenario_hits_and_misses()
{
    let mut isat = scenario_table();
    assert_eq!(isat.size(), 2);
    let first = isat.tree().find_closest(&[1.0, 0.0, 1.0, 1.0]);
    let second = isat.tree().find_closest(&[0.0, 1.0, 1.0, 1.0]);
    assert_ne!(first, second);

    let mut result = [0.0; 4];
    assert!(isat.retrieve(&[0.99, 0.01, 1.0, 1.0], &mut result));
    // identity sensitivity: the approximation is the query itself
    assert!((result[0] - 0.99).abs() < 1e-14);
    assert!((result[1] - 0.01).abs() < 1e-14);
    assert_eq!(isat.mru().len(), 0);

    let far = [5.0, 5.0, 1.0, 1.0];
    assert!(!isat.retrieve(&far, &mut result));
    assert!(isat.last_search().is_some());
    assert_eq!(isat.add(&far, &far, &identity(4), None), AddOutcome::Inserted);
    assert_eq!(isat.size(), 3);
    assert_eq!(isat.tree().leaves().len(), 3);

    // the first two entries still answer their own inputs
    assert!(isat.retrieve(&[1.0, 0.0, 1.0, 1.0], &mut result));
    assert_eq!(isat.tree().find_closest(&[1.0, 0.0, 1.0, 1.0]), first);
    assert!(isat.retrieve(&[0.0, 1.0, 1.0, 1.0], &mut result));
    assert_eq!(isat.tree().find_closest(&[0.0, 1.0, 1.0, 1.0]), second);
    assert!(isat.retrieve(&far, &mut result));

    let statistics = isat.statistics();
    assert_eq!(statistics.insertions, 3);
    assert_eq!(statistics.hits, 4);
    assert_eq!(statistics.size, 3);
}

#[test]
fn test_retrieve_is_idempotent()
{
    use ndarray::array;
    let mut isat = Isat::new(3, TabulationOptions::new(1e-3)).unwrap();
    let x = [0.3, 1200.0, 1.0e5];
    let output = [0.25, 1250.0, 1.0e5];
    let a = array![[0.8, 1e-4, 0.0], [50.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    isat.add(&x, &output, &a, None);
    let mut first = [0.0; 3];
    let mut second = [0.0; 3];
    assert!(isat.retrieve(&x, &mut first));
    assert!(isat.retrieve(&x, &mut second));
    assert_eq!(first, output);
    assert_eq!(first, second);
}

#[test]
fn test_grow_instead_of_insert()
{
    let mut isat = Isat::new(3, TabulationOptions::new(0.01)).unwrap();
    let mut result = [0.0; 3];
    let x = [1.0, 1.0, 1.0];
    isat.retrieve(&x, &mut result);
    isat.add(&x, &x, &identity(3), None);

    // outside the region but the linear model is exact, so the entry grows
    let q = [1.05, 1.0, 1.0];
    assert!(!isat.retrieve(&q, &mut result));
    assert_eq!(isat.add(&q, &q, &identity(3), None), AddOutcome::Grown);
    assert_eq!(isat.size(), 1);
    assert!(isat.retrieve(&q, &mut result));
    assert!(isat.retrieve(&x, &mut result));

    // a result the linear model cannot reproduce is inserted
    let r = [0.9, 1.0, 1.0];
    assert!(!isat.retrieve(&r, &mut result));
    assert_eq!(isat.add(&r, &[0.5, 1.0, 1.0], &identity(3), None), AddOutcome::Inserted);
    assert_eq!(isat.size(), 2);
    assert_eq!(isat.statistics().growths, 1);
}

#[test]
fn test_grow_ignores_temperature_and_pressure_outputs()
{
    let mut isat = Isat::new(3, TabulationOptions::new(0.01)).unwrap();
    let mut result = [0.0; 3];
    let x = [1.0, 1.0, 1.0];
    isat.add(&x, &x, &identity(3), None);

    // species reproduced exactly, temperature output far off
    let q = [1.05, 1.0, 1.0];
    assert!(!isat.retrieve(&q, &mut result));
    assert_eq!(isat.add(&q, &[1.05, 1.5, 1.0], &identity(3), None), AddOutcome::Grown);
    assert_eq!(isat.size(), 1);

    // a species mismatch still forces a new entry
    let r = [0.9, 1.0, 1.0];
    assert!(!isat.retrieve(&r, &mut result));
    assert_eq!(isat.add(&r, &[0.5, 1.0, 1.0], &identity(3), None), AddOutcome::Inserted);
}

#[test]
fn test_non_converged_svd_entry()
{
    let mut isat = Isat::new(3, TabulationOptions::new(0.01)).unwrap();
    let mut sensitivity = identity(3);
    sensitivity[[0, 1]] = f64::NAN;
    let x = [1.0, 1.0, 1.0];
    let mut result = [0.0; 3];
    assert!(!isat.retrieve(&x, &mut result));
    assert_eq!(isat.add(&x, &x, &sensitivity, None), AddOutcome::Inserted);
    assert_eq!(isat.size(), 1);
    let converged = isat.tree().entries().next().map(|(_, e)| e.flags().svd_converged());
    assert_eq!(converged, Some(false));

    // the broken entry never answers, and queries keep returning
    for q in [x, [1.001, 1.0, 1.0], [5.0, 5.0, 5.0]]
    {
        assert!(!isat.retrieve(&q, &mut result));
    }
    // its linear model is unusable, so it is never grown
    let y = [1.05, 1.0, 1.0];
    assert_eq!(isat.add(&y, &y, &identity(3), None), AddOutcome::Inserted);
    assert_eq!(isat.size(), 2);
    assert_eq!(isat.statistics().growths, 0);
}

#[test]
fn test_mru_retrieve()
{
    let options = TabulationOptions { grow_points: false, mru_retrieve: true, max_mru_size: 4, ..TabulationOptions::new(0.1) };
    let mut isat = Isat::new(2, options).unwrap();
    let a = [0.0, 0.0];
    let b = [0.3, 0.0];
    // singular values at the floor give `a` a region twice as wide as `b`
    isat.add(&a, &a, &(identity::<f64>(2) * 0.5), None);
    isat.add(&b, &b, &identity(2), None);
    assert_eq!(isat.mru().len(), 2);

    // past the cut, so the tree candidate is `b`, but only `a` covers it
    let q = [0.18, 0.0];
    assert_eq!(isat.tree().find_closest(&q), isat.tree().find_closest(&b));
    let mut result = [0.0; 2];
    assert!(isat.retrieve(&q, &mut result));
    assert_eq!(isat.statistics().mru_hits, 1);
    assert!((result[0] - 0.09).abs() < 1e-14);
    assert_eq!(isat.mru().iter().next(), isat.tree().find_closest(&a));
}

#[test]
fn test_max_lifetime_and_maintenance()
{
    let options = TabulationOptions { max_lifetime: 3, check_entire_tree_interval: 1, ..TabulationOptions::new(0.1) };
    let mut isat = Isat::new(2, options).unwrap();
    let mut result = [0.0; 2];
    isat.retrieve(&[0.0, 0.0], &mut result);
    isat.add(&[0.0, 0.0], &[0.0, 0.0], &identity(2), None);
    for _ in 0..3
    {
        isat.retrieve(&[10.0, 10.0], &mut result);
    }
    assert_eq!(isat.size(), 1);
    isat.retrieve(&[10.0, 10.0], &mut result);
    // clock is 5, the entry was created at 1
    assert!(isat.update());
    assert_eq!(isat.size(), 0);
    assert_eq!(isat.statistics().removals, 1);
    assert!(isat.mru().is_empty());
}

#[test]
fn test_max_growth_marks_for_removal()
{
    let options = TabulationOptions { max_growth: 0, ..TabulationOptions::new(0.01) };
    let mut isat = Isat::new(2, options).unwrap();
    let mut result = [0.0; 2];
    isat.add(&[1.0, 1.0], &[1.0, 1.0], &identity(2), None);
    isat.retrieve(&[1.03, 1.0], &mut result);
    assert_eq!(isat.add(&[1.03, 1.0], &[1.03, 1.0], &identity(2), None), AddOutcome::Grown);
    // second growth request exceeds the limit: the entry is marked and a new one inserted
    isat.retrieve(&[1.1, 1.0], &mut result);
    assert_eq!(isat.add(&[1.1, 1.0], &[1.1, 1.0], &identity(2), None), AddOutcome::Inserted);
    // maintenance ran inside add and removed the marked entry
    assert!(!isat.cleaning_required());
    assert_eq!(isat.size(), 1);
    assert!(isat.tree().entries().all(|(_, e)| e.input() == [1.1, 1.0]));
}

#[test]
fn test_rebalance_keeps_entries_reachable()
{
    let options = TabulationOptions { grow_points: false, check_entire_tree_interval: 1000, ..TabulationOptions::new(0.01) };
    let mut isat = Isat::new(3, options).unwrap();
    let mut result = [0.0; 3];
    for i in 0..200
    {
        let x = [i as f64 * 0.1, 1.0, 1.0];
        isat.retrieve(&x, &mut result);
        isat.add(&x, &x, &identity(3), None);
    }
    assert_eq!(isat.depth(), 199);
    assert!(isat.clean_and_balance());
    assert!(isat.depth() <= 8);
    assert_eq!(isat.statistics().balances, 1);
    for i in 0..200
    {
        let x = [i as f64 * 0.1, 1.0, 1.0];
        assert!(isat.retrieve(&x, &mut result));
        assert!((result[0] - x[0]).abs() < 1e-12);
    }
}

#[test]
fn test_reduced_entries()
{
    let options = TabulationOptions { max_num_new_dim: 1, ..TabulationOptions::new(0.1) };
    let mut isat = Isat::new(5, options).unwrap();
    let active = ActiveSet::from_flags(&[true, false, true]);
    let x = [0.5, 0.2, 0.3, 1.0, 1.0];
    isat.add(&x, &x, &identity(4), Some(&active));
    let mut result = [0.0; 5];
    assert!(isat.retrieve(&[0.5, 0.25, 0.3, 1.0, 1.0], &mut result));
    // the inactive species is carried through unchanged
    assert!((result[1] - 0.25).abs() < 1e-15);

    // growing along the inactive species activates it in the entry
    let q = [0.5, 0.4, 0.3, 1.0, 1.0];
    assert!(!isat.retrieve(&q, &mut result));
    assert_eq!(isat.add(&q, &q, &identity(4), Some(&active)), AddOutcome::Grown);
    let entry = isat.tree().entries().next().map(|(_, e)| e.reduced_dim());
    assert_eq!(entry, Some(5));

    // a sensitivity of the wrong shape still yields an entry
    let r = [0.1, 0.1, 0.1, 2.0, 1.0];
    assert!(!isat.retrieve(&r, &mut result));
    assert_eq!(isat.add(&r, &[0.0; 5], &identity(5), Some(&active)), AddOutcome::Inserted);
    assert_eq!(isat.size(), 2);
}

#[test]
fn test_snapshot_roundtrip()
{
    let mut isat = scenario_table();
    let mut result = [0.0; 4];
    isat.retrieve(&[5.0, 5.0, 1.0, 1.0], &mut result);
    isat.add(&[5.0, 5.0, 1.0, 1.0], &[5.0, 5.0, 1.0, 1.0], &identity(4), None);
    for format in [SerializationFormat::Json, SerializationFormat::JsonLz4, SerializationFormat::Bincode, SerializationFormat::BincodeLz4]
    {
        let bytes = crate::serialization::serialize(&isat, format).unwrap();
        let mut restored = Isat::read(bytes.as_slice(), format).unwrap();
        assert_eq!(restored.size(), 3);
        assert_eq!(restored.clock(), isat.clock());
        assert!(restored.retrieve(&[0.99, 0.01, 1.0, 1.0], &mut result));
        assert!((result[0] - 0.99).abs() < 1e-14);
    }
}

#[test]
fn test_write_and_read_file()
{
    let mut isat = scenario_table();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.isat");
    let path = path.to_str().unwrap();
    isat.write(path, SerializationFormat::BincodeLz4).unwrap();

    let file = std::fs::File::open(path).unwrap();
    let mut restored = Isat::read(std::io::BufReader::new(file), SerializationFormat::BincodeLz4).unwrap();
    assert_eq!(restored.size(), 2);
    assert_eq!(restored.clock(), isat.clock());
    let mut result = [0.0; 4];
    assert!(restored.retrieve(&[0.0, 1.0, 1.0, 1.0], &mut result));

    assert!(isat.write(dir.path().join("missing").join("table.isat").to_str().unwrap(), SerializationFormat::Json).is_err());

    isat.clear();
    assert_eq!(isat.size(), 0);
    assert_eq!(isat.clock(), 0);
    assert!(!isat.update());
}

#[test]
fn test_damaged_snapshot_is_rejected()
{
    let isat = scenario_table();
    let mut json = serde_json::to_value(&isat).unwrap();
    // drop every internal node, leaving the root pointing nowhere
    json["tree"]["nodes"] = serde_json::to_value(crate::storage::Arena::<crate::storage::NodeId, crate::tree::BinaryNode>::new()).unwrap();
    let bytes = serde_json::to_vec(&json).unwrap();
    assert_eq!(Isat::read_buffer(&bytes, SerializationFormat::Json).err(), Some(TabulationError::DeserializationFailed));

    let mut json = serde_json::to_value(&isat).unwrap();
    json["num_dims"] = serde_json::json!(5);
    let bytes = serde_json::to_vec(&json).unwrap();
    assert!(Isat::read_buffer(&bytes, SerializationFormat::Json).is_err());
}

#[test]
fn test_invalid_construction()
{
    assert!(Isat::new(3, TabulationOptions::new(0.0)).is_err());
    assert!(Isat::new(1, TabulationOptions::new(0.1)).is_err());
    let mut isat = Isat::new(3, TabulationOptions::new(0.1)).unwrap();
    let mut result = [0.0; 2];
    assert!(!isat.retrieve(&[1.0, 1.0], &mut result));
    assert_eq!(isat.add(&[1.0, 1.0], &[1.0, 1.0], &identity(2), None), AddOutcome::Skipped);
}
