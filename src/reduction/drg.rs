use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::errors::TabulationError;
use crate::options::{ReductionOptions, NUM_STATE_VARIABLES};
use crate::reduction::mechanism::ReactionNetwork;
use crate::reduction::{reachable_from, MechanismReduction};
use crate::storage::active_set::ActiveSet;

///
/// Directed relation graph.
///
/// The direct interaction coefficient of species `B` on species `A` is
///
/// `r_AB = sum_i |nu_Ai w_i delta_Bi| / sum_i |nu_Ai w_i|`
///
/// where `w_i` is the net rate of progress of reaction `i`, `nu_Ai` the net
/// stoichiometric coefficient of `A` and `delta_Bi` is one if `B` takes part
/// in reaction `i`. There is an edge `A -> B` when `r_AB >= tolerance`; the
/// active species are those reachable from the search-seed species.
///
pub struct Drg
{
    network: Arc<dyn ReactionNetwork>,
    options: ReductionOptions,
    /// For each species, the reactions it takes part in with its net coefficient.
    species_reactions: Vec<Vec<(usize, f64)>>,
    /// For each reaction, the species taking part.
    reaction_species: Vec<Vec<usize>>,
    rates: Vec<f64>,
    active: ActiveSet,
}

impl Drg
{
    pub fn new(network: Arc<dyn ReactionNetwork>, options: ReductionOptions) -> Result<Self, TabulationError>
    {
        let num_species = network.num_species();
        options.validate(num_species)?;
        if options.search_init_set.is_empty()
        {
            return Err(TabulationError::InvalidOption("search_init_set must name at least one species".to_string()));
        }
        let mut species_reactions = vec![Vec::new(); num_species];
        let mut reaction_species = Vec::with_capacity(network.reactions().len());
        for (i, reaction) in network.reactions().iter().enumerate()
        {
            let species = reaction.species();
            for &s in &species
            {
                if s >= num_species
                {
                    return Err(TabulationError::DimensionMismatch { expected: num_species, got: s });
                }
                species_reactions[s].push((i, reaction.net_coefficient(s)));
            }
            reaction_species.push(species);
        }
        Ok(Self {
            rates: vec![0.0; network.reactions().len()],
            active: ActiveSet::full(num_species),
            network,
            options,
            species_reactions,
            reaction_species,
        })
    }

    pub fn options(&self) -> &ReductionOptions
    {
        &self.options
    }

    /// Net rates of progress at the last reduced state.
    pub fn rates(&self) -> &[f64]
    {
        &self.rates
    }

    /// `r_AB` at the last reduced state.
    pub fn interaction_coefficient(&self, a: usize, b: usize) -> f64
    {
        let (numerator, denominator) = self.species_reactions[a].iter().fold((0.0, 0.0), |(num, den), &(i, nu)|
        {
            let w = (nu * self.rates[i]).abs();
            let delta = if self.reaction_species[i].contains(&b) { 1.0 } else { 0.0 };
            (num + w * delta, den + w)
        });
        if denominator > 0.0 { numerator / denominator } else { 0.0 }
    }

    /// Species `B` with `r_AB >= tolerance`, sorted.
    fn edges_from(&self, a: usize) -> Vec<usize>
    {
        let mut numerator: FxHashMap<usize, f64> = FxHashMap::default();
        let mut denominator = 0.0;
        for &(i, nu) in &self.species_reactions[a]
        {
            let w = (nu * self.rates[i]).abs();
            if w == 0.0
            {
                continue;
            }
            denominator += w;
            for &b in self.reaction_species[i].iter().filter(|&&b| b != a)
            {
                *numerator.entry(b).or_default() += w;
            }
        }
        if denominator == 0.0
        {
            return Vec::new();
        }
        let mut edges: Vec<usize> = numerator.into_iter().filter(|&(_, n)| n / denominator >= self.options.tolerance).map(|(b, _)| b).collect();
        edges.sort_unstable();
        edges
    }

    #[cfg(feature="rayon")]
    fn adjacency(&self) -> Vec<Vec<usize>>
    {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
        (0..self.species_reactions.len()).into_par_iter().map(|a| self.edges_from(a)).collect()
    }

    #[cfg(not(feature="rayon"))]
    fn adjacency(&self) -> Vec<Vec<usize>>
    {
        (0..self.species_reactions.len()).map(|a| self.edges_from(a)).collect()
    }
}

impl MechanismReduction for Drg
{
    fn reduce(&mut self, input: &[f64]) -> &ActiveSet
    {
        let num_species = self.species_reactions.len();
        if input.len() != num_species + NUM_STATE_VARIABLES
        {
            warn!(expected = num_species + NUM_STATE_VARIABLES, got = input.len(), "reduce called with a state of the wrong dimension, keeping every species");
            self.active = ActiveSet::full(num_species);
            return &self.active;
        }
        let (c, state) = input.split_at(num_species);
        self.network.rates_of_progress(c, state[0], state[1], &mut self.rates);
        let adjacency = self.adjacency();
        self.active = reachable_from(&self.options.search_init_set, &adjacency);
        debug!(active = self.active.len(), num_species, "DRG reduction");
        &self.active
    }

    fn active_set(&self) -> &ActiveSet
    {
        &self.active
    }

    fn active_set_mut(&mut self) -> &mut ActiveSet
    {
        &mut self.active
    }
}

#[cfg(test)]
fn chain_network() -> Arc<dyn ReactionNetwork>
{
    use crate::reduction::mechanism::{MassActionNetwork, Reaction};
    // F -> I -> P, a slow side reaction X -> F, and an inert species N
    let mut network = MassActionNetwork::new(5);
    network.add_reaction(Reaction::new(vec![(0, 1.0)], vec![(1, 1.0)]), 1.0, 0.0);
    network.add_reaction(Reaction::new(vec![(1, 1.0)], vec![(2, 1.0)]), 1.0, 0.0);
    network.add_reaction(Reaction::new(vec![(3, 1.0)], vec![(0, 1.0)]), 1e-6, 0.0);
    Arc::new(network)
}

#[test]
fn test_drg_reduction()
{
    let options = ReductionOptions { tolerance: 1e-4, search_init_set: vec![0], ..Default::default() };
    let mut drg = Drg::new(chain_network(), options).unwrap();
    let state = [1.0, 1.0, 1.0, 1.0, 1.0, 1000.0, 1e5];
    let active = drg.reduce(&state);
    assert_eq!(active.to_flags(), vec![true, true, true, false, false]);

    assert!((drg.interaction_coefficient(0, 1) - 1.0 / (1.0 + 1e-6)).abs() < 1e-12);
    assert!((drg.interaction_coefficient(0, 3) - 1e-6 / (1.0 + 1e-6)).abs() < 1e-12);
    assert_eq!(drg.interaction_coefficient(4, 0), 0.0);
}

#[test]
fn test_drg_lower_tolerance_keeps_weak_coupling()
{
    let options = ReductionOptions { tolerance: 1e-7, search_init_set: vec![0], ..Default::default() };
    let mut drg = Drg::new(chain_network(), options).unwrap();
    let active = drg.reduce(&[1.0, 1.0, 1.0, 1.0, 1.0, 1000.0, 1e5]);
    assert_eq!(active.to_flags(), vec![true, true, true, true, false]);
}

#[test]
fn test_drg_seeds_always_active()
{
    let options = ReductionOptions { tolerance: 1e-4, search_init_set: vec![4], ..Default::default() };
    let mut drg = Drg::new(chain_network(), options).unwrap();
    // nothing reacts: only the seed survives
    let active = drg.reduce(&[0.0, 0.0, 0.0, 0.0, 1.0, 1000.0, 1e5]);
    assert_eq!(active.to_flags(), vec![false, false, false, false, true]);
    // malformed state keeps everything
    assert_eq!(drg.reduce(&[1.0, 2.0]).len(), 5);
}

#[test]
fn test_drg_invalid_options()
{
    assert!(Drg::new(chain_network(), ReductionOptions::default()).is_err());
    let options = ReductionOptions { search_init_set: vec![7], ..Default::default() };
    assert!(Drg::new(chain_network(), options).is_err());
}
