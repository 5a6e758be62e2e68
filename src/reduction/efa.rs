use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::errors::TabulationError;
use crate::options::{ReductionOptions, NUM_STATE_VARIABLES};
use crate::reduction::mechanism::ReactionNetwork;
use crate::reduction::{reachable_from, MechanismReduction};
use crate::storage::active_set::ActiveSet;

/// Element flux from one species to another.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementFlux
{
    pub from: usize,
    pub to: usize,
    pub flux: f64,
}

///
/// Element flux analysis.
///
/// For every element, reaction `i` with net rate `w_i` moves atoms from its
/// consuming side to its producing side; the share going from `A` to `B` is
/// `|w_i| nu_A n_A nu_B n_B / N_i` with `n` the atom counts and `N_i` the
/// atoms of the element on the producing side. Per element the largest
/// fluxes are kept until they add up to `sort_part` of the total; the active
/// species are those reachable from the search-seed species along kept fluxes.
///
pub struct Efa
{
    network: Arc<dyn ReactionNetwork>,
    options: ReductionOptions,
    rates: Vec<f64>,
    active: ActiveSet,
}

impl Efa
{
    pub fn new(network: Arc<dyn ReactionNetwork>, options: ReductionOptions) -> Result<Self, TabulationError>
    {
        let num_species = network.num_species();
        options.validate(num_species)?;
        if options.search_init_set.is_empty()
        {
            return Err(TabulationError::InvalidOption("search_init_set must name at least one species".to_string()));
        }
        if network.num_elements() == 0
        {
            return Err(TabulationError::InvalidOption("element flux analysis needs the element composition of the species".to_string()));
        }
        if let Some(bad) = network.reactions().iter().flat_map(|r| r.reactants.iter().chain(&r.products)).map(|&(s, _)| s).find(|&s| s >= num_species)
        {
            return Err(TabulationError::DimensionMismatch { expected: num_species, got: bad });
        }
        Ok(Self {
            rates: vec![0.0; network.reactions().len()],
            active: ActiveSet::full(num_species),
            network,
            options,
        })
    }

    pub fn options(&self) -> &ReductionOptions
    {
        &self.options
    }

    ///
    /// Fluxes of `element` at the last reduced state, largest first.
    ///
    pub fn element_fluxes(&self, element: usize) -> Vec<ElementFlux>
    {
        let network = &*self.network;
        let mut fluxes: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        for (reaction, &rate) in network.reactions().iter().zip(&self.rates)
        {
            if rate == 0.0
            {
                continue;
            }
            let (source, sink) = if rate > 0.0 { (&reaction.reactants, &reaction.products) } else { (&reaction.products, &reaction.reactants) };
            let atoms = |&(s, nu): &(usize, f64)| nu * network.element_count(s, element);
            let total: f64 = sink.iter().map(atoms).sum();
            if total <= 0.0
            {
                continue;
            }
            for a in source.iter().filter(|x| atoms(*x) > 0.0)
            {
                for b in sink.iter().filter(|x| atoms(*x) > 0.0 && x.0 != a.0)
                {
                    *fluxes.entry((a.0, b.0)).or_default() += rate.abs() * atoms(a) * atoms(b) / total;
                }
            }
        }
        let mut fluxes: Vec<ElementFlux> = fluxes.into_iter().map(|((from, to), flux)| ElementFlux { from, to, flux }).collect();
        fluxes.sort_by(|x, y| y.flux.total_cmp(&x.flux).then((x.from, x.to).cmp(&(y.from, y.to))));
        fluxes
    }

    /// Largest fluxes of every element until `sort_part` of its total is covered.
    fn adjacency(&self) -> Vec<Vec<usize>>
    {
        let mut adjacency = vec![Vec::new(); self.network.num_species()];
        for element in 0..self.network.num_elements()
        {
            let fluxes = self.element_fluxes(element);
            let total: f64 = fluxes.iter().map(|f| f.flux).sum();
            let mut cumulative = 0.0;
            let mut kept = 0;
            for f in &fluxes
            {
                if cumulative >= self.options.sort_part * total
                {
                    break;
                }
                cumulative += f.flux;
                kept += 1;
                if !adjacency[f.from].contains(&f.to)
                {
                    adjacency[f.from].push(f.to);
                }
            }
            trace!(element, kept, total = fluxes.len(), "element fluxes kept");
        }
        adjacency
    }
}

impl MechanismReduction for Efa
{
    fn reduce(&mut self, input: &[f64]) -> &ActiveSet
    {
        let num_species = self.network.num_species();
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
        debug!(active = self.active.len(), num_species, "EFA reduction");
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
fn methane_network() -> Arc<dyn ReactionNetwork>
{
    use crate::reduction::mechanism::{MassActionNetwork, Reaction};
    // CH4, O2, CO2, H2O, N2, NO over the elements C, H, O, N
    let composition = vec![
        vec![1.0, 4.0, 0.0, 0.0],
        vec![0.0, 0.0, 2.0, 0.0],
        vec![1.0, 0.0, 2.0, 0.0],
        vec![0.0, 2.0, 1.0, 0.0],
        vec![0.0, 0.0, 0.0, 2.0],
        vec![0.0, 0.0, 1.0, 1.0],
    ];
    let mut network = MassActionNetwork::new(6).with_composition(composition);
    network.add_reaction(Reaction::new(vec![(0, 1.0), (1, 2.0)], vec![(2, 1.0), (3, 2.0)]), 1.0, 0.0);
    network.add_reaction(Reaction::new(vec![(4, 1.0), (1, 1.0)], vec![(5, 2.0)]), 1e-6, 0.0);
    Arc::new(network)
}

#[test]
fn test_element_fluxes()
{
    let options = ReductionOptions { search_init_set: vec![0, 1], sort_part: 0.99, ..Default::default() };
    let mut efa = Efa::new(methane_network(), options).unwrap();
    efa.reduce(&[1.0; 8]);
    let hydrogen = efa.element_fluxes(1);
    assert_eq!(hydrogen.len(), 1);
    assert_eq!((hydrogen[0].from, hydrogen[0].to), (0, 3));
    assert!((hydrogen[0].flux - 4.0).abs() < 1e-14);

    let oxygen = efa.element_fluxes(2);
    assert_eq!(oxygen.len(), 3);
    assert!((oxygen[0].flux - 2.0).abs() < 1e-14);
    assert!((oxygen[1].flux - 2.0).abs() < 1e-14);
    assert_eq!((oxygen[2].from, oxygen[2].to), (1, 5));
    assert!((oxygen[2].flux - 2e-6).abs() < 1e-18);
}

#[test]
fn test_efa_reduction()
{
    let options = ReductionOptions { search_init_set: vec![0, 1], sort_part: 0.99, ..Default::default() };
    let mut efa = Efa::new(methane_network(), options).unwrap();
    let active = efa.reduce(&[1.0; 8]);
    assert_eq!(active.to_flags(), vec![true, true, true, true, false, false]);

    // keeping the whole flux brings in the slow O2 -> NO path
    let options = ReductionOptions { search_init_set: vec![0, 1], sort_part: 1.0, ..Default::default() };
    let mut efa = Efa::new(methane_network(), options).unwrap();
    let active = efa.reduce(&[1.0; 8]);
    assert_eq!(active.to_flags(), vec![true, true, true, true, false, true]);
}

#[test]
fn test_efa_needs_elements()
{
    use crate::reduction::mechanism::MassActionNetwork;
    let options = ReductionOptions { search_init_set: vec![0], ..Default::default() };
    assert!(Efa::new(Arc::new(MassActionNetwork::new(3)), options).is_err());
}
