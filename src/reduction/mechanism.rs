use serde::{Deserialize, Serialize};

///
/// One reaction: stoichiometric coefficients of its reactants and products.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reaction
{
    pub reactants: Vec<(usize, f64)>,
    pub products: Vec<(usize, f64)>,
}

impl Reaction
{
    pub fn new(reactants: Vec<(usize, f64)>, products: Vec<(usize, f64)>) -> Self
    {
        Self { reactants, products }
    }

    /// Net production coefficient `nu_product - nu_reactant` of `species`.
    pub fn net_coefficient(&self, species: usize) -> f64
    {
        let produced: f64 = self.products.iter().filter(|(s, _)| *s == species).map(|(_, nu)| nu).sum();
        let consumed: f64 = self.reactants.iter().filter(|(s, _)| *s == species).map(|(_, nu)| nu).sum();
        produced - consumed
    }

    /// Every species taking part, reactants first, without duplicates.
    pub fn species(&self) -> Vec<usize>
    {
        let mut species: Vec<usize> = Vec::with_capacity(self.reactants.len() + self.products.len());
        for &(s, _) in self.reactants.iter().chain(&self.products)
        {
            if !species.contains(&s)
            {
                species.push(s);
            }
        }
        species
    }
}

///
/// Chemistry the reduction strategies need from the host: the reactions,
/// the element composition of each species and the net rates of progress at
/// a given state.
///
pub trait ReactionNetwork: Send + Sync
{
    fn num_species(&self) -> usize;

    fn reactions(&self) -> &[Reaction];

    /// Number of tracked elements. Element flux analysis needs at least one.
    fn num_elements(&self) -> usize
    {
        0
    }

    /// Atoms of `element` in one molecule of `species`.
    fn element_count(&self, _species: usize, _element: usize) -> f64
    {
        0.0
    }

    ///
    /// Net rate of progress (forward minus reverse) of every reaction for the
    /// concentrations `c` at temperature `t` and pressure `p`.
    ///
    fn rates_of_progress(&self, c: &[f64], t: f64, p: f64, rates: &mut [f64]);
}

///
/// Reversible mass-action network with temperature-independent rate
/// constants. Useful on its own for model problems and as a reference
/// implementation of [`ReactionNetwork`].
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MassActionNetwork
{
    num_species: usize,
    reactions: Vec<Reaction>,
    forward: Vec<f64>,
    reverse: Vec<f64>,
    /// `composition[species][element]`
    composition: Vec<Vec<f64>>,
}

impl MassActionNetwork
{
    pub fn new(num_species: usize) -> Self
    {
        Self { num_species, ..Default::default() }
    }

    pub fn with_composition(mut self, composition: Vec<Vec<f64>>) -> Self
    {
        debug_assert_eq!(composition.len(), self.num_species);
        self.composition = composition;
        self
    }

    pub fn add_reaction(&mut self, reaction: Reaction, forward: f64, reverse: f64)
    {
        self.reactions.push(reaction);
        self.forward.push(forward);
        self.reverse.push(reverse);
    }
}

impl ReactionNetwork for MassActionNetwork
{
    fn num_species(&self) -> usize
    {
        self.num_species
    }

    fn reactions(&self) -> &[Reaction]
    {
        &self.reactions
    }

    fn num_elements(&self) -> usize
    {
        self.composition.first().map_or(0, |c| c.len())
    }

    fn element_count(&self, species: usize, element: usize) -> f64
    {
        self.composition.get(species).and_then(|c| c.get(element)).copied().unwrap_or(0.0)
    }

    fn rates_of_progress(&self, c: &[f64], _t: f64, _p: f64, rates: &mut [f64])
    {
        let concentration = |side: &[(usize, f64)]| side.iter().map(|&(s, nu)| c[s].max(0.0).powf(nu)).product::<f64>();
        for (i, reaction) in self.reactions.iter().enumerate()
        {
            rates[i] = self.forward[i] * concentration(reaction.reactants.as_slice()) - self.reverse[i] * concentration(reaction.products.as_slice());
        }
    }
}

#[test]
fn test_reaction_coefficients()
{
    // 2 H2 + O2 -> 2 H2O
    let reaction = Reaction::new(vec![(0, 2.0), (1, 1.0)], vec![(2, 2.0)]);
    assert_eq!(reaction.net_coefficient(0), -2.0);
    assert_eq!(reaction.net_coefficient(2), 2.0);
    assert_eq!(reaction.net_coefficient(3), 0.0);
    assert_eq!(reaction.species(), vec![0, 1, 2]);
}

#[test]
fn test_mass_action_rates()
{
    let mut network = MassActionNetwork::new(3);
    network.add_reaction(Reaction::new(vec![(0, 2.0), (1, 1.0)], vec![(2, 2.0)]), 3.0, 0.5);
    let mut rates = [0.0];
    network.rates_of_progress(&[2.0, 0.5, 1.0], 1000.0, 1e5, &mut rates);
    assert!((rates[0] - (3.0 * 4.0 * 0.5 - 0.5 * 1.0)).abs() < 1e-14);
}
