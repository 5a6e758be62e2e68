use serde::{Deserialize, Serialize};

use crate::errors::TabulationError;

/// Number of trailing scalar state variables (temperature, pressure) in
/// every tabulated state.
pub const NUM_STATE_VARIABLES: usize = 2;

///
/// Options controlling the ISAT table. Defaults follow common practice for
/// combustion runs: no growth cap, no MRU list, no periodic maintenance.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabulationOptions
{
    /// Relative size of the ellipsoid of accuracy; must be strictly positive.
    pub tolerance: f64,
    /// Entries grown more often than this are marked for removal.
    pub max_growth: usize,
    /// Maximum active-set mismatch tolerated when growing an entry.
    pub max_num_new_dim: usize,
    pub max_mru_size: usize,
    /// Number of retrieve calls between two maintenance passes.
    pub check_entire_tree_interval: usize,
    /// Rebalance when `depth > max_depth_factor * log2(size)`.
    pub max_depth_factor: f64,
    /// Never rebalance trees of this size or smaller.
    pub min_balance_threshold: usize,
    /// Entry lifetime in retrieve calls since creation.
    pub max_lifetime: usize,
    pub grow_points: bool,
    pub mru_retrieve: bool,
    /// Log which dimension dominates the distance when a query falls outside.
    pub print_proportion: bool,
    /// Per-dimension scale factors (composition, then temperature and
    /// pressure). `None` means all ones.
    pub scale_factors: Option<Vec<f64>>,
}

impl Default for TabulationOptions
{
    fn default() -> Self
    {
        Self {
            tolerance: 1e-4,
            max_growth: usize::MAX,
            max_num_new_dim: 0,
            max_mru_size: 0,
            check_entire_tree_interval: usize::MAX,
            max_depth_factor: 2.0,
            min_balance_threshold: 2,
            max_lifetime: usize::MAX,
            grow_points: true,
            mru_retrieve: false,
            print_proportion: false,
            scale_factors: None,
        }
    }
}

impl TabulationOptions
{
    pub fn new(tolerance: f64) -> Self
    {
        Self { tolerance, ..Default::default() }
    }

    ///
    /// Checks the options against a state of `num_dims` dimensions and
    /// returns the resolved scale factors.
    ///
    pub fn validate(&self, num_dims: usize) -> Result<Vec<f64>, TabulationError>
    {
        if !(self.tolerance > 0.0) || !self.tolerance.is_finite()
        {
            return Err(TabulationError::InvalidTolerance(self.tolerance));
        }
        if num_dims < NUM_STATE_VARIABLES
        {
            return Err(TabulationError::TooFewDimensions(NUM_STATE_VARIABLES));
        }
        if !(self.max_depth_factor > 0.0)
        {
            return Err(TabulationError::InvalidOption(format!("max_depth_factor must be positive, got {}", self.max_depth_factor)));
        }
        if self.check_entire_tree_interval == 0
        {
            return Err(TabulationError::InvalidOption("check_entire_tree_interval must be at least 1".to_string()));
        }
        match &self.scale_factors
        {
            None => Ok(vec![1.0; num_dims]),
            Some(scale) =>
            {
                if scale.len() != num_dims
                {
                    return Err(TabulationError::DimensionMismatch { expected: num_dims, got: scale.len() });
                }
                if let Some((index, &value)) = scale.iter().enumerate().find(|&(_, &s)| !(s > 0.0) || !s.is_finite())
                {
                    return Err(TabulationError::InvalidScaleFactor { index, value });
                }
                Ok(scale.clone())
            }
        }
    }
}

///
/// Options for the mechanism reduction strategies.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionOptions
{
    /// DRG: minimum direct interaction coefficient for an edge.
    pub tolerance: f64,
    /// Dimensions that are always active and seed the graph search.
    pub search_init_set: Vec<usize>,
    /// EFA: fraction of the total element flux that must be kept.
    pub sort_part: f64,
}

impl Default for ReductionOptions
{
    fn default() -> Self
    {
        Self { tolerance: 1e-4, search_init_set: Vec::new(), sort_part: 0.05 }
    }
}

impl ReductionOptions
{
    pub fn validate(&self, num_species: usize) -> Result<(), TabulationError>
    {
        if !(self.tolerance >= 0.0) || !self.tolerance.is_finite()
        {
            return Err(TabulationError::InvalidTolerance(self.tolerance));
        }
        if !(self.sort_part > 0.0 && self.sort_part <= 1.0)
        {
            return Err(TabulationError::InvalidOption(format!("sort_part must lie in (0, 1], got {}", self.sort_part)));
        }
        if let Some(&bad) = self.search_init_set.iter().find(|&&i| i >= num_species)
        {
            return Err(TabulationError::DimensionMismatch { expected: num_species, got: bad });
        }
        Ok(())
    }
}

#[test]
fn test_default_options_validate()
{
    let options = TabulationOptions::default();
    assert_eq!(options.validate(4).unwrap(), vec![1.0; 4]);
}

#[test]
fn test_invalid_options_are_rejected()
{
    assert_eq!(TabulationOptions::new(0.0).validate(3), Err(TabulationError::InvalidTolerance(0.0)));
    assert_eq!(TabulationOptions::new(-1.0).validate(3), Err(TabulationError::InvalidTolerance(-1.0)));
    assert_eq!(TabulationOptions::new(0.1).validate(1), Err(TabulationError::TooFewDimensions(2)));

    let options = TabulationOptions { scale_factors: Some(vec![1.0, 1.0]), ..TabulationOptions::new(0.1) };
    assert_eq!(options.validate(3), Err(TabulationError::DimensionMismatch { expected: 3, got: 2 }));

    let options = TabulationOptions { scale_factors: Some(vec![1.0, 0.0, 1.0]), ..TabulationOptions::new(0.1) };
    assert_eq!(options.validate(3), Err(TabulationError::InvalidScaleFactor { index: 1, value: 0.0 }));
}

#[test]
fn test_options_from_partial_json()
{
    let options: TabulationOptions = serde_json::from_str(r#"{"tolerance": 0.001, "mru_retrieve": true, "max_mru_size": 10}"#).unwrap();
    assert_eq!(options.tolerance, 0.001);
    assert!(options.mru_retrieve);
    assert_eq!(options.max_mru_size, 10);
    assert!(options.grow_points);

    let reduction: ReductionOptions = serde_json::from_str(r#"{"search_init_set": [0, 3]}"#).unwrap();
    assert_eq!(reduction.search_init_set, vec![0, 3]);
    assert!(reduction.validate(4).is_ok());
    assert!(reduction.validate(3).is_err());
}
