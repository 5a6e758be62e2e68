use bitfield_struct::bitfield;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::linalg::qr::{qr_decompose, qr_update};
use crate::linalg::svd::Svd;
use crate::linalg::{upper_triangular_mul, upper_triangular_transpose_mul};
use crate::options::NUM_STATE_VARIABLES;
use crate::storage::active_set::ActiveSet;
use crate::storage::NodeId;

/// Lower bound applied to the singular values of the sensitivity before the
/// ellipsoid of accuracy is built.
pub const SINGULAR_VALUE_FLOOR: f64 = 0.5;

#[bitfield(u8)]
#[derive(Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryFlags
{
    /// Delete at the next maintenance pass.
    pub to_remove: bool,
    /// Whether the SVD used to build the ellipsoid converged.
    pub svd_converged: bool,
    #[bits(6)]
    pub _empty: u8,
}

///
/// Table-wide values every entry operation needs. Owned by the engine and
/// lent to the entries so that the tolerance is never duplicated per entry.
///
#[derive(Clone, Copy, Debug)]
pub struct RegionContext<'a>
{
    pub tolerance: f64,
    pub scale_factors: &'a [f64],
    pub max_num_new_dim: usize,
    pub print_proportion: bool,
}

///
/// One tabulated point: the mapping `output = R(input)`, its sensitivity
/// `A = dR/dinput` and the factor `L` of its ellipsoid of accuracy
/// `{ q : |L (q - input)| <= 1 }`.
///
/// When mechanism reduction was active at creation, `sensitivity` and
/// `region` only span the active species followed by temperature and
/// pressure; inactive species use a diagonal closed form.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredEntry
{
    pub(crate) input: Vec<f64>,
    pub(crate) output: Vec<f64>,
    pub(crate) sensitivity: Array2<f64>,
    pub(crate) region: Array2<f64>,
    pub(crate) active: Option<ActiveSet>,
    pub(crate) growth_count: usize,
    pub(crate) creation_time: u64,
    pub(crate) last_used_time: u64,
    pub(crate) flags: EntryFlags,
    /// Parent node in the binary tree, `None` when this entry is the root.
    pub(crate) node: Option<NodeId>,
}

#[inline]
fn complete_index(active: Option<&ActiveSet>, num_species: usize, k: usize) -> usize
{
    match active
    {
        Some(active) if k < active.len() => active.complete_index(k),
        Some(active) => num_species + (k - active.len()),
        None => k,
    }
}

impl StoredEntry
{
    ///
    /// Builds the entry and its ellipsoid of accuracy.
    ///
    /// `sensitivity` must be square with the reduced dimension
    /// (`active.len() + 2`, or the full dimension when `active` is `None`).
    /// The EOA is `L = qr(S^-1 U max(W, 1/2) V^T / tolerance)` where
    /// `U W V^T` is the SVD of the sensitivity and `S` holds the scale factors.
    ///
    pub fn new(input: Vec<f64>, output: Vec<f64>, sensitivity: Array2<f64>, active: Option<ActiveSet>, ctx: &RegionContext, time: u64) -> Self
    {
        let num_species = input.len() - NUM_STATE_VARIABLES;
        let dim = sensitivity.nrows();
        debug_assert_eq!(dim, active.as_ref().map_or(input.len(), |a| a.len() + NUM_STATE_VARIABLES));

        let svd = Svd::decompose(&sensitivity);
        if !svd.converged
        {
            warn!(dim, "SVD of the sensitivity did not converge, building the ellipsoid from the best available factors");
        }
        let mut region = svd.reconstruct_with_floor(SINGULAR_VALUE_FLOOR);
        for k in 0..dim
        {
            let c = complete_index(active.as_ref(), num_species, k);
            let factor = 1.0 / (ctx.tolerance * ctx.scale_factors[c]);
            region.row_mut(k).mapv_inplace(|x| x * factor);
        }
        qr_decompose(&mut region);

        Self {
            input,
            output,
            sensitivity,
            region,
            active,
            growth_count: 0,
            creation_time: time,
            last_used_time: time,
            flags: EntryFlags::new().with_svd_converged(svd.converged),
            node: None,
        }
    }

    #[inline]
    pub fn input(&self) -> &[f64]
    {
        &self.input
    }

    #[inline]
    pub fn output(&self) -> &[f64]
    {
        &self.output
    }

    #[inline]
    pub fn sensitivity(&self) -> &Array2<f64>
    {
        &self.sensitivity
    }

    /// Upper triangular factor of the ellipsoid of accuracy.
    #[inline]
    pub fn region_factor(&self) -> &Array2<f64>
    {
        &self.region
    }

    #[inline]
    pub fn active_set(&self) -> Option<&ActiveSet>
    {
        self.active.as_ref()
    }

    #[inline]
    pub fn growth_count(&self) -> usize
    {
        self.growth_count
    }

    #[inline]
    pub fn creation_time(&self) -> u64
    {
        self.creation_time
    }

    #[inline]
    pub fn last_used_time(&self) -> u64
    {
        self.last_used_time
    }

    #[inline]
    pub fn flags(&self) -> EntryFlags
    {
        self.flags
    }

    #[inline]
    pub fn to_remove(&self) -> bool
    {
        self.flags.to_remove()
    }

    #[inline]
    pub fn set_to_remove(&mut self, value: bool)
    {
        self.flags.set_to_remove(value);
    }

    #[inline]
    pub fn num_dims(&self) -> usize
    {
        self.input.len()
    }

    #[inline]
    pub fn num_species(&self) -> usize
    {
        self.input.len() - NUM_STATE_VARIABLES
    }

    /// Dimension of the reduced matrices.
    #[inline]
    pub fn reduced_dim(&self) -> usize
    {
        self.region.nrows()
    }

    #[inline]
    fn complete_index(&self, k: usize) -> usize
    {
        complete_index(self.active.as_ref(), self.num_species(), k)
    }

    /// Whether the stored vectors and matrices fit a state of `num_dims` dimensions.
    pub(crate) fn is_consistent(&self, num_dims: usize) -> bool
    {
        if num_dims < NUM_STATE_VARIABLES || self.input.len() != num_dims || self.output.len() != num_dims
        {
            return false;
        }
        let num_species = num_dims - NUM_STATE_VARIABLES;
        let dim = match &self.active
        {
            Some(active) if active.num_species() != num_species || active.iter().any(|s| s >= num_species) => return false,
            Some(active) => active.len() + NUM_STATE_VARIABLES,
            None => num_dims,
        };
        self.sensitivity.dim() == (dim, dim) && self.region.dim() == (dim, dim)
    }

    /// Species tracked only through the diagonal closed form.
    fn inactive_species(&self) -> impl Iterator<Item = usize> + '_
    {
        let num_species = if self.active.is_some() { self.num_species() } else { 0 };
        (0..num_species).filter(move |&i| self.active.as_ref().is_some_and(|a| !a.is_active(i)))
    }

    /// `x - input` in the reduced frame.
    fn reduced_delta(&self, x: &[f64]) -> Vec<f64>
    {
        (0..self.reduced_dim()).map(|k|
        {
            let c = self.complete_index(k);
            x[c] - self.input[c]
        }).collect()
    }

    ///
    /// Returns `true` if `query` lies inside the ellipsoid of accuracy,
    /// i.e. `|L (query - input)| <= 1 + tolerance`.
    ///
    pub fn in_region(&self, query: &[f64], ctx: &RegionContext) -> bool
    {
        let dr = self.reduced_delta(query);
        let mut t = vec![0.0; dr.len()];
        upper_triangular_mul(self.region.view(), &dr, &mut t);
        let mut eps2: f64 = t.iter().map(|x| x * x).sum();
        for i in self.inactive_species()
        {
            let x = (query[i] - self.input[i]) / (ctx.tolerance * ctx.scale_factors[i]);
            eps2 += x * x;
        }
        let inside = eps2.sqrt() <= 1.0 + ctx.tolerance;
        if !inside && ctx.print_proportion
        {
            self.trace_dominant_dimension(query, &t, eps2, ctx);
        }
        inside
    }

    // Diagnostic only, never feeds back into the membership test.
    fn trace_dominant_dimension(&self, query: &[f64], t: &[f64], eps2: f64, ctx: &RegionContext)
    {
        let mut dominant = (usize::MAX, -1.0_f64);
        for (k, &x) in t.iter().enumerate()
        {
            if x * x > dominant.1
            {
                dominant = (self.complete_index(k), x * x);
            }
        }
        for i in self.inactive_species()
        {
            let x = (query[i] - self.input[i]) / (ctx.tolerance * ctx.scale_factors[i]);
            if x * x > dominant.1
            {
                dominant = (i, x * x);
            }
        }
        let num_species = self.num_species();
        let name = match dominant.0
        {
            i if i == num_species => "temperature".to_string(),
            i if i == num_species + 1 => "pressure".to_string(),
            i => format!("species {i}"),
        };
        trace!(direction = %name, proportion = dominant.1 / (eps2 + f64::MIN_POSITIVE), "dominant direction of the retrieve error");
    }

    ///
    /// Linear prediction `A (query - input)` of the change of every output
    /// component. Inactive species use the identity.
    ///
    pub fn linear_correction(&self, query: &[f64], delta: &mut [f64])
    {
        let dr = self.reduced_delta(query);
        for i in self.inactive_species()
        {
            delta[i] = query[i] - self.input[i];
        }
        for k in 0..dr.len()
        {
            let row = self.sensitivity.row(k);
            delta[self.complete_index(k)] = row.iter().zip(&dr).map(|(a, d)| a * d).sum();
        }
    }

    ///
    /// Writes the linear approximation `output + A (query - input)` to `result`.
    ///
    pub fn approximate(&self, query: &[f64], result: &mut [f64])
    {
        self.linear_correction(query, result);
        for (r, &o) in result.iter_mut().zip(&self.output)
        {
            *r += o;
        }
    }

    ///
    /// Checks whether the linear approximation at `query` reproduces
    /// `true_output` within the tolerance, using the scale-weighted 2-norm
    /// over the species. Temperature and pressure outputs are not checked.
    ///
    pub fn check_solution(&self, query: &[f64], true_output: &[f64], ctx: &RegionContext) -> bool
    {
        let num_species = self.num_species();
        let mut prediction = vec![0.0; self.output.len()];
        self.approximate(query, &mut prediction);
        let eps2: f64 = prediction[..num_species].iter().zip(true_output).zip(ctx.scale_factors).map(|((p, t), s)|
        {
            let e = (t - p) / s;
            e * e
        }).sum();
        eps2.sqrt() <= ctx.tolerance
    }

    ///
    /// Grows the ellipsoid of accuracy so that `query` lies on its boundary,
    /// keeping every previously covered point covered.
    ///
    /// With mechanism reduction, fails without touching the entry when the
    /// active sets of the entry and of the query differ in more than
    /// `max_num_new_dim` species. Species that must become active are added
    /// to the reduced matrices first.
    ///
    pub fn grow(&mut self, query: &[f64], query_active: Option<&ActiveSet>, ctx: &RegionContext) -> bool
    {
        if let Some(active) = &self.active
        {
            let mut mismatch = 0;
            let mut dims_to_add = Vec::new();
            for i in 0..self.num_species()
            {
                let entry_active = active.is_active(i);
                let q_active = query_active.map_or(true, |q| q.is_active(i));
                match (entry_active, q_active)
                {
                    (false, true) =>
                    {
                        mismatch += 1;
                        dims_to_add.push(i);
                    }
                    (true, false) => mismatch += 1,
                    (false, false) if query[i] != self.input[i] =>
                    {
                        mismatch += 1;
                        dims_to_add.push(i);
                    }
                    _ => {}
                }
            }
            if mismatch > ctx.max_num_new_dim
            {
                debug!(mismatch, max = ctx.max_num_new_dim, "growth refused: active sets differ too much");
                return false;
            }
            if !dims_to_add.is_empty()
            {
                self.activate_species(&dims_to_add, ctx);
            }
        }

        let dr = self.reduced_delta(query);
        let dim = dr.len();
        let mut phi = vec![0.0; dim];
        upper_triangular_mul(self.region.view(), &dr, &mut phi);
        let norm2: f64 = phi.iter().map(|x| x * x).sum();
        if norm2 <= 1.0
        {
            // already covered in the reduced frame
            return true;
        }
        let norm = norm2.sqrt();
        let gamma = (1.0 / norm - 1.0) / norm2;
        let u: Vec<f64> = phi.iter().map(|x| gamma * x).collect();
        let mut v = vec![0.0; dim];
        upper_triangular_transpose_mul(self.region.view(), &phi, &mut v);
        qr_update(&mut self.region, &u, &v);
        self.growth_count += 1;
        true
    }

    ///
    /// Appends `species` to the active set. The old active block and the
    /// temperature/pressure block are carried over; new rows and columns are
    /// zero apart from their diagonal, which reproduces the closed form used
    /// for inactive species so the ellipsoid is unchanged.
    ///
    fn activate_species(&mut self, species: &[usize], ctx: &RegionContext)
    {
        let Some(active) = self.active.as_mut() else { return };
        let old_active = active.len();
        let new_active = old_active + species.len();
        let new_dim = new_active + NUM_STATE_VARIABLES;
        let mut region = Array2::zeros((new_dim, new_dim));
        let mut sensitivity = Array2::zeros((new_dim, new_dim));

        for i in 0..old_active
        {
            for j in 0..old_active
            {
                region[[i, j]] = self.region[[i, j]];
                sensitivity[[i, j]] = self.sensitivity[[i, j]];
            }
            for s in 0..NUM_STATE_VARIABLES
            {
                region[[i, new_active + s]] = self.region[[i, old_active + s]];
                sensitivity[[i, new_active + s]] = self.sensitivity[[i, old_active + s]];
                region[[new_active + s, i]] = self.region[[old_active + s, i]];
                sensitivity[[new_active + s, i]] = self.sensitivity[[old_active + s, i]];
            }
        }
        for a in 0..NUM_STATE_VARIABLES
        {
            for b in 0..NUM_STATE_VARIABLES
            {
                region[[new_active + a, new_active + b]] = self.region[[old_active + a, old_active + b]];
                sensitivity[[new_active + a, new_active + b]] = self.sensitivity[[old_active + a, old_active + b]];
            }
        }
        for &c in species
        {
            let k = active.activate(c);
            region[[k, k]] = 1.0 / (ctx.tolerance * ctx.scale_factors[c]);
            sensitivity[[k, k]] = 1.0;
        }
        self.region = region;
        self.sensitivity = sensitivity;
    }

    ///
    /// `M (other - input)` in complete coordinates, where `M = L^T L` is the
    /// metric of this entry's ellipsoid (diagonal for inactive species).
    ///
    pub(crate) fn metric_product(&self, diff: &[f64], ctx: &RegionContext) -> Vec<f64>
    {
        let dim = self.reduced_dim();
        let dr: Vec<f64> = (0..dim).map(|k| diff[self.complete_index(k)]).collect();
        let mut w = vec![0.0; dim];
        upper_triangular_mul(self.region.view(), &dr, &mut w);
        let mut vr = vec![0.0; dim];
        upper_triangular_transpose_mul(self.region.view(), &w, &mut vr);

        let mut v = vec![0.0; self.num_dims()];
        for (k, &x) in vr.iter().enumerate()
        {
            v[self.complete_index(k)] = x;
        }
        for i in self.inactive_species()
        {
            let div = ctx.tolerance * ctx.scale_factors[i];
            v[i] = diff[i] / (div * div);
        }
        v
    }
}

#[cfg(test)]
pub(crate) fn test_context(tolerance: f64, scale_factors: &[f64]) -> RegionContext<'_>
{
    RegionContext { tolerance, scale_factors, max_num_new_dim: 0, print_proportion: false }
}

#[test]
fn test_identity_entry_region()
{
    let scale = [1.0; 2];
    let ctx = test_context(0.1, &scale);
    let entry = StoredEntry::new(vec![1.0, 0.0], vec![1.0, 0.0], crate::linalg::identity(2), None, &ctx, 0);
    // the region is the ball of radius tolerance around the input
    assert!(entry.in_region(&[1.0, 0.0], &ctx));
    assert!(entry.in_region(&[0.99, 0.01], &ctx));
    assert!(entry.in_region(&[1.1, 0.0], &ctx));
    assert!(!entry.in_region(&[1.2, 0.0], &ctx));
    assert!(!entry.in_region(&[5.0, 5.0], &ctx));
}

#[test]
fn test_region_containment_random_points()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    let scale = [1.0, 2.0, 0.5, 10.0];
    let ctx = test_context(0.05, &scale);
    let a = Array2::from_shape_fn((4, 4), |_| rng.gen_range(-3.0..3.0));
    let input = vec![0.2, 0.3, 0.5, 1500.0];
    let entry = StoredEntry::new(input.clone(), input.clone(), a, None, &ctx, 0);
    for _ in 0..200
    {
        let q: Vec<f64> = input.iter().map(|x| x + rng.gen_range(-0.05..0.05)).collect();
        let dr: Vec<f64> = q.iter().zip(&input).map(|(q, x)| q - x).collect();
        let mut t = vec![0.0; 4];
        upper_triangular_mul(entry.region.view(), &dr, &mut t);
        let norm = t.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm <= 1.0
        {
            assert!(entry.in_region(&q, &ctx));
        }
        if norm > 1.0 + ctx.tolerance
        {
            assert!(!entry.in_region(&q, &ctx));
        }
    }
}

#[test]
fn test_growth_is_monotone()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let scale = [1.0; 3];
    let ctx = test_context(0.1, &scale);
    let a = Array2::from_shape_fn((3, 3), |(i, j)| if i == j { 1.0 } else { rng.gen_range(-0.3..0.3) });
    let input = vec![0.0; 3];
    let mut entry = StoredEntry::new(input.clone(), input, a, None, &ctx, 0);

    let samples: Vec<Vec<f64>> = (0..500).map(|_| (0..3).map(|_| rng.gen_range(-0.5..0.5)).collect()).collect();
    let inside_before: Vec<bool> = samples.iter().map(|q| entry.in_region(q, &ctx)).collect();

    let query = [0.4, -0.1, 0.2];
    assert!(!entry.in_region(&query, &ctx));
    assert!(entry.grow(&query, None, &ctx));
    assert_eq!(entry.growth_count(), 1);
    assert!(entry.in_region(&query, &ctx));
    for (q, &before) in samples.iter().zip(&inside_before)
    {
        if before
        {
            assert!(entry.in_region(q, &ctx));
        }
    }
}

#[test]
fn test_grow_inside_point_is_noop()
{
    let scale = [1.0; 2];
    let ctx = test_context(0.1, &scale);
    let mut entry = StoredEntry::new(vec![0.0, 0.0], vec![0.0, 0.0], crate::linalg::identity(2), None, &ctx, 0);
    let before = entry.region.clone();
    assert!(entry.grow(&[0.05, 0.0], None, &ctx));
    assert_eq!(entry.region, before);
    assert_eq!(entry.growth_count(), 0);
}

#[test]
fn test_check_solution_and_linear_correction()
{
    use ndarray::array;
    let scale = [1.0; 3];
    let ctx = test_context(1e-3, &scale);
    // R(x) = B x with B = [[2,0,0],[1,1,0],[0,0,1]]
    let b = array![[2.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    let input = vec![1.0, 1.0, 1.0];
    let output = b.dot(&ndarray::arr1(&input)).to_vec();
    let entry = StoredEntry::new(input, output, b.clone(), None, &ctx, 0);

    let q = [1.2, 0.9, 1.0];
    let exact = b.dot(&ndarray::arr1(&q)).to_vec();
    let mut approx = vec![0.0; 3];
    entry.approximate(&q, &mut approx);
    for (a, e) in approx.iter().zip(&exact)
    {
        assert!((a - e).abs() < 1e-14);
    }
    assert!(entry.check_solution(&q, &exact, &ctx));
    let wrong = [exact[0] + 0.01, exact[1], exact[2]];
    assert!(!entry.check_solution(&q, &wrong, &ctx));
}

#[test]
fn test_check_solution_ignores_temperature_and_pressure()
{
    let scale = [1.0; 4];
    let ctx = test_context(1e-2, &scale);
    let entry = StoredEntry::new(vec![1.0; 4], vec![1.0; 4], crate::linalg::identity(4), None, &ctx, 0);
    let q = [1.05, 1.0, 1.0, 1.0];
    assert!(entry.check_solution(&q, &[1.05, 1.0, 1.5, 3.0], &ctx));
    assert!(!entry.check_solution(&q, &[1.05, 1.1, 1.0, 1.0], &ctx));
}

#[test]
fn test_reduced_entry_inactive_species()
{
    // three species + T + p, species 1 inactive
    let scale = [1.0; 5];
    let ctx = RegionContext { tolerance: 0.1, scale_factors: &scale, max_num_new_dim: 1, print_proportion: true };
    let active = ActiveSet::from_flags(&[true, false, true]);
    let input = vec![0.5, 0.2, 0.3, 1.0, 1.0];
    let mut entry = StoredEntry::new(input.clone(), input.clone(), crate::linalg::identity(4), Some(active.clone()), &ctx, 0);
    assert_eq!(entry.reduced_dim(), 4);

    // inactive species uses the closed form d / (tolerance * scale)
    assert!(entry.in_region(&[0.5, 0.29, 0.3, 1.0, 1.0], &ctx));
    assert!(!entry.in_region(&[0.5, 0.35, 0.3, 1.0, 1.0], &ctx));

    // inactive species passes through the linear correction unchanged
    let mut delta = vec![0.0; 5];
    entry.linear_correction(&[0.5, 0.25, 0.3, 1.0, 1.0], &mut delta);
    assert!((delta[1] - 0.05).abs() < 1e-15);

    // growing along the inactive species activates it without moving the region
    let probe = [0.5, 0.28, 0.32, 1.01, 1.0];
    let probe_inside = entry.in_region(&probe, &ctx);
    let query = [0.5, 0.4, 0.3, 1.0, 1.0];
    assert!(entry.grow(&query, Some(&active), &ctx));
    assert_eq!(entry.reduced_dim(), 5);
    assert_eq!(entry.active_set().map(|a| a.len()), Some(3));
    assert!(entry.in_region(&query, &ctx));
    if probe_inside
    {
        assert!(entry.in_region(&probe, &ctx));
    }
}

#[test]
fn test_growth_refused_when_active_sets_differ()
{
    let scale = [1.0; 5];
    let ctx = test_context(0.1, &scale);
    let active = ActiveSet::from_flags(&[true, false, false]);
    let input = vec![0.5, 0.2, 0.3, 1.0, 1.0];
    let mut entry = StoredEntry::new(input.clone(), input, crate::linalg::identity(3), Some(active), &ctx, 0);
    let region = entry.region.clone();
    let query_active = ActiveSet::from_flags(&[true, true, false]);
    assert!(!entry.grow(&[0.9, 0.2, 0.3, 1.0, 1.0], Some(&query_active), &ctx));
    assert_eq!(entry.region, region);
    assert_eq!(entry.reduced_dim(), 3);
}

#[test]
fn test_metric_product_matches_region()
{
    let scale = [1.0, 2.0];
    let ctx = test_context(0.5, &scale);
    let entry = StoredEntry::new(vec![0.0, 0.0], vec![0.0, 0.0], crate::linalg::identity(2), None, &ctx, 0);
    let v = entry.metric_product(&[1.0, 1.0], &ctx);
    // L = diag(1/(0.5*1), 1/(0.5*2)) => M = diag(4, 1)
    assert!((v[0] - 4.0).abs() < 1e-12);
    assert!((v[1] - 1.0).abs() < 1e-12);
}
