use itertools::Itertools;

use super::CandidatePool;

/// Evenly spaced values covering `[0, 1]`. One step collapses to the centre.
fn axis(points_per_dim: usize) -> Vec<f64> {
    let steps = points_per_dim.saturating_sub(1);
    if steps == 0 {
        return vec![0.5];
    }
    let step_size = 1. / steps as f64;
    (0..=steps).map(|i| i as f64 * step_size).collect()
}

/// Cartesian grid over the normalized unit cube.
pub fn grid_locations(dims: usize, points_per_dim: usize) -> Vec<Vec<f64>> {
    if dims == 0 {
        return Vec::new();
    }
    (0..dims)
        .map(|_| axis(points_per_dim))
        .multi_cartesian_product()
        .collect()
}

/// The grid offered at both fidelities; candidate pool sizes from the config do not apply.
pub fn grid_pool(dims: usize, points_per_dim: usize) -> CandidatePool {
    CandidatePool::at_both_fidelities(grid_locations(dims, points_per_dim))
}
