pub mod errors;
pub mod linalg;
pub mod options;
pub mod reduction;
pub mod serialization;
pub mod storage;
pub mod tabulation;
pub mod tree;

pub use errors::TabulationError;
pub use options::{ReductionOptions, TabulationOptions};
pub use reduction::{MechanismReduction, ReductionMethod};
pub use storage::active_set::ActiveSet;
pub use tabulation::{AddOutcome, Isat, Tabulation, TabulationMethod};

#[test]
fn test_reduced_tabulation_loop()
{
    use std::sync::Arc;
    use reduction::{Drg, MassActionNetwork, Reaction, SingleWorker};
    use tabulation::sensitivity::implicit_euler_sensitivity;

    // A -> B -> C with a slow D -> A; species D stays inactive
    let mut network = MassActionNetwork::new(4);
    network.add_reaction(Reaction::new(vec![(0, 1.0)], vec![(1, 1.0)]), 2.0, 0.0);
    network.add_reaction(Reaction::new(vec![(1, 1.0)], vec![(2, 1.0)]), 1.0, 0.0);
    network.add_reaction(Reaction::new(vec![(3, 1.0)], vec![(0, 1.0)]), 1e-8, 0.0);
    let options = ReductionOptions { search_init_set: vec![0], ..Default::default() };
    let mut reduction = ReductionMethod::Drg(Drg::new(Arc::new(network), options).unwrap());
    let mut table = TabulationMethod::Isat(Box::new(Isat::new(6, TabulationOptions::new(1e-3)).unwrap()));

    let dt = 1e-3;
    // exact implicit Euler step of the linear chain restricted to A, B, C
    let step = |x: &[f64]| -> Vec<f64>
    {
        let a = x[0] / (1.0 + 2.0 * dt);
        let b = (x[1] + 2.0 * dt * a) / (1.0 + dt);
        let c = x[2] + dt * b;
        vec![a, b, c, x[3], x[4], x[5]]
    };
    let jacobian = ndarray::array![
        [-2.0, 0.0, 0.0, 0.0, 0.0],
        [2.0, -1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0],
    ];

    let mut result = [0.0; 6];
    let mut hits = 0;
    for i in 0..50
    {
        let x = [1.0 + 1e-5 * i as f64, 0.5, 0.1, 0.2, 1000.0, 1e5];
        let active = reduction.reduce(&x).clone();
        assert_eq!(active.to_flags(), vec![true, true, true, false]);
        reduction.reconcile(&SingleWorker);
        if table.retrieve(&x, &mut result)
        {
            hits += 1;
            let exact = step(&x);
            for (r, e) in result.iter().zip(&exact)
            {
                assert!((r - e).abs() <= 1e-3 * e.abs().max(1.0));
            }
            continue;
        }
        let sensitivity = implicit_euler_sensitivity(&jacobian, dt).unwrap();
        table.add(&x, &step(&x), &sensitivity, reduction.tabulation_frame());
        table.update();
    }
    assert!(hits > 40);
    assert!(table.size() < 10);
}
