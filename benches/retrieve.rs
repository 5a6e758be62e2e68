use criterion::{criterion_group, criterion_main, Criterion};
use tdacrust::{errors::TabulationError, linalg::identity, Isat, TabulationOptions};

fn build_table() -> Result<Isat, TabulationError>
{
    // 8 species + temperature and pressure on a regular lattice
    let mut isat = Isat::new(10, TabulationOptions { grow_points: false, ..TabulationOptions::new(1e-3) })?;
    let sensitivity = identity(10);
    for i in 0..4096
    {
        let mut x = [0.0; 10];
        for (d, v) in x.iter_mut().enumerate().take(8)
        {
            *v = ((i >> (d + 4)) & 1) as f64 * 0.1 + (i % 16) as f64 * 0.01;
        }
        x[8] = 1000.0 + (i % 7) as f64;
        x[9] = 1.0;
        isat.add(&x, &x, &sensitivity, None);
    }
    isat.clean_and_balance();
    Ok(isat)
}

fn retrieve(isat: &mut Isat)
{
    let mut result = [0.0; 10];
    let x = [0.05, 0.11, 0.0, 0.1, 0.02, 0.1, 0.1, 0.0, 1003.0, 1.0];
    for _ in 0..1000
    {
        let _hit = isat.retrieve(&x, &mut result);
    }
}

fn run_retrieve(c: &mut Criterion)
{
    let mut isat = build_table().unwrap();
    c.bench_function("retrieve 10d", |b|b.iter(||retrieve(&mut isat)));
}

criterion_group!(benches, run_retrieve);
criterion_main!(benches);
