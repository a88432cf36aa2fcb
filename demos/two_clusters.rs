//! Two four-point clusters in opposite corners of a square, the smallest
//! dataset on which the sampler has something to find. Set `TREECLUST_SEED`
//! to make the run reproducible.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use treeclust::{cluster, segments, Column, Dataset, Options, ParamDef, ParamType};

fn main() -> treeclust::Result<()> {
    env_logger::init();

    let x0 = [1., 2., 1., 2., 4., 5., 4., 5.];
    let x1 = [1., 1., 2., 2., 4., 4., 5., 5.];
    let ds = Dataset::new(vec![Column::Float64(&x0), Column::Float64(&x1)])?;
    let pd = vec![
        ParamDef::from_column(ParamType::Metric, 1., &Column::Float64(&x0)),
        ParamDef::from_column(ParamType::Metric, 1., &Column::Float64(&x1)),
    ];

    let mut cb_rng = ChaCha8Rng::seed_from_u64(0);
    let stats = cluster(
        &ds,
        &pd,
        |tree, l| {
            println!("l = {:.6}", l);
            println!("{}", tree);
            let segments = segments(tree, &ds, &mut cb_rng);
            for (s, segment) in segments.iter().enumerate() {
                println!(
                    "{}: count = {}, V = {:.6}, (({:.6}, {:.6}), ({:.6}, {:.6}))",
                    s,
                    segment.count,
                    segment.volume,
                    segment.ranges[0].min,
                    segment.ranges[0].max,
                    segment.ranges[1].min,
                    segment.ranges[1].max,
                );
            }
            println!("{}", serde_json::to_string(&segments).expect("segments serialise"));
            println!();
            true
        },
        &Options::default(),
    )?;
    println!(
        "accept ratio = {:.2}%",
        100. * stats.nsamples as f64 / stats.niter as f64
    );
    Ok(())
}
