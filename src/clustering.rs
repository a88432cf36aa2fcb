//! The Metropolis-Hastings driver and its proposal kernels.
//!
//! Each kernel mutates the tree in place and hands back what the driver
//! needs to undo the edit: structural rewrites return the `(new, old)`
//! replace pair, cut moves the previous cut value. A rejected proposal is
//! rolled back by replaying the replace in reverse; the arena keeps
//! detached nodes intact, so the previous subtree re-links as-is.

use log::debug;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{Error, Result};
use crate::likelihood::log_likelihood;
use crate::param::{Dataset, ParamDef, ParamType};
use crate::random::{frand1, rng_from_env, rtnorm};
use crate::tree::{NodeId, Partition, Tree};

/// Arena capacity of the driver's tree. Proposals allocate and never free,
/// so this bounds the total number of proposals in a run.
const TREE_CAPACITY: usize = 131_072;

/// Sampler options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Accepted samples before stopping.
    pub nsamples: usize,
    /// Iteration cap; 0 means unlimited.
    pub maxiter: usize,
    /// Probability of a split proposal.
    pub split_p: f64,
    /// Probability of a merge proposal.
    pub merge_p: f64,
    /// Probability of a cut-move proposal.
    pub move_p: f64,
    /// Cut-move standard deviation as a fraction of the two adjacent
    /// segment widths.
    pub move_sd_frac: f64,
    /// Skip splits once the segment count reaches this; 0 means unlimited.
    pub max_segments: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            nsamples: 10,
            maxiter: 0,
            split_p: 0.1,
            merge_p: 0.1,
            move_p: 0.8,
            move_sd_frac: 0.1,
            max_segments: 0,
        }
    }
}

impl Options {
    pub fn with_nsamples(mut self, nsamples: usize) -> Self {
        self.nsamples = nsamples;
        self
    }

    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    /// Sets the action probabilities; they must sum to 1.
    pub fn with_probabilities(mut self, move_p: f64, split_p: f64, merge_p: f64) -> Self {
        self.move_p = move_p;
        self.split_p = split_p;
        self.merge_p = merge_p;
        self
    }

    pub fn with_move_sd_frac(mut self, move_sd_frac: f64) -> Self {
        self.move_sd_frac = move_sd_frac;
        self
    }

    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }
}

/// Counts reported at the end of a run; `nsamples / niter` is the
/// acceptance ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub nsamples: usize,
    pub niter: usize,
}

enum Action {
    Move,
    Split,
    Merge,
}

/// Outcome of a proposal kernel: either nothing legal to do, or an edit
/// plus the data undoing it.
enum Proposal {
    Skip,
    Replace { new: NodeId, old: NodeId },
    MoveCut { node: NodeId, index: usize, old_cut: f64 },
}

fn check_opts(opts: &Options) -> Result<()> {
    if opts.merge_p + opts.split_p + opts.move_p != 1. {
        return Err(Error::InvalidArgument(
            "action probabilities must sum to 1".to_string(),
        ));
    }
    Ok(())
}

/// Split: divide a uniformly chosen segment along a uniformly chosen
/// parameter at a uniformly drawn cut. When the segment's parent already
/// splits on that parameter the cut is folded into the parent's cut vector;
/// otherwise a fresh binary node takes the segment's place.
fn propose_split<R: Rng + ?Sized>(tree: &mut Tree, opts: &Options, rng: &mut R) -> Result<Proposal> {
    let nsegments = tree.count_segments();
    if opts.max_segments > 0 && nsegments >= opts.max_segments {
        return Ok(Proposal::Skip);
    }
    let node = tree
        .select_segment(rng.gen_range(0..nsegments))
        .expect("segment index drawn within count");
    let k = rng.gen_range(0..tree.param_def().len());
    let pd = &tree.param_def()[k];
    if pd.ptype == ParamType::Nominal {
        debug_assert!(false, "split on a nominal parameter");
        return Err(Error::NotImplemented("split on a nominal parameter"));
    }
    let fs = pd.fragment_size;

    let range = tree.node_range(node, k);
    if range.max - range.min <= fs {
        return Ok(Proposal::Skip); // Nowhere to split.
    }
    let mut cut = (range.min + fs) + frand1(rng) * (range.max - (range.min + fs));
    if fs > 0. {
        cut -= cut % fs;
    }

    let parent = tree.node(node).parent();
    let (new, old) = match parent {
        Some(parent) if tree.node(parent).param() == k => {
            let i = tree
                .find_child(parent, node)
                .expect("a node is listed among its parent's children");
            let mut cuts = tree.node(parent).cuts().to_vec();
            cuts.insert(i, cut);
            let old_children = tree.node(parent).children().to_vec();
            let new = tree.new_node(k, old_children.len() + 1, Partition::Cuts(cuts))?;
            tree.replace(parent, new)?;
            // Migrate the original children around the inserted position;
            // the fresh leaf left at `i` is one half of the divided segment.
            for (j, &child) in old_children.iter().enumerate() {
                let slot = if j < i { j } else { j + 1 };
                let placeholder = tree.node(new).children()[slot];
                tree.replace(placeholder, child)?;
            }
            (new, parent)
        }
        _ => {
            let new = tree.new_node(k, 2, Partition::Cuts(vec![cut]))?;
            tree.replace(node, new)?;
            (new, node)
        }
    };
    debug_assert!(tree.check());
    Ok(Proposal::Replace { new, old })
}

/// Merge: remove a uniformly chosen movable cut of a uniformly chosen
/// supersegment, fusing the two adjacent leaves. Merging the last cut of a
/// binary node collapses it to a leaf.
fn propose_merge<R: Rng + ?Sized>(tree: &mut Tree, rng: &mut R) -> Result<Proposal> {
    let nsupersegments = tree.count_supersegments();
    if nsupersegments == 0 {
        return Ok(Proposal::Skip);
    }
    let node = tree
        .select_supersegment(rng.gen_range(0..nsupersegments))
        .expect("supersegment index drawn within count");
    if let Partition::Categories(_) = tree.node(node).partition() {
        debug_assert!(false, "merge at a nominal node");
        return Err(Error::NotImplemented("merge at a nominal node"));
    }
    let nmovable = tree.count_movable_cuts(node);
    let i = tree
        .select_movable_cut(node, rng.gen_range(0..nmovable))
        .expect("movable cut index drawn within count");

    let mut cuts = tree.node(node).cuts().to_vec();
    cuts.remove(i);
    let old_children = tree.node(node).children().to_vec();
    let new = if old_children.len() > 2 {
        let param = tree.node(node).param();
        tree.new_node(param, old_children.len() - 1, Partition::Cuts(cuts))?
    } else {
        tree.new_leaf()?
    };
    tree.replace(node, new)?;
    let nchildren = tree.node(new).children().len();
    for j in 0..nchildren {
        // Skip the removed position; its left-hand leaf covers the fused
        // interval.
        let child = old_children[if j < i { j } else { j + 1 }];
        let placeholder = tree.node(new).children()[j];
        tree.replace(placeholder, child)?;
    }
    debug_assert!(tree.check());
    Ok(Proposal::Replace { new, old: node })
}

/// Cut-move: displace a uniformly chosen movable cut by a truncated-normal
/// step bounded by the widths of the two adjacent segments.
fn propose_move<R: Rng + ?Sized>(tree: &mut Tree, opts: &Options, rng: &mut R) -> Result<Proposal> {
    let nsupersegments = tree.count_supersegments();
    if nsupersegments == 0 {
        return Ok(Proposal::Skip);
    }
    let node = tree
        .select_supersegment(rng.gen_range(0..nsupersegments))
        .expect("supersegment index drawn within count");
    if let Partition::Categories(_) = tree.node(node).partition() {
        debug_assert!(false, "cut move at a nominal node");
        return Err(Error::NotImplemented("cut move at a nominal node"));
    }
    let nmovable = tree.count_movable_cuts(node);
    let i = tree
        .select_movable_cut(node, rng.gen_range(0..nmovable))
        .expect("movable cut index drawn within count");

    let param = tree.node(node).param();
    let fs = tree.param_def()[param].fragment_size;
    let cut = tree.node(node).cuts()[i];
    let (lower, upper) = {
        let children = tree.node(node).children();
        (children[i], children[i + 1])
    };
    let w1 = tree.node_range(lower, param).width();
    let w2 = tree.node_range(upper, param).width();
    if w1 <= fs && w2 <= fs {
        return Ok(Proposal::Skip); // Nowhere to move.
    }

    let mut delta = rtnorm(rng, 0., (w1 + w2) * opts.move_sd_frac, -w1, w2);
    if fs > 0. {
        delta -= delta % fs;
    }
    if delta == 0. {
        return Ok(Proposal::Skip);
    }
    tree.set_cut(node, i, cut + delta);
    debug_assert!(tree.check());
    Ok(Proposal::MoveCut {
        node,
        index: i,
        old_cut: cut,
    })
}

/// Runs the sampler with an RNG seeded from the `TREECLUST_SEED`
/// environment variable (or from entropy when unset). See
/// [`cluster_with_rng`].
pub fn cluster<F>(ds: &Dataset, param_def: &[ParamDef], cb: F, opts: &Options) -> Result<RunStats>
where
    F: FnMut(&Tree, f64) -> bool,
{
    let mut rng = rng_from_env();
    cluster_with_rng(ds, param_def, cb, opts, &mut rng)
}

/// Samples partition trees of `ds` by a Metropolis-Hastings random walk.
///
/// Each iteration draws an action from `(move_p, split_p, merge_p)`, lets
/// the kernel rewrite the tree, and accepts with probability
/// `min(1, exp(lx - l))` on the full recomputed log-likelihood. Accepted
/// samples are handed to `cb` together with their log-likelihood; `cb`
/// returning `false` ends the run successfully. A kernel finding no legal
/// move consumes an iteration but no sample.
///
/// The callback's tree reference is only valid during the call; derived
/// data can be taken with [`crate::segments`].
pub fn cluster_with_rng<F, R>(
    ds: &Dataset,
    param_def: &[ParamDef],
    mut cb: F,
    opts: &Options,
    rng: &mut R,
) -> Result<RunStats>
where
    F: FnMut(&Tree, f64) -> bool,
    R: Rng + ?Sized,
{
    check_opts(opts)?;
    if param_def.is_empty() {
        return Err(Error::InvalidArgument(
            "at least one parameter is required".to_string(),
        ));
    }
    if ds.ncols() != param_def.len() {
        return Err(Error::InvalidArgument(
            "dataset column count does not match the parameter definitions".to_string(),
        ));
    }
    for (k, pd) in param_def.iter().enumerate() {
        if !pd.is_quantised() {
            return Err(Error::InvalidArgument(format!(
                "parameter {}: min/max are not multiples of the fragment size",
                k
            )));
        }
        if !pd.matches(ds.col(k)) {
            return Err(Error::InvalidArgument(format!(
                "parameter {}: column kind does not match the definition",
                k
            )));
        }
    }
    let actions = WeightedIndex::new([opts.move_p, opts.split_p, opts.merge_p])
        .map_err(|_| Error::InvalidArgument("invalid action probabilities".to_string()))?;

    let mut tree = Tree::new(TREE_CAPACITY, param_def)?;
    let mut l = log_likelihood(&tree, ds, rng);

    let mut niter = 0;
    let mut nsamples = 0;
    while nsamples < opts.nsamples && (opts.maxiter == 0 || niter < opts.maxiter) {
        debug_assert!(tree.check());
        niter += 1;

        let action = match actions.sample(rng) {
            0 => Action::Move,
            1 => Action::Split,
            2 => Action::Merge,
            _ => unreachable!(),
        };
        let proposal = match action {
            Action::Move => propose_move(&mut tree, opts, rng)?,
            Action::Split => propose_split(&mut tree, opts, rng)?,
            Action::Merge => propose_merge(&mut tree, rng)?,
        };
        if let Proposal::Skip = proposal {
            continue;
        }

        let lx = log_likelihood(&tree, ds, rng);
        let p = f64::min(1., (lx - l).exp());
        if rng.gen::<f64>() < p {
            l = lx;
            nsamples += 1;
            if !cb(&tree, l) {
                break;
            }
        } else {
            match proposal {
                Proposal::Replace { new, old } => {
                    tree.replace(new, old)?;
                    tree.restore_child_parents(old);
                }
                Proposal::MoveCut {
                    node,
                    index,
                    old_cut,
                } => tree.set_cut(node, index, old_cut),
                Proposal::Skip => unreachable!(),
            }
            debug_assert!(tree.check());
        }
    }

    if niter > 0 {
        debug!("accept ratio = {:.2}%", 100. * nsamples as f64 / niter as f64);
    }
    Ok(RunStats { nsamples, niter })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::param::{Column, Value, ValueKind};

    fn metric_params(domains: &[(f64, f64)]) -> Vec<ParamDef> {
        domains
            .iter()
            .map(|&(min, max)| {
                let mut pd = ParamDef::new(ParamType::Metric, ValueKind::Float64);
                pd.min = Value::Float64(min);
                pd.max = Value::Float64(max);
                pd
            })
            .collect()
    }

    #[test]
    fn test_rejects_probabilities_not_summing_to_one() {
        let pd = metric_params(&[(0., 1.)]);
        let xs = [0.5];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let opts = Options::default().with_probabilities(0.5, 0.2, 0.2);
        let result = cluster(&ds, &pd, |_, _| true, &opts);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_mismatched_columns() {
        let pd = metric_params(&[(0., 1.), (0., 1.)]);
        let xs = [0.5];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let result = cluster(&ds, &pd, |_, _| true, &Options::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_unquantised_domain() {
        let mut pd = metric_params(&[(0.5, 10.)]);
        pd[0].fragment_size = 1.;
        let xs = [1.];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let result = cluster(&ds, &pd, |_, _| true, &Options::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_trivial_run_yields_no_samples() {
        // A single leaf offers no supersegment, so a move-only run can only
        // skip until the iteration cap fires.
        let pd = metric_params(&[(0., 1.)]);
        let xs: [f64; 0] = [];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let opts = Options::default()
            .with_nsamples(1)
            .with_maxiter(50)
            .with_probabilities(1., 0., 0.);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let stats = cluster_with_rng(&ds, &pd, |_, _| true, &opts, &mut rng).unwrap();
        assert_eq!(stats.nsamples, 0);
        assert_eq!(stats.niter, 50);
    }

    #[test]
    fn test_callback_stop_after_first_sample() {
        let pd = metric_params(&[(0., 10.)]);
        let xs = [1., 2., 8., 9.];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let opts = Options::default()
            .with_nsamples(100)
            .with_maxiter(10_000)
            .with_probabilities(0., 1., 0.);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut emitted = 0;
        let stats = cluster_with_rng(
            &ds,
            &pd,
            |_, _| {
                emitted += 1;
                false
            },
            &opts,
            &mut rng,
        )
        .unwrap();
        assert_eq!(emitted, 1);
        assert_eq!(stats.nsamples, 1);
    }

    #[test]
    fn test_split_divides_a_leaf() {
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let opts = Options::default();
        match propose_split(&mut tree, &opts, &mut rng).unwrap() {
            Proposal::Replace { new, old } => {
                assert_eq!(tree.count_segments(), 2);
                assert_eq!(tree.root(), new);
                // Rolling back restores the single leaf.
                tree.replace(new, old).unwrap();
                tree.restore_child_parents(old);
                assert!(tree.check());
                assert_eq!(tree.count_segments(), 1);
            }
            _ => panic!("split on a splittable leaf must propose"),
        }
    }

    #[test]
    fn test_split_widens_parent_on_same_parameter() {
        // Both segments of a binary root split again on the same parameter,
        // so the proposal must widen the root by one cut, keeping the
        // existing one.
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let root = tree.root();
        let node = tree.new_node(0, 2, Partition::Cuts(vec![5.])).unwrap();
        tree.replace(root, node).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let opts = Options::default();
        match propose_split(&mut tree, &opts, &mut rng).unwrap() {
            Proposal::Replace { new, old } => {
                assert_eq!(old, node);
                assert_eq!(tree.root(), new);
                assert_eq!(tree.node(new).children().len(), 3);
                assert_eq!(tree.count_segments(), 3);
                let cuts = tree.node(new).cuts();
                assert_eq!(cuts.len(), 2);
                assert!(cuts.windows(2).all(|p| p[0] <= p[1]));
                assert!(cuts.contains(&5.));
            }
            _ => panic!("split on a splittable leaf must propose"),
        }
    }

    #[test]
    fn test_split_respects_max_segments() {
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let root = tree.root();
        let node = tree.new_node(0, 2, Partition::Cuts(vec![5.])).unwrap();
        tree.replace(root, node).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let opts = Options::default().with_max_segments(2);
        assert!(matches!(
            propose_split(&mut tree, &opts, &mut rng).unwrap(),
            Proposal::Skip
        ));
    }

    #[test]
    fn test_merge_fuses_adjacent_leaves() {
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let root = tree.root();
        let node = tree.new_node(0, 3, Partition::Cuts(vec![3., 7.])).unwrap();
        tree.replace(root, node).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        match propose_merge(&mut tree, &mut rng).unwrap() {
            Proposal::Replace { new, old } => {
                assert_eq!(old, node);
                assert_eq!(tree.node(new).children().len(), 2);
                assert_eq!(tree.count_segments(), 2);
                let cuts = tree.node(new).cuts();
                assert!(cuts == [3.] || cuts == [7.]);
            }
            _ => panic!("merge with movable cuts must propose"),
        }
    }

    #[test]
    fn test_merge_collapses_binary_node_to_leaf() {
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let root = tree.root();
        let node = tree.new_node(0, 2, Partition::Cuts(vec![5.])).unwrap();
        tree.replace(root, node).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        match propose_merge(&mut tree, &mut rng).unwrap() {
            Proposal::Replace { new, old } => {
                assert_eq!(old, node);
                assert!(tree.node(new).is_leaf());
                assert_eq!(tree.count_segments(), 1);
            }
            _ => panic!("merge with movable cuts must propose"),
        }
    }

    #[test]
    fn test_merge_skips_without_supersegments() {
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(matches!(
            propose_merge(&mut tree, &mut rng).unwrap(),
            Proposal::Skip
        ));
    }

    #[test]
    fn test_move_keeps_cut_between_neighbours() {
        let pd = metric_params(&[(0., 10.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let root = tree.root();
        let node = tree.new_node(0, 2, Partition::Cuts(vec![4.])).unwrap();
        tree.replace(root, node).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let opts = Options::default();
        for _ in 0..100 {
            match propose_move(&mut tree, &opts, &mut rng).unwrap() {
                Proposal::MoveCut {
                    node,
                    index,
                    old_cut,
                } => {
                    let cut = tree.node(node).cuts()[index];
                    assert!(cut > 0. && cut < 10.);
                    assert_ne!(cut, old_cut);
                    tree.set_cut(node, index, old_cut);
                }
                Proposal::Skip => {}
                _ => panic!("cut move must not rewrite the structure"),
            }
        }
    }

    #[test]
    fn test_move_chain_stays_near_symmetric_cut() {
        // Symmetric data around a cut at 2.5: the chain's mean cut position
        // must stay within +-0.5.
        let pd = metric_params(&[(0., 5.)]);
        let mut tree = Tree::new(64, &pd).unwrap();
        let root = tree.root();
        let node = tree.new_node(0, 2, Partition::Cuts(vec![2.5])).unwrap();
        tree.replace(root, node).unwrap();

        let xs = [0.5, 1., 1.5, 2., 3., 3.5, 4., 4.5];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let opts = Options::default()
            .with_probabilities(1., 0., 0.)
            .with_move_sd_frac(0.01);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let mut l = log_likelihood(&tree, &ds, &mut rng);
        let mut sum = 0.;
        let mut count = 0;
        for _ in 0..400 {
            match propose_move(&mut tree, &opts, &mut rng).unwrap() {
                Proposal::MoveCut {
                    node,
                    index,
                    old_cut,
                } => {
                    let lx = log_likelihood(&tree, &ds, &mut rng);
                    let p = f64::min(1., (lx - l).exp());
                    if rng.gen::<f64>() < p {
                        l = lx;
                    } else {
                        tree.set_cut(node, index, old_cut);
                    }
                    sum += tree.node(node).cuts()[index];
                    count += 1;
                }
                Proposal::Skip => {}
                _ => panic!("cut move must not rewrite the structure"),
            }
        }
        let mean = sum / count as f64;
        assert!((mean - 2.5).abs() < 0.5, "chain mean drifted to {}", mean);
    }

    #[test]
    fn test_sampled_trees_satisfy_invariants() {
        let pd = metric_params(&[(0., 10.)]);
        let xs = [1., 1.5, 2., 8., 8.5, 9.];
        let ds = Dataset::new(vec![Column::Float64(&xs)]).unwrap();
        let opts = Options::default()
            .with_nsamples(25)
            .with_maxiter(5_000);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut cb_rng = ChaCha8Rng::seed_from_u64(11);
        let stats = cluster_with_rng(
            &ds,
            &pd,
            |tree, l| {
                assert!(tree.check());
                assert!(l.is_finite());
                let segments = crate::segment::segments(tree, &ds, &mut cb_rng);
                assert_eq!(segments.len(), tree.count_segments());
                let total: usize = segments.iter().map(|s| s.count).sum();
                assert_eq!(total, 6);
                true
            },
            &opts,
            &mut rng,
        )
        .unwrap();
        assert!(stats.nsamples > 0);
        assert!(stats.niter >= stats.nsamples);
    }
}
