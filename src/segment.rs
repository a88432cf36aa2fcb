//! Segment extraction: one segment per leaf, carrying the leaf's inherited
//! ranges, its volume, and the number of observations routed into it.

use rand::Rng;
use serde::Serialize;

use crate::param::{Dataset, ParamType};
use crate::random::sample_weighted;
use crate::tree::{Partition, Range, Tree};

/// A leaf cell of the current tree: observation count, volume, and the
/// per-parameter ranges the leaf inherits from its ancestors.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub count: usize,
    pub volume: f64,
    pub ranges: Vec<Range>,
}

/// Extracts the segments of `tree` in leaf order and routes every
/// observation of `ds` to its leaf.
///
/// A segment's volume is the product over parameters of the range widths,
/// a degenerate (zero-width) range contributing a factor of 1. An
/// observation descends from the root: at a metric node it takes the first
/// child whose cut bounds it from above (the last child otherwise); at a
/// nominal node it follows the category mapping. A missing (NaN) metric
/// value descends to a child drawn with probability proportional to the
/// children's widths in the split parameter, which is why extraction needs
/// the run's RNG.
pub fn segments<R: Rng + ?Sized>(tree: &Tree, ds: &Dataset, rng: &mut R) -> Vec<Segment> {
    let nparams = tree.param_def().len();
    let mut segments = Vec::with_capacity(tree.count_segments());

    // Leaf -> segment binding for the routing pass below.
    let mut segment_of = vec![usize::MAX; tree.len()];
    for id in tree.iter() {
        if !tree.is_segment(id) {
            continue;
        }
        let ranges: Vec<Range> = (0..nparams).map(|k| tree.node_range(id, k)).collect();
        let volume = ranges
            .iter()
            .map(Range::width)
            .map(|w| if w > 0. { w } else { 1. })
            .product();
        segment_of[id] = segments.len();
        segments.push(Segment {
            count: 0,
            volume,
            ranges,
        });
    }

    for n in 0..ds.nrows() {
        let mut id = tree.root();
        loop {
            let node = tree.node(id);
            if node.is_leaf() {
                segments[segment_of[id]].count += 1;
                break;
            }
            let k = node.param();
            let i = match node.partition() {
                Partition::Cuts(cuts) => {
                    debug_assert_eq!(tree.param_def()[k].ptype, ParamType::Metric);
                    let x = ds.col(k).value_f64(n);
                    if x.is_nan() {
                        let widths: Vec<f64> = node
                            .children()
                            .iter()
                            .map(|&child| tree.node_range(child, k).width())
                            .collect();
                        sample_weighted(rng, &widths)
                    } else {
                        cuts.iter()
                            .position(|&cut| x <= cut)
                            .unwrap_or(node.children().len() - 1)
                    }
                }
                Partition::Categories(categories) => categories[ds.col(k).value_i64(n) as usize],
            };
            id = node.children()[i];
        }
    }

    segments
}
