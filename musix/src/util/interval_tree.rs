//! Static interval tree for stabbing queries.

/// A static container of half-open intervals answering stabbing queries.
///
/// Intervals are first accumulated with [`add`](IntervalTree::add) and the
/// tree is then frozen with [`build`](IntervalTree::build). Once built, a
/// [`search`](IntervalTree::search) visits every stored interval containing a
/// given point in *O*(log(*N*) + *K*) time, where *K* is the number of
/// matches.
///
/// Under the hood, the nodes are kept in an array sorted by interval start and
/// the tree is implicit: the root of any sub-array is its middle element.
/// Each node is augmented with the largest interval end found in its subtree,
/// which allows whole subtrees to be pruned when they end before the query
/// point.
pub(crate) struct IntervalTree<K, V> {
    nodes: Vec<Node<K, V>>,
    is_built: bool,
}

struct Node<K, V> {
    begin: K,
    end: K,
    max_end: K,
    value: V,
}

impl<K: Copy + Ord, V> IntervalTree<K, V> {
    /// Creates an empty, unbuilt tree.
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            is_built: false,
        }
    }

    /// Returns the number of intervals in the tree.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Adds the half-open interval `[begin, end)` associated to a value.
    ///
    /// Adding an interval invalidates a previous build.
    pub(crate) fn add(&mut self, begin: K, end: K, value: V) {
        self.nodes.push(Node {
            begin,
            end,
            max_end: end,
            value,
        });
        self.is_built = false;
    }

    /// Sorts the intervals and computes the subtree augmentation.
    pub(crate) fn build(&mut self) {
        self.nodes.sort_by(|a, b| a.begin.cmp(&b.begin));
        let len = self.nodes.len();
        self.augment(0, len);
        self.is_built = true;
    }

    /// Calls `f` on each interval containing `point`, in ascending order of
    /// interval start.
    pub(crate) fn search<F>(&self, point: K, mut f: F)
    where
        F: FnMut(K, K, &V),
    {
        debug_assert!(self.is_built, "the interval tree was not built");

        self.search_range(0, self.nodes.len(), point, &mut f);
    }

    /// Computes the maximum end of the subtree rooted in the middle of
    /// `lo..hi` and returns it, if the range is not empty.
    fn augment(&mut self, lo: usize, hi: usize) -> Option<K> {
        if lo >= hi {
            return None;
        }
        let mid = lo + (hi - lo) / 2;

        let mut max_end = self.nodes[mid].end;
        if let Some(left) = self.augment(lo, mid) {
            max_end = max_end.max(left);
        }
        if let Some(right) = self.augment(mid + 1, hi) {
            max_end = max_end.max(right);
        }
        self.nodes[mid].max_end = max_end;

        Some(max_end)
    }

    fn search_range<F>(&self, lo: usize, hi: usize, point: K, f: &mut F)
    where
        F: FnMut(K, K, &V),
    {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let node = &self.nodes[mid];

        // No interval of this subtree extends past the point.
        if node.max_end <= point {
            return;
        }

        self.search_range(lo, mid, point, f);

        // All intervals on the right start at or after this one.
        if node.begin > point {
            return;
        }
        if point < node.end {
            f(node.begin, node.end, &node.value);
        }

        self.search_range(mid + 1, hi, point, f);
    }
}

impl<K: Copy + Ord, V> Default for IntervalTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
