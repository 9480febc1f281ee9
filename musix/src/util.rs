pub(crate) mod interval_tree;
