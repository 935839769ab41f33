//! Per-observation lineage lookup: embedded taxonomy first, tree second.
use rayon::prelude::*;

use crate::error::Result;
use crate::lineage::Lineage;
use crate::table::AbundanceTable;
use crate::taxon::labels_in;
use crate::tree::TreeIndex;

#[derive(Debug, Clone, Copy, Default)]
pub struct LineageResolver<'a> {
    tree: Option<&'a TreeIndex>,
    fill_unclassified: bool,
}

impl<'a> LineageResolver<'a> {
    pub fn new(tree: Option<&'a TreeIndex>) -> Self {
        Self { tree, fill_unclassified: false }
    }

    /// Fill unset ranks with bare-prefix labels (`g__`), unresolved
    /// observations included.
    pub fn with_unclassified_filled(mut self, yes: bool) -> Self {
        self.fill_unclassified = yes;
        self
    }

    /// Lineage given to observations neither source knows.
    pub fn unresolved(&self) -> Lineage {
        self.finish(Lineage::empty())
    }

    fn finish(&self, lineage: Lineage) -> Lineage {
        if self.fill_unclassified { lineage.fill_unclassified() } else { lineage }
    }

    /// Lineage of `observation_id`.
    ///
    /// Taxonomy embedded in `table` wins. Without it the observation is looked
    /// up as a leaf of the tree and every label on the path to the root is
    /// applied, the closest ancestor winning per rank. `None` when neither
    /// source knows the observation.
    pub fn resolve(&self, observation_id: &str, table: &AbundanceTable) -> Result<Option<Lineage>> {
        if let Some(entries) = table.taxonomy(observation_id) {
            return Lineage::from_metadata(entries).map(|l| Some(self.finish(l)));
        }
        let Some(index) = self.tree else {
            return Ok(None);
        };
        let Some(leaf) = index.find_leaf(observation_id) else {
            return Ok(None);
        };

        let tree = index.tree();
        let mut lineage = Lineage::empty();
        for node in index.ancestors(leaf) {
            let Some(name) = tree.name(node) else { continue };
            for label in labels_in(name)? {
                lineage.fill(label);
            }
        }
        Ok(Some(self.finish(lineage)))
    }

    /// Resolves `ids` in parallel; results are in input order.
    pub fn resolve_many<S>(&self, ids: &[S], table: &AbundanceTable) -> Result<Vec<Option<Lineage>>>
    where
        S: AsRef<str> + Sync,
    {
        ids.par_iter().map(|id| self.resolve(id.as_ref(), table)).collect()
    }
}

/// Raw nucleotide reads used as ids (ASVs) rather than OTU identifiers.
pub fn is_sequencing_variant(observation_id: &str) -> bool {
    !observation_id.is_empty()
        && observation_id
            .bytes()
            .all(|b| matches!(b, b'A' | b'T' | b'G' | b'C' | b'N'))
}
