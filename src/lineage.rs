//! Rank-aligned lineages: one optional label per rank, kingdom first.
use crate::error::Result;
use crate::taxon::{Rank, TaxonLabel};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Lineage([Option<TaxonLabel>; 7]);

impl Lineage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, rank: Rank) -> Option<&TaxonLabel> {
        self.0[rank.index()].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rank, Option<&TaxonLabel>)> + '_ {
        Rank::ALL.into_iter().zip(self.0.iter().map(Option::as_ref))
    }

    /// Puts `label` in its rank slot unless the slot is already set.
    /// Returns `false` when an earlier label kept the slot.
    pub fn fill(&mut self, label: TaxonLabel) -> bool {
        let slot = &mut self.0[label.rank().index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(label);
        true
    }

    /// Parses per-observation taxonomy metadata.
    ///
    /// `entries` is rank ordered, either one label per element or a single
    /// `;`-joined string. Rank-prefixed entries land in their own rank's slot;
    /// bare names land at their list position. Empty entries stay unset.
    pub fn from_metadata<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let parts: Vec<&str> = match entries {
            [single] if single.as_ref().contains(';') => single.as_ref().split(';').collect(),
            _ => entries.iter().map(AsRef::as_ref).collect(),
        };

        let mut lineage = Lineage::empty();
        for (pos, entry) in parts.into_iter().map(str::trim).enumerate() {
            if entry.is_empty() {
                continue;
            }
            match TaxonLabel::parse(entry)? {
                Some(label) => {
                    lineage.fill(label);
                }
                None => {
                    if let Some(&rank) = Rank::ALL.get(pos) {
                        lineage.fill(TaxonLabel::new(rank, entry));
                    }
                }
            }
        }
        Ok(lineage)
    }

    /// Fills every unset rank with its bare-prefix label (`g__`).
    pub fn fill_unclassified(mut self) -> Self {
        for rank in Rank::ALL {
            self.fill(TaxonLabel::unclassified(rank));
        }
        self
    }

    /// Column values in rank order, labels rendered as written.
    pub fn columns(&self) -> [Option<String>; 7] {
        std::array::from_fn(|i| self.0[i].as_ref().map(ToString::to_string))
    }
}
