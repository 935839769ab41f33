//! Nonzero cells of an abundance table joined with their lineages.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bitvec::{order::Lsb0, vec::BitVec};
use log::{debug, info};

use crate::error::Result;
use crate::lineage::Lineage;
use crate::long_table::LongTable;
use crate::resolver::{LineageResolver, is_sequencing_variant};
use crate::table::AbundanceTable;
use crate::taxon::Rank;

pub const SAMPLE_COLUMN: &str = "sample_id";
pub const OBSERVATION_COLUMN: &str = "observation_id";
pub const VARIANT_COLUMN: &str = "is_sequencing_variant";

/// One nonzero observation × sample count. Cells of the same observation
/// share one lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountCell {
    pub observation_id: String,
    pub sample_id: String,
    pub count: u64,
    pub lineage: Arc<Lineage>,
    pub is_sequencing_variant: bool,
}

/// Cells grouped by sample id. Each distinct observation is resolved once.
pub fn extract(
    table: &AbundanceTable,
    resolver: &LineageResolver<'_>,
) -> Result<BTreeMap<String, Vec<CountCell>>> {
    let t0 = Instant::now();
    let observation_ids = table.observation_ids();
    let sample_ids = table.sample_ids();

    let mut present: BitVec<u64, Lsb0> = BitVec::repeat(false, observation_ids.len());
    for (row, _, _) in table.nonzero() {
        present.set(row, true);
    }
    let rows: Vec<usize> = present.iter_ones().collect();
    let ids: Vec<&str> = rows.iter().map(|&r| observation_ids[r].as_str()).collect();
    let resolved = resolver.resolve_many(&ids, table)?;

    let unresolved = Arc::new(resolver.unresolved());
    let mut lineages = vec![Arc::clone(&unresolved); observation_ids.len()];
    let mut missing = 0usize;
    for (row, lineage) in rows.iter().zip(resolved) {
        match lineage {
            Some(l) => lineages[*row] = Arc::new(l),
            None => {
                debug!("no lineage for observation {:?}", observation_ids[*row]);
                missing += 1;
            }
        }
    }
    let variants: Vec<bool> = observation_ids.iter().map(|id| is_sequencing_variant(id)).collect();

    let mut by_sample: BTreeMap<String, Vec<CountCell>> = BTreeMap::new();
    let mut ncells = 0usize;
    for (row, col, count) in table.nonzero() {
        by_sample
            .entry(sample_ids[col].clone())
            .or_default()
            .push(CountCell {
                observation_id: observation_ids[row].clone(),
                sample_id: sample_ids[col].clone(),
                count,
                lineage: Arc::clone(&lineages[row]),
                is_sequencing_variant: variants[row],
            });
        ncells += 1;
    }

    info!(
        "extracted {ncells} cells over {} samples ({} observations, {missing} without lineage) in {} ms",
        by_sample.len(),
        rows.len(),
        t0.elapsed().as_millis()
    );
    Ok(by_sample)
}

/// Flattens extracted cells into the long format:
/// `extra keys…, sample_id, kingdom…species, observation_id,
/// is_sequencing_variant, count`.
///
/// `extra_keys` become constant columns, so every column left of `kingdom`
/// (the default grouping) identifies a sample within the caller's context.
pub fn to_long_table(
    cells: &BTreeMap<String, Vec<CountCell>>,
    extra_keys: &[(String, String)],
) -> Result<LongTable> {
    let columns = extra_keys
        .iter()
        .map(|(name, _)| name.as_str())
        .chain([SAMPLE_COLUMN])
        .chain(Rank::ALL.iter().map(|r| r.column()))
        .chain([OBSERVATION_COLUMN, VARIANT_COLUMN]);
    let mut long = LongTable::new(columns)?;

    for cell in cells.values().flatten() {
        let mut values: Vec<Option<String>> =
            extra_keys.iter().map(|(_, v)| Some(v.clone())).collect();
        values.push(Some(cell.sample_id.clone()));
        values.extend(cell.lineage.columns());
        values.push(Some(cell.observation_id.clone()));
        values.push(Some(cell.is_sequencing_variant.to_string()));
        long.push(values, cell.count)?;
    }
    Ok(long)
}
