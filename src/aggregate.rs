//! Rank roll-up of long-format count tables.
//!
//! Rows are grouped by the grouping keys plus either the target rank alone
//! (`simple`) or every rank from kingdom down to it (hierarchical), and their
//! counts summed. The [`MissingPolicy`] decides what happens to rows whose
//! target rank is null or the rank's dummy label.
use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::long_table::LongTable;
use crate::taxon::{DummyValues, Rank, strip_brackets};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Missing/dummy rows are summed like any other group.
    #[default]
    Sum,
    /// Missing/dummy rows are dropped after summing.
    Remove,
    /// Every grouping key gets every lineage seen anywhere, absent ones at 0.
    ZeroCounts,
}

impl FromStr for MissingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "remove" => Ok(Self::Remove),
            "zero_counts" | "zero_count" | "zero-counts" => Ok(Self::ZeroCounts),
            _ => Err(Error::UnknownPolicy(s.to_owned())),
        }
    }
}

impl fmt::Display for MissingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Remove => "remove",
            Self::ZeroCounts => "zero_counts",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub target_rank: Rank,
    pub policy: MissingPolicy,
    /// Empty means every column left of `kingdom`.
    pub grouping_keys: Vec<String>,
    pub dummy_values: DummyValues,
    pub simple: bool,
    /// Keep non-taxonomic columns outside the grouping keys. Values come from
    /// the first row of each group and carry no meaning.
    pub keep_remaining: bool,
}

impl AggregateOptions {
    pub fn new(target_rank: Rank) -> Self {
        Self {
            target_rank,
            policy: MissingPolicy::default(),
            grouping_keys: Vec::new(),
            dummy_values: DummyValues::default(),
            simple: false,
            keep_remaining: false,
        }
    }

    pub fn at(rank: &str) -> Result<Self> {
        Ok(Self::new(rank.parse()?))
    }

    pub fn with_policy(mut self, policy: MissingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_grouping<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.grouping_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dummy_values(mut self, dummy_values: DummyValues) -> Self {
        self.dummy_values = dummy_values;
        self
    }

    pub fn simple(mut self, yes: bool) -> Self {
        self.simple = yes;
        self
    }

    pub fn keep_remaining(mut self, yes: bool) -> Self {
        self.keep_remaining = yes;
        self
    }
}

type Cells = Vec<Option<String>>;

struct Bucket {
    count: u64,
    passthrough: Cells,
}

pub fn aggregate(table: &LongTable, opts: &AggregateOptions) -> Result<LongTable> {
    let t0 = Instant::now();
    let target = opts.target_rank;

    let missing: Vec<String> = target
        .with_coarser()
        .iter()
        .filter(|r| table.column_index(r.column()).is_none())
        .map(|r| r.column().to_owned())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingRankColumns(missing));
    }

    let keys: Vec<String> = if opts.grouping_keys.is_empty() {
        let kingdom = table.column_index(Rank::Kingdom.column()).unwrap_or(0);
        table.columns()[..kingdom].to_vec()
    } else {
        opts.grouping_keys.clone()
    };
    let missing: Vec<String> = keys
        .iter()
        .filter(|k| table.column_index(k).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingGroupingColumns(missing));
    }

    let ranks: &[Rank] = if opts.simple {
        std::slice::from_ref(&opts.target_rank)
    } else {
        target.with_coarser()
    };
    let clashing: Vec<String> = keys
        .iter()
        .filter(|k| ranks.iter().any(|r| r.column() == k.as_str()))
        .cloned()
        .collect();
    if !clashing.is_empty() {
        return Err(Error::GroupingKeyIsRank(clashing));
    }
    let key_at: Vec<usize> = keys.iter().filter_map(|k| table.column_index(k)).collect();
    let rank_at: Vec<usize> = ranks
        .iter()
        .filter_map(|r| table.column_index(r.column()))
        .collect();
    let pass_at: Vec<usize> = if opts.keep_remaining {
        (0..table.columns().len())
            .filter(|i| !key_at.contains(i))
            .filter(|&i| Rank::from_column(&table.columns()[i]).is_none())
            .collect()
    } else {
        Vec::new()
    };
    let dummy = opts.dummy_values.get(target);

    /* ─────────── Sum ─────────── */
    let mut buckets: BTreeMap<(Cells, Cells), Bucket> = BTreeMap::new();
    for row in table.rows() {
        let key: Cells = key_at.iter().map(|&i| row.value(i).map(str::to_owned)).collect();
        let mut lineage: Cells = rank_at
            .iter()
            .map(|&i| row.value(i).map(|v| strip_brackets(v).into_owned()))
            .collect();
        if let Some(last) = lineage.last_mut() {
            if last.is_none() {
                *last = Some(dummy.to_owned());
            }
        }
        match buckets.entry((key, lineage)) {
            Entry::Vacant(e) => {
                e.insert(Bucket {
                    count: row.count(),
                    passthrough: pass_at.iter().map(|&i| row.value(i).map(str::to_owned)).collect(),
                });
            }
            Entry::Occupied(mut e) => {
                let sum = e.get().count.checked_add(row.count()).ok_or_else(|| {
                    Error::InvalidCount {
                        location: format!("group {:?}", e.key()),
                        value: format!("{} + {} overflows", e.get().count, row.count()),
                    }
                })?;
                e.get_mut().count = sum;
            }
        }
    }

    /* ─────────── Missing-data policy ─────────── */
    match opts.policy {
        MissingPolicy::Sum => {}
        MissingPolicy::Remove => {
            let before = buckets.len();
            buckets.retain(|(_, lineage), _| {
                !opts
                    .dummy_values
                    .is_missing(target, lineage.last().and_then(|v| v.as_deref()))
            });
            debug!("removed {} groups without a {target}", before - buckets.len());
        }
        MissingPolicy::ZeroCounts => {
            let groups: BTreeSet<Cells> = buckets.keys().map(|(k, _)| k.clone()).collect();
            let lineages: BTreeSet<Cells> = buckets.keys().map(|(_, l)| l.clone()).collect();
            let before = buckets.len();
            for group in &groups {
                for lineage in &lineages {
                    buckets
                        .entry((group.clone(), lineage.clone()))
                        .or_insert_with(|| Bucket { count: 0, passthrough: vec![None; pass_at.len()] });
                }
            }
            debug!("zero-filled {} absent group/lineage pairs", buckets.len() - before);
        }
    }

    /* ─────────── Emit ─────────── */
    let columns = keys
        .iter()
        .map(String::as_str)
        .chain(ranks.iter().map(|r| r.column()))
        .chain(pass_at.iter().map(|&i| table.columns()[i].as_str()));
    let mut out = LongTable::new(columns)?;
    for ((mut key, lineage), bucket) in buckets {
        key.extend(lineage);
        key.extend(bucket.passthrough);
        out.push(key, bucket.count)?;
    }

    info!(
        "aggregated {} rows to {} at {target} ({}, {}) in {} ms",
        table.len(),
        out.len(),
        opts.policy,
        if opts.simple { "simple" } else { "hierarchical" },
        t0.elapsed().as_millis()
    );
    Ok(out)
}
