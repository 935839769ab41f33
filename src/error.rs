//! Error taxonomy for lineage resolution and rank aggregation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A node-name segment looks rank-prefixed but its structure cannot be read.
    #[error("unparseable taxon label {segment:?} in {node:?}")]
    TaxonLabelParse { segment: String, node: String },

    #[error(
        "unknown taxonomic rank {0:?}; expected one of kingdom, phylum, class, order, family, genus, species"
    )]
    UnknownRank(String),

    #[error("table is missing taxonomic rank columns: {}", .0.join(", "))]
    MissingRankColumns(Vec<String>),

    #[error("table is missing grouping columns: {}", .0.join(", "))]
    MissingGroupingColumns(Vec<String>),

    /// A grouping column would be emitted a second time as a rank column.
    #[error("grouping columns are also output rank columns: {}", .0.join(", "))]
    GroupingKeyIsRank(Vec<String>),

    #[error("malformed tree: node {node} {reason}")]
    MalformedTree { node: String, reason: String },

    #[error("unknown missing-data policy {0:?}; expected sum, remove or zero_counts")]
    UnknownPolicy(String),

    #[error("invalid dummy value {0:?}; expected <rank>=<value>")]
    InvalidDummyOverride(String),

    #[error("table has no `count` column")]
    MissingCountColumn,

    #[error("invalid count {value:?} at {location}")]
    InvalidCount { location: String, value: String },

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error("newick: {0}")]
    Newick(String),

    #[error("BIOM: {0}")]
    Biom(#[from] hdf5::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
