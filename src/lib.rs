//! Taxonomic roll-up of microbial abundance tables.
//!
//! * [`table::AbundanceTable`]: sparse observation × sample counts (BIOM or TSV)
//! * [`tree::TreeIndex`]: reference tree with a precomputed parent index
//! * [`resolver::LineageResolver`]: rank-aligned lineage per observation
//! * [`extract`]: nonzero cells joined with their lineages, long format
//! * [`aggregate`]: roll-up to one rank under a missing-data policy
pub mod aggregate;
pub mod error;
pub mod extract;
pub mod lineage;
pub mod long_table;
pub mod resolver;
pub mod table;
pub mod taxon;
pub mod tree;

pub use aggregate::{AggregateOptions, MissingPolicy, aggregate};
pub use error::{Error, Result};
pub use extract::{CountCell, extract, to_long_table};
pub use lineage::Lineage;
pub use long_table::{CountRow, LongTable};
pub use resolver::{LineageResolver, is_sequencing_variant};
pub use table::AbundanceTable;
pub use taxon::{DummyValues, Rank, TaxonLabel};
pub use tree::{ParentIndex, Tree, TreeIndex};
