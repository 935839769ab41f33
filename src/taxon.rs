//! Taxonomic ranks and the rank-prefix label grammar.
//!
//! A label is `<rank letter>__<name>` or `<rank letter>__[<name>]`, e.g.
//! `g__Bacteroides` or `p__[Thermi]`. Node names in reference trees bundle
//! several labels, separated by `;` or `|`, sometimes behind a
//! `branch_length:` token (`'0.998:k__Bacteria; p__Firmicutes'`).
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::error::{Error, Result};

static BRANCH_LENGTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9.]+:").unwrap());
static RANK_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[kpcofgs]__").unwrap());
static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([kpcofgs])__(?:\[([^\[\]:;,()|]*)\]|([^\[\]:;,()|]*))$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn prefix(self) -> char {
        match self {
            Rank::Kingdom => 'k',
            Rank::Phylum => 'p',
            Rank::Class => 'c',
            Rank::Order => 'o',
            Rank::Family => 'f',
            Rank::Genus => 'g',
            Rank::Species => 's',
        }
    }

    /// Column name of this rank in long-format tables.
    pub fn column(self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    pub fn from_prefix(c: char) -> Option<Rank> {
        Rank::ALL.into_iter().find(|r| r.prefix() == c)
    }

    pub fn from_column(name: &str) -> Option<Rank> {
        Rank::ALL.into_iter().find(|r| r.column() == name)
    }

    /// `g__` for genus, `s__` for species, ...
    pub fn default_dummy(self) -> String {
        format!("{}__", self.prefix())
    }

    /// Kingdom down to and including `self`.
    pub fn with_coarser(self) -> &'static [Rank] {
        &Rank::ALL[..=self.index()]
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Rank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Rank::from_column(&lower).ok_or_else(|| Error::UnknownRank(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaxonLabel {
    rank: Rank,
    name: String,
    bracketed: bool,
}

impl TaxonLabel {
    pub fn new(rank: Rank, name: impl Into<String>) -> Self {
        Self { rank, name: name.into(), bracketed: false }
    }

    /// The bare-prefix label (`g__`) for `rank`.
    pub fn unclassified(rank: Rank) -> Self {
        Self::new(rank, "")
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bracketed(&self) -> bool {
        self.bracketed
    }

    pub fn is_unclassified(&self) -> bool {
        self.name.is_empty()
    }

    /// Parses one label. `Ok(None)` when `text` is not rank-prefixed at all.
    pub fn parse(text: &str) -> Result<Option<TaxonLabel>> {
        parse_segment(text, text)
    }

    /// Label text without decorative brackets.
    pub fn normalized(&self) -> String {
        format!("{}__{}", self.rank.prefix(), self.name)
    }
}

impl fmt::Display for TaxonLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bracketed {
            write!(f, "{}__[{}]", self.rank.prefix(), self.name)
        } else {
            write!(f, "{}__{}", self.rank.prefix(), self.name)
        }
    }
}

fn parse_segment(raw: &str, node: &str) -> Result<Option<TaxonLabel>> {
    let segment = raw.trim().trim_matches(|c| c == '\'' || c == '"');
    let segment = match BRANCH_LENGTH.find(segment) {
        Some(m) => &segment[m.end()..],
        None => segment,
    }
    .trim();
    if !RANK_PREFIX.is_match(segment) {
        return Ok(None);
    }

    let parse_error = || Error::TaxonLabelParse {
        segment: segment.to_owned(),
        node: node.to_owned(),
    };
    let caps = LABEL.captures(segment).ok_or_else(parse_error)?;
    let rank = caps
        .get(1)
        .and_then(|m| m.as_str().chars().next())
        .and_then(Rank::from_prefix)
        .ok_or_else(parse_error)?;
    let (name, bracketed) = match caps.get(2) {
        Some(m) => (m.as_str(), true),
        None => (caps.get(3).map_or("", |m| m.as_str()), false),
    };
    Ok(Some(TaxonLabel { rank, name: name.trim().to_owned(), bracketed }))
}

/// Every rank-prefixed label embedded in a tree node name, in textual order.
///
/// Segments without a rank prefix (bootstrap values, branch lengths, free
/// text) are skipped. A segment with a prefix but a broken body is an error.
pub fn labels_in(node_name: &str) -> Result<Vec<TaxonLabel>> {
    node_name
        .split(|c| c == ';' || c == '|')
        .map(|segment| parse_segment(segment, node_name))
        .filter_map(Result::transpose)
        .collect()
}

/// Drops decorative `[` `]` so `p__[Firmicutes]` compares equal to `p__Firmicutes`.
pub fn strip_brackets(value: &str) -> Cow<'_, str> {
    if value.contains(|c: char| c == '[' || c == ']') {
        Cow::Owned(value.chars().filter(|&c| c != '[' && c != ']').collect())
    } else {
        Cow::Borrowed(value)
    }
}

/// Per-rank "unclassified" markers. Defaults to the bare prefix (`k__`, `p__`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyValues([String; 7]);

impl Default for DummyValues {
    fn default() -> Self {
        Self(std::array::from_fn(|i| Rank::ALL[i].default_dummy()))
    }
}

impl DummyValues {
    pub fn get(&self, rank: Rank) -> &str {
        &self.0[rank.index()]
    }

    pub fn set(&mut self, rank: Rank, value: impl Into<String>) {
        self.0[rank.index()] = value.into();
    }

    pub fn with(mut self, rank: Rank, value: impl Into<String>) -> Self {
        self.set(rank, value);
        self
    }

    /// Applies an override written as `genus=unclassified`.
    pub fn parse_override(&mut self, text: &str) -> Result<()> {
        let (rank, value) = text
            .split_once('=')
            .ok_or_else(|| Error::InvalidDummyOverride(text.to_owned()))?;
        let rank: Rank = rank.parse()?;
        self.set(rank, value);
        Ok(())
    }

    /// Null values count as missing too.
    pub fn is_missing(&self, rank: Rank, value: Option<&str>) -> bool {
        match value {
            None => true,
            Some(v) => v == self.get(rank),
        }
    }
}
