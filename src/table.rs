//! Sparse observation × sample count tables.
//!
//!  * BIOM 2.x (HDF5): CSR arrays under `observation/matrix/` (or directly
//!    under `observation/` in older files), taxonomy in
//!    `observation/metadata/taxonomy` when present.
//!  * classic tab-separated OTU tables, optional trailing `taxonomy` column.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use hdf5::{File as H5File, H5Type, types::VarLenUnicode};
use log::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct AbundanceTable {
    observation_ids: Vec<String>,
    sample_ids: Vec<String>,
    // CSR by observation
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<u64>,
    taxonomy: Option<Vec<Vec<String>>>,
    observation_index: HashMap<String, usize>,
}

impl AbundanceTable {
    pub fn from_csr(
        observation_ids: Vec<String>,
        sample_ids: Vec<String>,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<u64>,
    ) -> Result<Self> {
        let malformed = |msg: String| Err(Error::MalformedTable(msg));
        if indptr.len() != observation_ids.len() + 1 {
            return malformed(format!(
                "indptr has {} entries for {} observations",
                indptr.len(),
                observation_ids.len()
            ));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) || indptr[0] != 0 {
            return malformed("indptr is not a non-decreasing offset array from 0".into());
        }
        let nnz = indptr[observation_ids.len()];
        if indices.len() != nnz || data.len() != nnz {
            return malformed(format!(
                "indptr announces {nnz} entries, got {} indices and {} values",
                indices.len(),
                data.len()
            ));
        }
        if let Some(&bad) = indices.iter().find(|&&s| s >= sample_ids.len()) {
            return malformed(format!(
                "sample index {bad} out of range for {} samples",
                sample_ids.len()
            ));
        }

        let mut observation_index = HashMap::with_capacity(observation_ids.len());
        for (row, id) in observation_ids.iter().enumerate() {
            if observation_index.insert(id.clone(), row).is_some() {
                return malformed(format!("duplicate observation id {id:?}"));
            }
        }

        Ok(Self {
            observation_ids,
            sample_ids,
            indptr,
            indices,
            data,
            taxonomy: None,
            observation_index,
        })
    }

    /// Builds the CSR layout from `(observation, sample, count)` triples.
    /// Repeated coordinates are summed.
    pub fn from_triplets(
        observation_ids: Vec<String>,
        sample_ids: Vec<String>,
        triplets: impl IntoIterator<Item = (usize, usize, u64)>,
    ) -> Result<Self> {
        let (nobs, nsamp) = (observation_ids.len(), sample_ids.len());
        let mut rows: Vec<Vec<(usize, u64)>> = vec![Vec::new(); nobs];
        for (r, c, v) in triplets {
            if r >= nobs || c >= nsamp {
                return Err(Error::MalformedTable(format!(
                    "cell ({r}, {c}) outside a {nobs} x {nsamp} table"
                )));
            }
            rows[r].push((c, v));
        }

        let mut indptr = Vec::with_capacity(nobs + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for mut row in rows {
            row.sort_unstable_by_key(|&(c, _)| c);
            let start = indices.len();
            for (c, v) in row {
                match (indices.len() > start).then(|| indices.len() - 1) {
                    Some(last) if indices[last] == c => data[last] += v,
                    _ => {
                        indices.push(c);
                        data.push(v);
                    }
                }
            }
            indptr.push(indices.len());
        }
        Self::from_csr(observation_ids, sample_ids, indptr, indices, data)
    }

    /// Attaches one rank-ordered taxonomy list per observation.
    pub fn with_taxonomy(mut self, taxonomy: Vec<Vec<String>>) -> Result<Self> {
        if taxonomy.len() != self.observation_ids.len() {
            return Err(Error::MalformedTable(format!(
                "{} taxonomy entries for {} observations",
                taxonomy.len(),
                self.observation_ids.len()
            )));
        }
        self.taxonomy = Some(taxonomy);
        Ok(self)
    }

    pub fn observation_ids(&self) -> &[String] {
        &self.observation_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn has_taxonomy(&self) -> bool {
        self.taxonomy.is_some()
    }

    pub fn observation_position(&self, observation_id: &str) -> Option<usize> {
        self.observation_index.get(observation_id).copied()
    }

    /// Embedded taxonomy of `observation_id`; `None` when absent or blank.
    pub fn taxonomy(&self, observation_id: &str) -> Option<&[String]> {
        self.taxonomy_at(self.observation_position(observation_id)?)
    }

    pub fn taxonomy_at(&self, row: usize) -> Option<&[String]> {
        let entries = self.taxonomy.as_ref()?.get(row)?;
        if entries.iter().all(|e| e.trim().is_empty()) {
            None
        } else {
            Some(entries)
        }
    }

    /// `(observation row, sample column, count)` for every nonzero cell.
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, usize, u64)> + '_ {
        (0..self.observation_ids.len()).flat_map(move |row| {
            (self.indptr[row]..self.indptr[row + 1]).filter_map(move |k| {
                let count = self.data[k];
                (count > 0).then_some((row, self.indices[k], count))
            })
        })
    }

    pub fn read_biom(p: &str) -> Result<Self> {
        let f = H5File::open(p)?;

        // ----- helpers -------------------------------------------------------
        fn read_utf8(f: &H5File, path: &str) -> Result<Vec<String>> {
            Ok(f.dataset(path)?
                .read_1d::<VarLenUnicode>()?
                .into_iter()
                .map(|v| v.as_str().to_owned())
                .collect())
        }
        fn read_raw<T: H5Type>(f: &H5File, path: &str) -> Result<Vec<T>> {
            Ok(f.dataset(path)?.read_raw::<T>()?)
        }
        // current layout first, then the BIOM 2.0 one
        fn read_csr<T: H5Type>(f: &H5File, name: &str) -> Result<Vec<T>> {
            read_raw(f, &format!("observation/matrix/{name}"))
                .or_else(|_| read_raw(f, &format!("observation/{name}")))
        }

        // ----- required datasets --------------------------------------------
        let observation_ids = read_utf8(&f, "observation/ids")?;
        let sample_ids = read_utf8(&f, "sample/ids")?;
        let indptr: Vec<usize> = read_csr::<u32>(&f, "indptr")?
            .into_iter()
            .map(|v| v as usize)
            .collect();
        let indices: Vec<usize> = read_csr::<u32>(&f, "indices")?
            .into_iter()
            .map(|v| v as usize)
            .collect();
        let data = read_csr::<f64>(&f, "data")?
            .into_iter()
            .enumerate()
            .map(|(k, v)| integral_count(v, || format!("{p}: matrix entry {k}")))
            .collect::<Result<Vec<u64>>>()?;

        let table = Self::from_csr(observation_ids, sample_ids, indptr, indices, data)?;

        // ----- optional taxonomy --------------------------------------------
        let table = match f.dataset("observation/metadata/taxonomy") {
            Ok(ds) => {
                let width = ds.shape().get(1).copied().unwrap_or(1).max(1);
                let flat = ds.read_raw::<VarLenUnicode>()?;
                let taxonomy = flat
                    .chunks(width)
                    .map(|row| row.iter().map(|v| v.as_str().to_owned()).collect())
                    .collect();
                table.with_taxonomy(taxonomy)?
            }
            Err(_) => {
                debug!("{p}: no observation taxonomy metadata");
                table
            }
        };
        info!(
            "BIOM {p}: {} observations x {} samples, {} nonzero",
            table.observation_ids.len(),
            table.sample_ids.len(),
            table.nnz()
        );
        Ok(table)
    }

    pub fn read_tsv(p: &str) -> Result<Self> {
        let f = File::open(p)?;
        Self::parse_tsv(BufReader::new(f))
    }

    /// `#OTU ID<TAB>sample...[<TAB>taxonomy]` followed by one row per observation.
    pub fn parse_tsv<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let hdr = loop {
            let line = lines
                .next()
                .ok_or_else(|| Error::MalformedTable("empty table".into()))??;
            if line.trim().is_empty() || line.starts_with("# Constructed from biom") {
                continue;
            }
            break line;
        };
        let mut it = hdr.split('\t');
        it.next();
        let mut samples: Vec<String> = it.map(|s| s.trim().to_owned()).collect();
        let with_taxonomy = samples
            .last()
            .is_some_and(|s| s.eq_ignore_ascii_case("taxonomy"));
        if with_taxonomy {
            samples.pop();
        }

        let mut taxa = Vec::new();
        let mut taxonomy = Vec::new();
        let mut cells = Vec::new();
        for l in lines {
            let row = l?;
            if row.trim().is_empty() || row.starts_with('#') {
                continue;
            }
            let mut p = row.split('\t');
            let tax = p.next().unwrap_or_default().trim().to_owned();
            let fields: Vec<&str> = p.collect();
            if fields.len() < samples.len() {
                return Err(Error::MalformedTable(format!(
                    "observation {tax:?}: {} count columns, header has {}",
                    fields.len(),
                    samples.len()
                )));
            }
            let r = taxa.len();
            for (s, v) in fields[..samples.len()].iter().enumerate() {
                let count = parse_count(v, || format!("observation {tax:?}, sample {:?}", samples[s]))?;
                if count > 0 {
                    cells.push((r, s, count));
                }
            }
            if with_taxonomy {
                let lineage = fields
                    .get(samples.len())
                    .map(|t| t.split(';').map(|x| x.trim().to_owned()).collect())
                    .unwrap_or_default();
                taxonomy.push(lineage);
            }
            taxa.push(tax);
        }

        let table = Self::from_triplets(taxa, samples, cells)?;
        if with_taxonomy { table.with_taxonomy(taxonomy) } else { Ok(table) }
    }
}

pub(crate) fn parse_count(text: &str, location: impl FnOnce() -> String) -> Result<u64> {
    let text = text.trim();
    if let Ok(v) = text.parse::<u64>() {
        return Ok(v);
    }
    match text.parse::<f64>() {
        Ok(v) => integral_count(v, location),
        Err(_) => Err(Error::InvalidCount { location: location(), value: text.to_owned() }),
    }
}

/// Counts are stored as floats in BIOM; only whole non-negative values are accepted.
fn integral_count(v: f64, location: impl FnOnce() -> String) -> Result<u64> {
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
        Ok(v as u64)
    } else {
        Err(Error::InvalidCount { location: location(), value: v.to_string() })
    }
}
