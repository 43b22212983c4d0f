//! Dataset discovery and JSON-lines event partitions.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};

use cf_core::{Error, Event, Result};
use cf_frame::{Partition, split_rows};
use serde::Deserialize;

/// One entry of the sample dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SampleInfo {
    /// Cross section (pb).
    #[serde(rename = "crossSection")]
    pub cross_section: f64,
    /// Number of generated events.
    #[serde(rename = "numberOfEvents")]
    pub number_of_events: u64,
}

/// `{ "<process>": {"crossSection": .., "numberOfEvents": ..} }`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SampleDict(BTreeMap<String, SampleInfo>);

impl SampleDict {
    pub fn read(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|e| {
            Error::Config(format!("cannot open sample dictionary {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_reader(BufReader::new(f))?)
    }

    pub fn get(&self, process: &str) -> Result<SampleInfo> {
        self.0.get(process).copied().ok_or_else(|| {
            Error::Config(format!("process '{process}' not found in sample dictionary"))
        })
    }
}

/// `*.jsonl` files of `<input_dir>/<process>/`, sorted by name.
pub fn discover(input_dir: &Path, process: &str) -> Result<Vec<PathBuf>> {
    let dir = input_dir.join(process);
    if !dir.is_dir() {
        return Err(Error::Config(format!("no input directory {}", dir.display())));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "jsonl"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(Error::Config(format!("no .jsonl files in {}", dir.display())));
    }
    Ok(files)
}

/// Rows `rows` (counting non-blank lines) of one JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlPartition {
    path: PathBuf,
    rows: Range<usize>,
}

impl JsonlPartition {
    pub fn new(path: PathBuf, rows: Range<usize>) -> Self {
        Self { path, rows }
    }

    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }
}

impl Partition for JsonlPartition {
    fn label(&self) -> String {
        format!("{}[{}..{}]", self.path.display(), self.rows.start, self.rows.end)
    }

    fn events(&self) -> Result<Box<dyn Iterator<Item = Result<Event>> + '_>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let path = self.path.display().to_string();
        let iter = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
            .skip(self.rows.start)
            .take(self.rows.len())
            .map(move |(lineno, line)| -> Result<Event> {
                let line = line?;
                let mut ev: Event = serde_json::from_str(&line).map_err(|e| {
                    Error::Validation(format!("{path}:{}: malformed event: {e}", lineno + 1))
                })?;
                ev.assign_particle_indices();
                Ok(ev)
            });
        Ok(Box::new(iter))
    }
}

/// Number of non-blank lines.
pub fn count_rows(path: &Path) -> Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut n = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            n += 1;
        }
    }
    Ok(n)
}

/// One partition per file; a lone file is split into `workers` row ranges.
/// `fraction` keeps the leading rows of each file (at least one row of a
/// non-empty file) before any split, so the kept events do not depend on
/// `workers`.
pub fn plan_partitions(files: &[PathBuf], workers: usize, fraction: f64) -> Result<Vec<JsonlPartition>> {
    let mut out = Vec::new();
    for path in files {
        let kept = keep_fraction(0..count_rows(path)?, fraction);
        let ranges: Vec<Range<usize>> = if files.len() == 1 && workers > 1 {
            split_rows(kept.len(), workers)
                .into_iter()
                .map(|r| kept.start + r.start..kept.start + r.end)
                .collect()
        } else {
            vec![kept]
        };
        for r in ranges {
            out.push(JsonlPartition::new(path.clone(), r));
        }
    }
    Ok(out)
}

fn keep_fraction(r: Range<usize>, fraction: f64) -> Range<usize> {
    if fraction >= 1.0 || r.is_empty() {
        return r;
    }
    let keep = ((r.len() as f64) * fraction).ceil() as usize;
    r.start..r.start + keep.clamp(1, r.len())
}
