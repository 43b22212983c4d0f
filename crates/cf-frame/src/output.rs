//! Merged pipeline results and the per-dataset output artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cf_core::{Error, Result};

use crate::histogram::Histogram;

/// Everything a pipeline accumulated over a set of partitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Histograms by name.
    pub histograms: BTreeMap<String, Histogram>,
    /// Sum of per-event weights over all successfully processed events.
    pub weight_sum: f64,
    /// Events that completed without error.
    pub events_processed: u64,
    /// Events that passed every filter.
    pub events_passed: u64,
    /// Events dropped because of an evaluation error.
    pub events_dropped: u64,
}

impl PipelineResult {
    /// Add another result, histogram by histogram.
    ///
    /// A histogram present on only one side is taken as is.
    pub fn merge(&mut self, other: &PipelineResult) -> Result<()> {
        for (name, h) in &other.histograms {
            match self.histograms.get_mut(name) {
                Some(mine) => mine.merge(h)?,
                None => {
                    self.histograms.insert(name.clone(), h.clone());
                }
            }
        }
        self.weight_sum += other.weight_sum;
        self.events_processed += other.events_processed;
        self.events_passed += other.events_passed;
        self.events_dropped += other.events_dropped;
        Ok(())
    }

    /// Multiply every histogram by `s`. The weight sum is left alone.
    pub fn scale(&mut self, s: f64) {
        self.histograms.values_mut().for_each(|h| h.scale(s));
    }

    /// Histogram by name, or a validation error naming what is available.
    pub fn histogram(&self, name: &str) -> Result<&Histogram> {
        self.histograms.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.histograms.keys().map(String::as_str).collect();
            Error::Validation(format!("no histogram '{name}' (have: {})", known.join(", ")))
        })
    }
}

/// `lumi * cross_section / events_generated`.
pub fn normalization_scale(lumi: f64, cross_section: f64, events_generated: u64) -> Result<f64> {
    if events_generated == 0 {
        return Err(Error::Validation("cannot normalize with zero generated events".into()));
    }
    if !lumi.is_finite() || !cross_section.is_finite() {
        return Err(Error::Validation(format!(
            "non-finite normalization inputs: lumi={lumi}, cross_section={cross_section}"
        )));
    }
    Ok(lumi * cross_section / events_generated as f64)
}

/// Output of one dataset run: metadata next to the merged result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetOutput {
    /// Process (dataset) name.
    pub process: String,
    /// Cross section in pb.
    pub cross_section: f64,
    /// Number of generated events the cross section refers to.
    pub events_generated: u64,
    /// Luminosity the histograms were scaled to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled_to_lumi: Option<f64>,
    /// Merged histograms and counters.
    #[serde(flatten)]
    pub result: PipelineResult,
}

impl DatasetOutput {
    /// Wrap a result with its dataset metadata.
    pub fn new(
        process: impl Into<String>,
        cross_section: f64,
        events_generated: u64,
        result: PipelineResult,
    ) -> Self {
        Self {
            process: process.into(),
            cross_section,
            events_generated,
            scaled_to_lumi: None,
            result,
        }
    }

    /// Scale histograms to `lumi`. Fails if already scaled.
    pub fn scale_to_lumi(&mut self, lumi: f64) -> Result<()> {
        if let Some(prev) = self.scaled_to_lumi {
            return Err(Error::Validation(format!(
                "'{}' already scaled to {prev}",
                self.process
            )));
        }
        let s = normalization_scale(lumi, self.cross_section, self.events_generated)?;
        self.result.scale(s);
        self.scaled_to_lumi = Some(lumi);
        Ok(())
    }

    /// Factor already applied to the histograms: 1 for raw counts.
    pub fn applied_scale(&self) -> Result<f64> {
        match self.scaled_to_lumi {
            Some(done) => normalization_scale(done, self.cross_section, self.events_generated),
            None => Ok(1.0),
        }
    }

    /// Factor taking the stored histograms to expected events at `lumi`.
    pub fn lumi_factor(&self, lumi: f64) -> Result<f64> {
        let applied = self.applied_scale()?;
        if applied == 0.0 {
            return Err(Error::Validation(format!(
                "'{}' was scaled by zero, raw counts are lost",
                self.process
            )));
        }
        Ok(normalization_scale(lumi, self.cross_section, self.events_generated)? / applied)
    }

    /// Read an artifact written by [`DatasetOutput::write_json`].
    pub fn read_json(path: &std::path::Path) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
    }

    /// Write as pretty JSON.
    pub fn write_json(&self, path: &std::path::Path) -> Result<()> {
        let f = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(f), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Axis;
    use approx::assert_relative_eq;

    fn result_with(name: &str, xs: &[f64]) -> PipelineResult {
        let mut h = Histogram::new(name, Axis::new(4, 0.0, 4.0));
        xs.iter().for_each(|&x| h.fill(x, 1.0));
        PipelineResult {
            histograms: [(name.to_string(), h)].into_iter().collect(),
            weight_sum: xs.len() as f64,
            events_processed: xs.len() as u64,
            events_passed: xs.len() as u64,
            events_dropped: 0,
        }
    }

    #[test]
    fn merge_by_name() {
        let mut a = result_with("x", &[0.5, 1.5]);
        a.merge(&result_with("x", &[1.5])).unwrap();
        a.merge(&result_with("y", &[3.5])).unwrap();
        assert_eq!(a.histograms["x"].bin_content, vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(a.histograms["y"].entries, 1);
        assert_eq!(a.weight_sum, 4.0);
        assert!(a.histogram("z").unwrap_err().to_string().contains("have: x, y"));
    }

    #[test]
    fn normalization() {
        assert_relative_eq!(normalization_scale(1e6, 1462.0, 100_000).unwrap(), 14620.0);
        assert!(normalization_scale(1.0, 1.0, 0).is_err());
    }

    #[test]
    fn scale_once_then_lumi_factor() {
        let mut out = DatasetOutput::new("p8_ee_Zmumu", 2.0, 100, result_with("x", &[0.5]));
        assert_relative_eq!(out.lumi_factor(50.0).unwrap(), 1.0);
        out.scale_to_lumi(100.0).unwrap();
        assert_relative_eq!(out.result.histograms["x"].content(0), 2.0);
        assert_relative_eq!(out.result.histograms["x"].sumw2[0], 4.0);
        assert_relative_eq!(out.lumi_factor(50.0).unwrap(), 0.5);
        assert_relative_eq!(out.applied_scale().unwrap(), 2.0);
        assert!(out.scale_to_lumi(100.0).is_err());
    }

    #[test]
    fn json_layout_is_flat() {
        let out = DatasetOutput::new("p", 1.0, 10, result_with("x", &[0.5]));
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["process"], "p");
        assert_eq!(v["events_generated"], 10);
        assert!(v.get("scaled_to_lumi").is_none());
        assert_eq!(v["histograms"]["x"]["entries"], 1);
        let back: DatasetOutput = serde_json::from_value(v).unwrap();
        assert_eq!(back, out);
    }
}
