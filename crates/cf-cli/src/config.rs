//! `cutflow run` configuration (YAML or JSON).

use anyhow::{Result, bail};
use cf_analysis::Analysis;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-process options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessOptions {
    /// Leading fraction of every partition to process, in `(0, 1]`.
    #[serde(default = "default_fraction")]
    pub fraction: f64,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self { fraction: default_fraction() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Which bundled pipeline to run.
    pub analysis: Analysis,
    /// Processes to run, by name.
    pub process_list: BTreeMap<String, ProcessOptions>,
    /// Root of `<input_dir>/<process>/*.jsonl`.
    pub input_dir: PathBuf,
    /// Where `<process>.json` artifacts are written.
    pub output_dir: PathBuf,
    /// Sample dictionary with cross sections and generated-event counts.
    pub sample_dict: PathBuf,

    /// Worker threads (and the minimum partition count for single-file datasets).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Integrated luminosity (pb^-1) used when `do_scale` is set.
    #[serde(default = "default_int_lumi")]
    pub int_lumi: f64,

    /// Scale histograms by `int_lumi * xsec / events_generated` before writing.
    #[serde(default)]
    pub do_scale: bool,

    /// How many times a failing partition is re-read.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_fraction() -> f64 {
    1.0
}

fn default_workers() -> usize {
    4
}

fn default_int_lumi() -> f64 {
    1.0
}

fn default_max_retries() -> usize {
    2
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub analysis: Option<Analysis>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub sample_dict: Option<PathBuf>,
    pub workers: Option<usize>,
    pub int_lumi: Option<f64>,
    pub do_scale: bool,
    pub max_retries: Option<usize>,
    pub processes: Vec<String>,
}

pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}

impl RunConfig {
    /// Apply command-line overrides. Relative paths stay relative to the
    /// working directory.
    pub fn apply(mut self, o: Overrides) -> Self {
        if let Some(a) = o.analysis {
            self.analysis = a;
        }
        if let Some(p) = o.input_dir {
            self.input_dir = p;
        }
        if let Some(p) = o.output_dir {
            self.output_dir = p;
        }
        if let Some(p) = o.sample_dict {
            self.sample_dict = p;
        }
        if let Some(w) = o.workers {
            self.workers = w;
        }
        if let Some(l) = o.int_lumi {
            self.int_lumi = l;
        }
        if let Some(r) = o.max_retries {
            self.max_retries = r;
        }
        self.do_scale |= o.do_scale;
        if !o.processes.is_empty() {
            self.process_list = o
                .processes
                .into_iter()
                .map(|p| {
                    let opts = self.process_list.get(&p).cloned().unwrap_or_default();
                    (p, opts)
                })
                .collect();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.process_list.is_empty() {
            bail!("process_list is empty");
        }
        for (name, opts) in &self.process_list {
            if name.is_empty() || name.contains(['/', '\\']) {
                bail!("invalid process name '{name}'");
            }
            if !(opts.fraction > 0.0 && opts.fraction <= 1.0) {
                bail!("process '{name}': fraction must be in (0, 1], got {}", opts.fraction);
            }
        }
        if self.workers == 0 {
            bail!("workers must be >= 1");
        }
        if self.do_scale && !(self.int_lumi.is_finite() && self.int_lumi > 0.0) {
            bail!("int_lumi must be positive and finite when do_scale is set, got {}", self.int_lumi);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
analysis: zmumu_xsec
process_list:
  wzp6_ee_mumu_ecm91p2: {fraction: 0.5}
  p8_ee_Zmumu_ecm91: {}
input_dir: data
output_dir: out
sample_dict: samplesDict.json
do_scale: true
"#;

    #[test]
    fn yaml_defaults_and_overrides() {
        let cfg: RunConfig = serde_yaml_ng::from_str(YAML).unwrap();
        assert_eq!(cfg.analysis, Analysis::ZmumuXsec);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.int_lumi, 1.0);
        assert_eq!(cfg.process_list["p8_ee_Zmumu_ecm91"].fraction, 1.0);
        cfg.validate().unwrap();

        let cfg = cfg.apply(Overrides {
            analysis: Some(Analysis::ZmumuAfb),
            workers: Some(1),
            processes: vec!["wzp6_ee_mumu_ecm91p2".into(), "new_proc".into()],
            ..Default::default()
        });
        assert_eq!(cfg.analysis, Analysis::ZmumuAfb);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.process_list.len(), 2);
        assert_eq!(cfg.process_list["wzp6_ee_mumu_ecm91p2"].fraction, 0.5);
        assert_eq!(cfg.process_list["new_proc"].fraction, 1.0);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg: RunConfig = serde_yaml_ng::from_str(YAML).unwrap();
        cfg.process_list.get_mut("p8_ee_Zmumu_ecm91").unwrap().fraction = 0.0;
        assert!(cfg.validate().unwrap_err().to_string().contains("fraction"));

        let mut cfg: RunConfig = serde_yaml_ng::from_str(YAML).unwrap();
        cfg.int_lumi = -1.0;
        assert!(cfg.validate().is_err());

        let bad = YAML.replace("zmumu_xsec", "zmumu");
        assert!(serde_yaml_ng::from_str::<RunConfig>(&bad).is_err());
    }
}
