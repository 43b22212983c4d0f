//! `cutflow run`: execute the configured pipeline over every process.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use cf_frame::{DatasetOutput, Driver, Pipeline};
use serde::Serialize;

use crate::config::{ProcessOptions, RunConfig};
use crate::source::{self, SampleDict};

/// Outcome of one process.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub process: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub partitions: usize,
    pub events_processed: u64,
    pub events_dropped: u64,
    pub weight_sum: f64,
    pub wall_time_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub analysis: String,
    pub output_dir: PathBuf,
    pub datasets: Vec<DatasetReport>,
}

impl RunSummary {
    pub fn n_failed(&self) -> usize {
        self.datasets.iter().filter(|d| !d.ok).count()
    }
}

/// Run every process; a failing process is reported and the others continue.
pub fn run_all(cfg: &RunConfig) -> Result<RunSummary> {
    cfg.validate()?;
    let pipeline = cfg.analysis.pipeline()?;
    let samples = SampleDict::read(&cfg.sample_dict)?;
    std::fs::create_dir_all(&cfg.output_dir)?;

    tracing::info!(
        analysis = %cfg.analysis,
        processes = cfg.process_list.len(),
        workers = cfg.workers,
        "starting run"
    );

    let driver = Driver::new(cfg.workers).max_retries(cfg.max_retries);
    let mut datasets = Vec::with_capacity(cfg.process_list.len());
    for (process, opts) in &cfg.process_list {
        let started = Instant::now();
        let report = match run_dataset(cfg, &driver, &pipeline, &samples, process, opts) {
            Ok((out, path, partitions)) => {
                tracing::info!(
                    process = %process,
                    events = out.result.events_processed,
                    dropped = out.result.events_dropped,
                    output = %path.display(),
                    "dataset done"
                );
                DatasetReport {
                    process: process.clone(),
                    ok: true,
                    output: Some(path),
                    error: None,
                    partitions,
                    events_processed: out.result.events_processed,
                    events_dropped: out.result.events_dropped,
                    weight_sum: out.result.weight_sum,
                    wall_time_s: started.elapsed().as_secs_f64(),
                }
            }
            Err(e) => {
                let e = e.for_dataset(process.clone());
                tracing::error!("{e}");
                DatasetReport {
                    process: process.clone(),
                    ok: false,
                    output: None,
                    error: Some(e.to_string()),
                    partitions: 0,
                    events_processed: 0,
                    events_dropped: 0,
                    weight_sum: 0.0,
                    wall_time_s: started.elapsed().as_secs_f64(),
                }
            }
        };
        datasets.push(report);
    }

    Ok(RunSummary {
        analysis: cfg.analysis.to_string(),
        output_dir: cfg.output_dir.clone(),
        datasets,
    })
}

/// Run one process and write `<output_dir>/<process>.json`.
///
/// Nothing is written unless every partition succeeded.
fn run_dataset(
    cfg: &RunConfig,
    driver: &Driver,
    pipeline: &Pipeline,
    samples: &SampleDict,
    process: &str,
    opts: &ProcessOptions,
) -> cf_core::Result<(DatasetOutput, PathBuf, usize)> {
    let info = samples.get(process)?;
    let files = source::discover(&cfg.input_dir, process)?;
    let partitions = source::plan_partitions(&files, cfg.workers, opts.fraction)?;
    tracing::debug!(process, files = files.len(), partitions = partitions.len(), "planned");

    let result = driver.run(pipeline, &partitions)?;

    let mut out = DatasetOutput::new(process, info.cross_section, info.number_of_events, result);
    if cfg.do_scale {
        out.scale_to_lumi(cfg.int_lumi)?;
    }
    let path = cfg.output_dir.join(format!("{process}.json"));
    out.write_json(&path)?;
    Ok((out, path, partitions.len()))
}
