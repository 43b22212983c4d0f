//! Downstream reports over `cutflow run` outputs: yields, acceptance, A_FB.

use std::path::Path;

use anyhow::{Context, Result, bail};
use cf_analysis::observables::{self, CUT_FLOW};
use cf_frame::DatasetOutput;
use serde_json::json;

fn load(output_dir: &Path, process: &str) -> Result<DatasetOutput> {
    let path = output_dir.join(format!("{process}.json"));
    DatasetOutput::read_json(&path).with_context(|| format!("reading {}", path.display()))
}

pub fn yields(output_dir: &Path, processes: &[String], lumi: f64, bin: usize) -> Result<serde_json::Value> {
    if processes.is_empty() {
        bail!("at least one --process is required");
    }
    let outputs = processes.iter().map(|p| load(output_dir, p)).collect::<Result<Vec<_>>>()?;
    let ys = observables::yields(&outputs, lumi, bin)?;
    for y in &ys {
        tracing::info!(process = %y.process, bare = y.bare, normalized = y.normalized, "yield");
    }
    Ok(json!({
        "lumi": lumi,
        "bin": bin,
        "yields": ys,
    }))
}

pub fn acceptance(output_dir: &Path, process: &str, total: usize, selected: usize) -> Result<serde_json::Value> {
    let out = load(output_dir, process)?;
    let acc = observables::acceptance(&out, total, selected)?;
    let cut_flow = out.result.histogram(CUT_FLOW)?;
    Ok(json!({
        "process": process,
        "total_bin": total,
        "selected_bin": selected,
        "n_total": cut_flow.content(total),
        "n_selected": cut_flow.content(selected),
        "acceptance": acc,
    }))
}

pub struct AfbArgs<'a> {
    pub histogram: &'a str,
    pub lumi: f64,
    pub abs_min: f64,
    pub abs_max: f64,
    pub rebin: usize,
}

pub fn afb(output_dir: &Path, process: &str, args: &AfbArgs<'_>) -> Result<serde_json::Value> {
    if !(0.0..=args.abs_max).contains(&args.abs_min) {
        bail!("need 0 <= min <= max, got min={} max={}", args.abs_min, args.abs_max);
    }
    let out = load(output_dir, process)?;
    let mut h = out.result.histogram(args.histogram)?.clone();
    if args.rebin > 1 {
        h = h.rebin(args.rebin)?;
    }
    h.scale(out.lumi_factor(args.lumi)?);

    let points = observables::afb_points(&h, args.abs_min, args.abs_max);
    let counted = observables::afb_count(&points)?;
    let fit = match observables::afb_fit(&points) {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!("angular fit failed: {e}");
            None
        }
    };
    tracing::info!(process, afb = counted.afb, error = counted.error, "A_FB (counting)");

    Ok(json!({
        "process": process,
        "histogram": args.histogram,
        "lumi": args.lumi,
        "window": [args.abs_min, args.abs_max],
        "rebin": args.rebin,
        "points": points.len(),
        "counting": counted,
        "fit": fit,
    }))
}
