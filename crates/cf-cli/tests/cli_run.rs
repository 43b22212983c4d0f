use approx::assert_relative_eq;
use cf_core::{Event, Particle};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

const PROCESS: &str = "p8_ee_Zmumu_ecm91";
const XSEC: f64 = 10.0;
const GENERATED: u64 = 100;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cutflow"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("cutflow_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

fn mu(px: f64, py: f64, pz: f64, q: f64) -> Particle {
    Particle::new(px, py, pz, 0.105_658, q).with_pdg(13 * -(q as i32))
}

/// Two back-to-back central muons with a one-to-one truth association.
fn selected(p: f64) -> Event {
    let muons = vec![mu(p, 0.0, 3.0, 1.0), mu(-p, 0.0, -3.0, -1.0)];
    Event::new()
        .with_particles("ReconstructedParticles", muons.clone())
        .with_indices("Muon#0.index", vec![0, 1])
        .with_particles("Particle", muons)
        .with_indices("MCRecoAssociations#0.index", vec![0, 1])
        .with_indices("MCRecoAssociations#1.index", vec![0, 1])
}

fn write_jsonl(path: &Path, events: &[Event]) {
    let lines: Vec<String> = events.iter().map(|e| serde_json::to_string(e).unwrap()).collect();
    std::fs::write(path, lines.join("\n") + "\n").unwrap();
}

/// Input tree with one good process and one missing from the sample dictionary.
fn setup(root: &Path) -> PathBuf {
    let input = root.join("input");
    for proc in [PROCESS, "zz_unlisted"] {
        std::fs::create_dir_all(input.join(proc)).unwrap();
    }
    let empty = Event::new()
        .with_particles("ReconstructedParticles", vec![])
        .with_indices("Muon#0.index", vec![]);
    write_jsonl(&input.join(PROCESS).join("chunk0.jsonl"), &[selected(40.0), empty]);
    write_jsonl(&input.join(PROCESS).join("chunk1.jsonl"), &[selected(42.0)]);
    write_jsonl(&input.join("zz_unlisted").join("chunk0.jsonl"), &[selected(41.0)]);

    let dict = root.join("samplesDict.json");
    std::fs::write(
        &dict,
        format!(r#"{{"{PROCESS}": {{"crossSection": {XSEC}, "numberOfEvents": {GENERATED}}}}}"#),
    )
    .unwrap();

    let cfg = root.join("run.yaml");
    std::fs::write(
        &cfg,
        format!(
            "analysis: zmumu_afb\nprocess_list:\n  {PROCESS}: {{}}\n  zz_unlisted: {{}}\n\
             input_dir: {}\noutput_dir: {}\nsample_dict: {}\nworkers: 2\n",
            input.display(),
            root.join("out").display(),
            dict.display()
        ),
    )
    .unwrap();
    cfg
}

#[test]
fn run_then_reports() {
    let root = tmp_dir("run_reports");
    let cfg = setup(&root);
    let out_dir = root.join("out");
    let summary_path = root.join("summary.json");

    let out = run(&[
        "run",
        "--config",
        cfg.to_string_lossy().as_ref(),
        "--output",
        summary_path.to_string_lossy().as_ref(),
    ]);
    assert!(!out.status.success(), "a failed dataset must fail the run");

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
    let datasets = summary["datasets"].as_array().unwrap();
    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[0]["process"], PROCESS);
    assert_eq!(datasets[0]["ok"], true);
    assert_eq!(datasets[0]["partitions"], 2);
    assert_eq!(datasets[0]["events_processed"], 3);
    assert_eq!(datasets[1]["ok"], false);
    assert!(datasets[1]["error"].as_str().unwrap().contains("zz_unlisted"));

    assert!(out_dir.join(format!("{PROCESS}.json")).exists());
    assert!(!out_dir.join("zz_unlisted.json").exists());

    let artifact: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join(format!("{PROCESS}.json"))).unwrap())
            .unwrap();
    assert_eq!(artifact["weight_sum"], 3.0);
    assert_eq!(artifact["events_passed"], 2);
    assert!(artifact.get("scaled_to_lumi").is_none());

    let out_dir_s = out_dir.to_string_lossy().to_string();
    let lumi_factor = 44.84 * XSEC / GENERATED as f64;

    let y = stdout_json(&run(&["yields", "--output-dir", &out_dir_s, "--process", PROCESS]));
    let y0 = &y["yields"][0];
    assert_relative_eq!(y0["bare"].as_f64().unwrap(), 2.0);
    assert_relative_eq!(y0["normalized"].as_f64().unwrap(), 2.0 * lumi_factor, max_relative = 1e-12);

    let a = stdout_json(&run(&["acceptance", "--output-dir", &out_dir_s, "--process", PROCESS]));
    assert_relative_eq!(a["acceptance"].as_f64().unwrap(), 2.0 / 3.0, max_relative = 1e-12);
    assert_eq!(a["n_total"], 3.0);

    let f = stdout_json(&run(&["afb", "--output-dir", &out_dir_s, "--process", PROCESS]));
    assert_relative_eq!(f["counting"]["n_total"].as_f64().unwrap(), 2.0 * lumi_factor, max_relative = 1e-12);
    let g = stdout_json(&run(&[
        "afb",
        "--output-dir",
        &out_dir_s,
        "--process",
        PROCESS,
        "--histogram",
        "gen_cosThetac",
        "--rebin",
        "100",
    ]));
    assert_eq!(g["rebin"], 100);
    assert_relative_eq!(g["counting"]["n_total"].as_f64().unwrap(), 2.0 * lumi_factor, max_relative = 1e-12);
}

#[test]
fn scaled_run_and_overrides() {
    let root = tmp_dir("scaled");
    let cfg = setup(&root);
    let out_dir = root.join("scaled_out");

    let out = run(&[
        "run",
        "--config",
        cfg.to_string_lossy().as_ref(),
        "--process",
        PROCESS,
        "--output-dir",
        out_dir.to_string_lossy().as_ref(),
        "--scale",
        "--int-lumi",
        "44.84",
        "--workers",
        "1",
    ]);
    let summary = stdout_json(&out);
    assert_eq!(summary["datasets"].as_array().unwrap().len(), 1);

    let artifact: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join(format!("{PROCESS}.json"))).unwrap())
            .unwrap();
    let lumi_factor = 44.84 * XSEC / GENERATED as f64;
    assert_relative_eq!(artifact["scaled_to_lumi"].as_f64().unwrap(), 44.84);
    // Counters stay raw; histograms carry the scale.
    assert_eq!(artifact["weight_sum"], 3.0);
    let cut_flow = &artifact["histograms"]["cutFlow"]["bin_content"];
    assert_relative_eq!(cut_flow[0].as_f64().unwrap(), 3.0 * lumi_factor, max_relative = 1e-12);

    // Bare yields undo the applied scale.
    let y = stdout_json(&run(&[
        "yields",
        "--output-dir",
        out_dir.to_string_lossy().as_ref(),
        "--process",
        PROCESS,
    ]));
    assert_relative_eq!(y["yields"][0]["bare"].as_f64().unwrap(), 2.0, max_relative = 1e-12);
}

#[test]
fn bad_config_is_rejected() {
    let root = tmp_dir("bad_cfg");
    let cfg = root.join("run.yaml");
    std::fs::write(&cfg, "analysis: zmumu_xsec\nprocess_list: {}\ninput_dir: a\noutput_dir: b\nsample_dict: c\n")
        .unwrap();
    let out = run(&["run", "--config", cfg.to_string_lossy().as_ref()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("process_list is empty"));
}
