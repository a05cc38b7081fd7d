use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use spikeview_lib::io::npy;
use std::{error::Error, fs, path::Path};
use tempfile::{tempdir, TempDir};

const CHANNELS: usize = 4;
const TIMEPOINTS: usize = 3000;

fn sample(ch: usize, t: usize) -> i16 {
    (ch as i16) * 1000 + (t % 500) as i16 - 250
}

fn fixture() -> Result<TempDir, Box<dyn Error>> {
    let dir = tempdir()?;
    let data: Vec<i16> = (0..CHANNELS * TIMEPOINTS)
        .map(|i| sample(i / TIMEPOINTS, i % TIMEPOINTS))
        .collect();
    npy::write_i16(&dir.path().join("rec_data.npy"), (CHANNELS, TIMEPOINTS), &data)?;
    fs::create_dir_all(dir.path().join("labels"))?;
    fs::write(dir.path().join("labels").join("rec_labels.json"), "[900, 100, 500]")?;
    Ok(dir)
}

fn run_ok(dir: &Path, args: &[&str]) -> Result<Value, Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("spikeview");
    cmd.env_remove("RUST_LOG")
        .env_remove("SPIKEVIEW_CONFIG")
        .arg("--datasets-dir")
        .arg(dir)
        .args(args);
    let output = cmd.assert().success().get_output().stdout.clone();
    Ok(serde_json::from_slice(&output)?)
}

fn run_err(dir: &Path, args: &[&str]) -> Result<Value, Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("spikeview");
    cmd.env_remove("RUST_LOG")
        .env_remove("SPIKEVIEW_CONFIG")
        .arg("--datasets-dir")
        .arg(dir)
        .args(args);
    let output = cmd.assert().failure().get_output().stderr.clone();
    let text = String::from_utf8(output)?;
    let line = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    Ok(serde_json::from_str(line)?)
}

#[test]
fn datasets_lists_scanned_recordings() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let listed = run_ok(dir.path(), &["datasets"])?;
    let rows = listed.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "rec_data.npy");
    assert_eq!(rows[0]["has_labels"], false);
    Ok(())
}

#[test]
fn raw_window_matches_stored_samples() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let out = run_ok(
        dir.path(),
        &[
            "window", "--dataset", "rec_data.npy", "--channels", "1,3", "--start", "10",
            "--end", "20",
        ],
    )?;
    let raw: Vec<i64> = out["1"]["raw"]
        .as_array()
        .expect("raw")
        .iter()
        .map(|v| v.as_i64().expect("int"))
        .collect();
    let expected: Vec<i64> = (10..20).map(|t| i64::from(sample(1, t))).collect();
    assert_eq!(raw, expected);
    assert_eq!(out["3"]["start"], 10);
    assert_eq!(out["3"]["degraded"], false);
    Ok(())
}

#[test]
fn short_filtered_window_is_degraded() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let out = run_ok(
        dir.path(),
        &[
            "window", "--dataset", "rec_data.npy", "--channels", "0", "--start", "100",
            "--end", "150", "--filter", "highpass",
        ],
    )?;
    assert_eq!(out["0"]["degraded"], true);
    assert!(out["0"]["filtered"].is_null());
    Ok(())
}

#[test]
fn auto_mapping_enables_navigation() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let err = run_err(
        dir.path(),
        &["navigate", "--dataset", "rec_data.npy", "--channels", "2", "--from", "0"],
    )?;
    assert_eq!(err["kind"], "no_spikes_available");

    let found = run_ok(dir.path(), &["labels", "auto"])?;
    assert_eq!(found["rec_data.npy"], "rec_labels.json");

    let next = run_ok(
        dir.path(),
        &["navigate", "--dataset", "rec_data.npy", "--channels", "2", "--from", "900"],
    )?;
    assert_eq!(next["sample_index"], 100);
    assert_eq!(next["total_spikes"], 3);

    let prev = run_ok(
        dir.path(),
        &[
            "navigate", "--dataset", "rec_data.npy", "--channels", "2", "--from", "100",
            "--direction", "prev",
        ],
    )?;
    assert_eq!(prev["sample_index"], 900);

    let removed = run_ok(dir.path(), &["labels", "remove", "--dataset", "rec_data.npy"])?;
    assert!(removed.as_object().expect("object").is_empty());
    Ok(())
}

#[test]
fn invalid_channel_reports_structured_error() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let err = run_err(
        dir.path(),
        &["window", "--dataset", "rec_data.npy", "--channels", "0,9"],
    )?;
    assert_eq!(err["kind"], "out_of_range");
    assert!(err["message"].as_str().expect("message").contains("channel 9"));

    let err = run_err(dir.path(), &["info", "--dataset", "missing.npy"])?;
    assert_eq!(err["kind"], "not_found");
    Ok(())
}

#[test]
fn convert_switches_to_memory_mapped_backend() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let before = run_ok(dir.path(), &["info", "--dataset", "rec_data.npy"])?;
    assert_eq!(before["backend"], "fully_loaded");

    let input = dir.path().join("rec_data.npy");
    run_ok(dir.path(), &["convert", "--input", input.to_str().expect("utf8 path")])?;
    assert!(dir.path().join("rec_data_mmap.npy").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("rec_data_shape.txt"))?,
        "4,3000"
    );

    let after = run_ok(dir.path(), &["info", "--dataset", "rec_data.npy"])?;
    assert_eq!(after["backend"], "memory_mapped");
    assert_eq!(after["channels"], 4);
    assert_eq!(after["timepoints"], 3000);
    Ok(())
}

#[test]
fn window_exports_csv_rows() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let csv_path = dir.path().join("out.csv");
    let out = run_ok(
        dir.path(),
        &[
            "window",
            "--dataset",
            "rec_data.npy",
            "--channels",
            "0,1",
            "--start",
            "1000",
            "--end",
            "1400",
            "--filter",
            "bandpass",
            "--detect",
            "threshold",
            "--threshold",
            "-100",
            "--csv",
            csv_path.to_str().expect("utf8 path"),
        ],
    )?;
    assert_eq!(out["rows"], 800);
    let text = fs::read_to_string(&csv_path)?;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("channel,sample,raw,filtered,spike"));
    assert_eq!(lines.count(), 800);
    Ok(())
}

#[test]
fn preview_returns_centered_waveform() -> Result<(), Box<dyn Error>> {
    let dir = fixture()?;
    let out = run_ok(
        dir.path(),
        &[
            "preview", "--dataset", "rec_data.npy", "--channel", "2", "--spike-time", "1500",
            "--half-window", "20",
        ],
    )?;
    assert_eq!(out["samples"].as_array().expect("samples").len(), 41);
    assert_eq!(out["start"], 1480);
    assert_eq!(out["degraded"], false);
    Ok(())
}
