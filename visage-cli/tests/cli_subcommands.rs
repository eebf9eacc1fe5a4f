use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("visage_cli_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_gray_png(path: &PathBuf, width: u32, height: u32, value: u8) {
    let mut image = image::RgbImage::new(width, height);
    for px in image.pixels_mut() {
        *px = image::Rgb([value, value, value]);
    }
    image.save(path).expect("write png fixture");
}

fn assert_schema_version(value: &serde_json::Value) {
    assert_eq!(
        value.get("schema_version").and_then(|v| v.as_u64()),
        Some(1),
        "missing schema_version=1 field"
    );
}

#[test]
fn help_lists_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .arg("help")
        .output()
        .expect("run visage help");

    assert!(
        output.status.success(),
        "visage help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("restore"), "missing restore in help output");
    assert!(stdout.contains("inspect"), "missing inspect in help output");
    assert!(stdout.contains("probe"), "missing probe in help output");
}

#[test]
fn restore_help_lists_backend_and_order() {
    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args(["restore", "--help"])
        .output()
        .expect("run visage restore --help");

    assert!(
        output.status.success(),
        "restore --help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("--backend"),
        "missing --backend in restore help"
    );
    assert!(stdout.contains("--order"), "missing --order in restore help");
    assert!(stdout.contains("--model"), "missing --model in restore help");
    assert!(stdout.contains("--json"), "missing --json in restore help");
}

#[test]
fn probe_json_emits_schema_and_backend_fields() {
    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args(["probe", "--json"])
        .output()
        .expect("run visage probe --json");

    assert!(output.status.success(), "probe --json failed");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("\u{1b}["),
        "stderr should not include ANSI escapes when not a TTY: {stderr}"
    );

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("probe --json stdout is not JSON: {e}"));
    assert_schema_version(&value);
    assert_eq!(value.get("command").and_then(|v| v.as_str()), Some("probe"));
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert!(
        value.get("backend").and_then(|v| v.as_str()).is_some(),
        "missing backend field"
    );
}

#[test]
fn restore_identity_round_trips_gray_batch() {
    let dir = unique_temp_dir("restore_identity");
    let input_a = dir.join("face_a.png");
    let input_b = dir.join("face_b.png");
    let out_dir = dir.join("restored");
    write_gray_png(&input_a, 16, 16, 128);
    write_gray_png(&input_b, 16, 16, 128);

    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args([
            "restore",
            input_a.to_str().expect("utf8 input"),
            input_b.to_str().expect("utf8 input"),
            "--output",
            out_dir.to_str().expect("utf8 output"),
            "--backend",
            "identity",
            "--width",
            "16",
            "--height",
            "16",
        ])
        .output()
        .expect("run visage restore with identity backend");

    assert!(
        output.status.success(),
        "identity restore failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for stem in ["face_a", "face_b"] {
        let restored = out_dir.join(format!("{stem}_restored.png"));
        let image = image::open(&restored)
            .unwrap_or_else(|e| panic!("missing restored image {}: {e}", restored.display()))
            .to_rgb8();
        assert_eq!((image.width(), image.height()), (16, 16));
        assert!(
            image.pixels().all(|px| px.0 == [128, 128, 128]),
            "gray 128 must survive the identity round trip"
        );
    }
}

#[test]
fn restore_identity_resizes_to_plan_resolution() {
    let dir = unique_temp_dir("restore_resize");
    let input = dir.join("face.png");
    let out_dir = dir.join("restored");
    write_gray_png(&input, 40, 24, 90);

    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args([
            "restore",
            input.to_str().expect("utf8 input"),
            "--output",
            out_dir.to_str().expect("utf8 output"),
            "--backend",
            "identity",
            "--width",
            "16",
            "--height",
            "16",
            "--json",
        ])
        .output()
        .expect("run visage restore with resize");

    assert!(
        output.status.success(),
        "restore failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("restore --json stdout is not JSON: {e}"));
    assert_schema_version(&value);
    assert_eq!(
        value.get("command").and_then(|v| v.as_str()),
        Some("restore")
    );
    assert_eq!(value.get("width").and_then(|v| v.as_u64()), Some(16));
    assert_eq!(value.get("height").and_then(|v| v.as_u64()), Some(16));

    let restored = image::open(out_dir.join("face_restored.png"))
        .expect("restored image should exist")
        .to_rgb8();
    assert_eq!((restored.width(), restored.height()), (16, 16));
}

#[test]
fn restore_identity_bgr_order_preserves_colors() {
    let dir = unique_temp_dir("restore_bgr");
    let input = dir.join("orange.png");
    let out_dir = dir.join("restored");
    let mut image = image::RgbImage::new(8, 8);
    for px in image.pixels_mut() {
        *px = image::Rgb([240, 120, 20]);
    }
    image.save(&input).expect("write fixture");

    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args([
            "restore",
            input.to_str().expect("utf8 input"),
            "--output",
            out_dir.to_str().expect("utf8 output"),
            "--backend",
            "identity",
            "--order",
            "bgr",
            "--width",
            "8",
            "--height",
            "8",
        ])
        .output()
        .expect("run visage restore with bgr order");

    assert!(
        output.status.success(),
        "bgr restore failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let restored = image::open(out_dir.join("orange_restored.png"))
        .expect("restored image should exist")
        .to_rgb8();
    assert!(
        restored.pixels().all(|px| px.0 == [240, 120, 20]),
        "colors must come back unchanged regardless of marshalling order"
    );
}

#[test]
fn restore_json_mode_emits_structured_error_for_missing_input() {
    let dir = unique_temp_dir("restore_json_error");
    let missing = dir.join("missing.png");

    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args([
            "restore",
            missing.to_str().expect("utf8 input"),
            "--backend",
            "identity",
            "--json",
        ])
        .output()
        .expect("run visage restore --json with missing input");

    assert!(
        !output.status.success(),
        "restore should fail for a missing input file"
    );
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("restore error stdout is not JSON: {e}"));
    assert_schema_version(&value);
    assert_eq!(
        value.get("command").and_then(|v| v.as_str()),
        Some("restore")
    );
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert!(
        value.get("error").and_then(|v| v.as_str()).is_some(),
        "missing error field in restore json error payload"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("command failed"),
        "json mode should not emit the default error line on stderr: {stderr}"
    );
}

#[cfg(not(feature = "trt-runtime"))]
#[test]
fn inspect_without_runtime_reports_backend_unavailable() {
    let dir = unique_temp_dir("inspect_stub");
    let model = dir.join("model.engine");
    fs::write(&model, b"not a real plan").expect("write dummy engine");

    let output = Command::new(env!("CARGO_BIN_EXE_visage"))
        .args(["inspect", "--model", model.to_str().expect("utf8 model")])
        .output()
        .expect("run visage inspect without runtime");

    assert!(
        !output.status.success(),
        "inspect should fail in a stub build"
    );
    // Exit statuses are truncated to eight bits on Unix, so the 400
    // telemetry code surfaces as its category digit.
    assert_eq!(
        output.status.code(),
        Some(4),
        "stub inspect should exit with the availability category status"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("backend unavailable"),
        "unexpected stderr: {stderr}"
    );
}
