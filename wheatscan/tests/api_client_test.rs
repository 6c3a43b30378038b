use httpmock::prelude::*;
use image::{Rgba, RgbaImage};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wheatscan::api::DetectionClient;
use wheatscan::config::{BaseConfig, DetectConfig, RenderConfig};
use wheatscan::detection::Sensitivity;
use wheatscan::overlay::Region;
use wheatscan::processing::run_detection;

fn detect_body() -> serde_json::Value {
    json!({
        "filename": "good.png",
        "detections": [
            {"box": [4.0, 4.0, 20.0, 20.0], "score": 0.9, "class_id": 0, "label": "Wheat"},
            {"box": [24.0, 4.0, 40.0, 20.0], "score": 0.4},
            {"box": [44.0, 4.0, 60.0, 20.0], "score": 0.2}
        ],
        "count": 3,
        "estimated_yield": 175.0,
        "health_index": 81.0,
        "calculation_steps": {
            "yield": {"area_scale": 1111.1, "avg_grain_weight": 35.0, "photo_area": 0.6},
            "health": {"avg_confidence": 50.0, "texture_score": 95.0, "result": 68.0}
        },
        "inference_time": 250.5
    })
}

fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(64, 32, Rgba([120, 100, 40, 255]))
        .save(&path)
        .unwrap();
    path
}

fn client(server: &MockServer) -> DetectionClient {
    DetectionClient::new(&server.base_url(), Duration::from_secs(5)).unwrap()
}

#[test]
fn test_detect_file_posts_multipart_and_parses() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/detect")
            .body_contains("name=\"file\"")
            .body_contains("good.png");
        then.status(200).json_body(detect_body());
    });

    let temp = TempDir::new().unwrap();
    let image = write_png(temp.path(), "good.png");
    let response = client(&server).detect_file(&image).unwrap();

    mock.assert();
    assert_eq!(response.detections.len(), 3);
    assert_eq!(response.server.count, 3);
    assert_eq!(response.inference_time, Some(250.5));
    let steps = response.server.calculation_steps.yield_steps.unwrap();
    assert_eq!(steps.area_scale, Some(1111.1));
}

#[test]
fn test_server_error_is_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/detect");
        then.status(500).body("model crashed");
    });

    let temp = TempDir::new().unwrap();
    let image = write_png(temp.path(), "plot.png");
    let err = client(&server).detect_file(&image).unwrap_err();
    assert!(err.to_string().contains("500"), "unexpected error: {err}");
}

#[test]
fn test_non_image_is_rejected_before_upload() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/detect");
        then.status(200).json_body(detect_body());
    });

    let temp = TempDir::new().unwrap();
    let notes = temp.path().join("notes.txt");
    std::fs::write(&notes, "not an image").unwrap();
    assert!(client(&server).detect_file(&notes).is_err());
    mock.assert_hits(0);
}

#[test]
fn test_unreachable_service_is_an_error() {
    let client = DetectionClient::new("http://127.0.0.1:1/", Duration::from_secs(2)).unwrap();
    assert_eq!(client.base_url(), "http://127.0.0.1:1");
    assert!(client.status().is_err());
}

#[test]
fn test_status_endpoint() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/status");
        then.status(200).json_body(json!({
            "status": "ok",
            "model": "yolo11x.onnx",
            "input_shape": [1, 3, 1024, 1024]
        }));
    });

    let status = client(&server).status().unwrap();
    assert_eq!(status.status, "ok");
    assert_eq!(status.model.as_deref(), Some("yolo11x.onnx"));
    assert_eq!(status.input_shape.unwrap().len(), 4);
}

fn detect_config(server: &MockServer, sources: Vec<String>, out: &Path) -> DetectConfig {
    DetectConfig {
        base: BaseConfig {
            sources,
            output_dir: Some(out.to_string_lossy().to_string()),
            skip_metadata: false,
            strict: true,
        },
        server: server.base_url(),
        timeout_secs: 5,
        render: RenderConfig {
            sensitivity: Sensitivity::new(50.0),
            region: Region::new(128, 128),
            overlay: true,
            report: false,
            save_as: None,
            font: None,
            sweep_step: None,
        },
    }
}

#[test]
fn test_batch_continues_past_failed_image() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/detect").body_contains("good.png");
        then.status(200).json_body(detect_body());
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/detect").body_contains("bad.png");
        then.status(503);
    });

    let temp = TempDir::new().unwrap();
    let good = write_png(temp.path(), "good.png");
    let bad = write_png(temp.path(), "bad.png");
    let out = temp.path().join("out");

    let config = detect_config(
        &server,
        vec![
            good.to_string_lossy().to_string(),
            bad.to_string_lossy().to_string(),
        ],
        &out,
    );
    assert_eq!(run_detection(config).unwrap(), 1);

    assert!(out.join("good.png").exists());
    assert!(!out.join("bad.png").exists());
    let metadata = std::fs::read_to_string(out.join("good.wheatscan.toml")).unwrap();
    assert!(metadata.contains("filtered_count = 1"));
    assert!(metadata.contains("original_count = 3"));
}

#[test]
fn test_batch_fails_when_every_image_fails() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/detect");
        then.status(500);
    });

    let temp = TempDir::new().unwrap();
    let image = write_png(temp.path(), "plot.png");
    let config = detect_config(
        &server,
        vec![image.to_string_lossy().to_string()],
        &temp.path().join("out"),
    );
    assert!(run_detection(config).is_err());
}

#[test]
fn test_batch_save_as_writes_one_report_per_image() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/detect");
        then.status(200).json_body(detect_body());
    });

    let temp = TempDir::new().unwrap();
    let plots = temp.path().join("plots");
    std::fs::create_dir(&plots).unwrap();
    write_png(&plots, "north.png");
    write_png(&plots, "south.png");
    let out = temp.path().join("out");
    let chosen = temp.path().join("reports").join("chosen.png");

    let mut config = detect_config(&server, vec![plots.to_string_lossy().to_string()], &out);
    config.render.report = true;
    config.render.save_as = Some(chosen.clone());
    assert_eq!(run_detection(config).unwrap(), 2);

    let mut written: Vec<String> = std::fs::read_dir(temp.path().join("reports"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    written.sort();
    assert_eq!(written, vec!["chosen_north.png", "chosen_south.png"]);
    assert!(!chosen.exists());

    let metadata = std::fs::read_to_string(out.join("north.wheatscan.toml")).unwrap();
    assert!(metadata.contains("source_type = \"directory\""));
    assert!(metadata.contains("chosen_north.png"));
}
