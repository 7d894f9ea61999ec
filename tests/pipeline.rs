//! End-to-end runs of the batch pipeline on a synthetic colour classifier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use batchr::cli::run_pipeline;
use batchr::config::{BatchrConfig, DecodeFailurePolicy, DevicePreference};
use batchr::error::{BatchrError, EXIT_ARTIFACT_FETCH};
use candle_core::{Device, Tensor};
use image::{Rgb, RgbImage};
use tempfile::TempDir;

/// Averages each channel, then picks the strongest one.
const GRAPH: &str = r#"{
    "name": "colours",
    "inputs": [{ "name": "data", "shape": [3, 8, 8] }],
    "nodes": [
        { "name": "gap", "op": "global_avg_pool", "inputs": ["data"] },
        { "name": "flat", "op": "flatten", "inputs": ["gap"] },
        { "name": "fc", "op": "linear", "inputs": ["flat"] },
        { "name": "prob", "op": "softmax", "inputs": ["fc"] }
    ],
    "outputs": ["prob"]
}"#;

const COLOURS: [(&str, [u8; 3]); 3] = [
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
];

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let models = root.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("graph.json"), GRAPH).unwrap();
        std::fs::write(models.join("synset.txt"), "red\ngreen\nblue\n").unwrap();

        let device = Device::Cpu;
        // identity: logit i is the mean of channel i, scaled down to keep softmax sane
        let weight = Tensor::from_slice(
            &[0.1f32, 0., 0., 0., 0.1, 0., 0., 0., 0.1],
            (3, 3),
            &device,
        )
        .unwrap();
        let bias = Tensor::zeros(3, candle_core::DType::F32, &device).unwrap();
        let tensors = HashMap::from([
            ("fc.weight".to_string(), weight),
            ("fc.bias".to_string(), bias),
        ]);
        candle_core::safetensors::save(&tensors, models.join("weights.safetensors")).unwrap();

        std::fs::create_dir_all(root.path().join("images")).unwrap();
        Self { root }
    }

    fn models(&self) -> PathBuf {
        self.root.path().join("models")
    }

    fn images(&self) -> PathBuf {
        self.root.path().join("images")
    }

    fn artifacts(&self) -> PathBuf {
        self.root.path().join("artifacts")
    }

    /// Write `n` solid images cycling red, green, blue; returns the expected labels.
    fn write_images(&self, n: usize) -> Vec<&'static str> {
        (0..n)
            .map(|i| {
                let (label, rgb) = COLOURS[i % COLOURS.len()];
                // sizes vary so the resize is exercised
                let img = RgbImage::from_pixel(16 + i as u32, 12, Rgb(rgb));
                img.save(self.images().join(format!("img{i:02}.jpg"))).unwrap();
                label
            })
            .collect()
    }

    fn config(&self, batch_size: usize) -> BatchrConfig {
        let mut config = BatchrConfig::default();
        config.artifacts.dir = self.artifacts();
        config.artifacts.graph_url = file_url(&self.models().join("graph.json"));
        config.artifacts.weights_url = self
            .models()
            .join("weights.safetensors")
            .to_string_lossy()
            .into_owned();
        config.artifacts.labels_url = file_url(&self.models().join("synset.txt"));
        config.inference.device = DevicePreference::Cpu;
        config.inference.batch_size = batch_size;
        config.inference.height = 8;
        config.inference.width = 8;
        config.input.dir = self.images();
        config
    }
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

#[tokio::test]
async fn test_full_batch_of_ten() {
    let fixture = Fixture::new();
    let expected = fixture.write_images(10);

    let predictions = run_pipeline(&fixture.config(10)).await.unwrap();

    assert_eq!(predictions.len(), 10);
    for (i, (prediction, label)) in predictions.iter().zip(&expected).enumerate() {
        assert_eq!(prediction.path, fixture.images().join(format!("img{i:02}.jpg")));
        let top = prediction.top().unwrap();
        assert_eq!(top.label, *label);
        assert!(top.score > 0.9, "{} scored {}", top.label, top.score);
    }
}

#[tokio::test]
async fn test_short_batch_decodes_only_real_images() {
    let fixture = Fixture::new();
    let expected = fixture.write_images(4);

    let predictions = run_pipeline(&fixture.config(10)).await.unwrap();

    let labels: Vec<_> = predictions
        .iter()
        .map(|p| p.top().unwrap().label.as_str())
        .collect();
    assert_eq!(labels, expected);
}

#[tokio::test]
async fn test_more_images_than_batch() {
    let fixture = Fixture::new();
    fixture.write_images(7);

    let predictions = run_pipeline(&fixture.config(5)).await.unwrap();
    assert_eq!(predictions.len(), 5);
    assert_eq!(predictions[4].path, fixture.images().join("img04.jpg"));
}

#[tokio::test]
async fn test_top_k_reports_every_class() {
    let fixture = Fixture::new();
    fixture.write_images(1);
    let mut config = fixture.config(2);
    config.output.top_k = 3;

    let predictions = run_pipeline(&config).await.unwrap();
    let classes: Vec<_> = predictions[0]
        .classes
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(classes[0], "red");
    assert_eq!(classes.len(), 3);
}

#[tokio::test]
async fn test_corrupt_image_policies() {
    let fixture = Fixture::new();
    fixture.write_images(3);
    std::fs::write(fixture.images().join("img00b.jpg"), b"not a jpeg").unwrap();

    let err = run_pipeline(&fixture.config(10)).await.unwrap_err();
    assert!(matches!(err, BatchrError::ImageDecode { .. }));

    let mut config = fixture.config(10);
    config.input.on_decode_error = DecodeFailurePolicy::Skip;
    let predictions = run_pipeline(&config).await.unwrap();
    assert_eq!(predictions.len(), 3);
}

#[tokio::test]
async fn test_artifacts_are_reused() {
    let fixture = Fixture::new();
    fixture.write_images(2);
    let config = fixture.config(2);

    run_pipeline(&config).await.unwrap();
    // the sources are gone; a second run must not need them
    std::fs::remove_dir_all(fixture.models()).unwrap();
    let predictions = run_pipeline(&config).await.unwrap();

    assert_eq!(predictions.len(), 2);
    assert!(fixture.artifacts().join("graph.json").is_file());
    assert!(fixture.artifacts().join("weights.safetensors").is_file());
}

#[tokio::test]
async fn test_missing_artifact_exit_code() {
    let fixture = Fixture::new();
    fixture.write_images(1);
    let mut config = fixture.config(1);
    config.artifacts.labels_url = file_url(&fixture.models().join("missing.txt"));

    let err = run_pipeline(&config).await.unwrap_err();
    assert!(matches!(err, BatchrError::ArtifactFetch { .. }));
    assert_eq!(err.exit_code(), EXIT_ARTIFACT_FETCH);
}

#[tokio::test]
async fn test_empty_directory_yields_nothing() {
    let fixture = Fixture::new();
    let predictions = run_pipeline(&fixture.config(4)).await.unwrap();
    assert!(predictions.is_empty());
}

#[tokio::test]
async fn test_operator_trace_written() {
    let fixture = Fixture::new();
    fixture.write_images(2);
    let trace = fixture.root.path().join("trace.json");
    let mut config = fixture.config(2);
    config.profiling.operators = true;
    config.profiling.trace_output = Some(trace.clone());

    let predictions = run_pipeline(&config).await.unwrap();
    assert_eq!(predictions.len(), 2);

    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(trace).unwrap()).unwrap();
    let names: Vec<_> = doc["traceEvents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["gap", "flat", "fc", "prob"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_runs_as_spawned_task() {
    let fixture = Fixture::new();
    let expected = fixture.write_images(3);
    let config = fixture.config(3);

    let predictions = tokio::spawn(async move { run_pipeline(&config).await })
        .await
        .unwrap()
        .unwrap();

    let labels: Vec<_> = predictions
        .iter()
        .map(|p| p.top().unwrap().label.as_str())
        .collect();
    assert_eq!(labels, expected);
}
