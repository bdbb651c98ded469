// 该文件是 Biaozhu （标注） 项目的一部分。
// tests/pipeline.rs - 检测与标注流程的端到端测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use flate2::{Compression, write::GzEncoder};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{arr1, arr2, arr3};
use tempfile::TempDir;
use url::Url;

use biaozhu::FromUrl;
use biaozhu::config::AppConfig;
use biaozhu::frame::ImageTensor;
use biaozhu::model::{LoadModel, Model, ModelError, RawDetections};
use biaozhu::output::{BoxRenderer, Draw, PixelBox};
use biaozhu::pipeline::{InferenceOutcome, Pipeline, PipelineError};
use biaozhu::provision::{Fetch, ModelArchive, ProvisionError};

const MODEL_FILE: &str = "ssd_test/model.onnx";

const LABEL_MAP: &str = r#"
item {
  name: "/m/01g317"
  id: 1
  display_name: "person"
}
item {
  name: "/m/0k4j"
  id: 3
  display_name: "car"
}
"#;

struct ArchiveFetcher {
  calls: Arc<AtomicUsize>,
  payload: Vec<u8>,
}

impl Fetch for ArchiveFetcher {
  fn fetch(&self, _url: &Url, dest: &mut dyn Write) -> Result<u64, ProvisionError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    dest.write_all(&self.payload)?;
    Ok(self.payload.len() as u64)
  }
}

struct UnreachableFetcher;

impl Fetch for UnreachableFetcher {
  fn fetch(&self, _url: &Url, _dest: &mut dyn Write) -> Result<u64, ProvisionError> {
    Err(ProvisionError::Io(io::Error::new(
      io::ErrorKind::ConnectionRefused,
      "connection refused",
    )))
  }
}

struct FixedModel {
  detections: RawDetections,
  delay: Duration,
}

impl Model for FixedModel {
  type Input = ImageTensor;
  type Output = RawDetections;
  type Error = ModelError;

  fn infer(&self, input: &ImageTensor) -> Result<RawDetections, ModelError> {
    assert_eq!(input.shape(), &[1, 480, 640, 3]);
    thread::sleep(self.delay);
    Ok(self.detections.clone())
  }
}

#[derive(Default)]
struct FakeLoader {
  loads: Arc<AtomicUsize>,
  fail: bool,
  delay: Duration,
}

impl LoadModel for FakeLoader {
  type Model = FixedModel;

  fn load(&self, model_path: &Path) -> Result<FixedModel, ModelError> {
    assert!(model_path.is_file());
    self.loads.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(ModelError::MissingOutput("detection_boxes:0".to_string()));
    }
    Ok(FixedModel {
      detections: detections(),
      delay: self.delay,
    })
  }
}

/// 一个高分 person、一个低分 person、一个不在类别表中的类别
fn detections() -> RawDetections {
  RawDetections::new(
    arr3(&[[
      [0.1, 0.2, 0.8, 0.9],
      [0.3, 0.3, 0.6, 0.6],
      [0.2, 0.2, 0.4, 0.4],
    ]]),
    arr2(&[[0.95, 0.3, 0.9]]),
    arr2(&[[1.0, 1.0, 42.0]]),
    arr1(&[3.0]),
  )
  .unwrap()
}

fn archive_bytes() -> Vec<u8> {
  let encoder = GzEncoder::new(Vec::new(), Compression::default());
  let mut builder = tar::Builder::new(encoder);
  let data = b"fake onnx graph";
  let mut header = tar::Header::new_gnu();
  header.set_size(data.len() as u64);
  header.set_mode(0o644);
  header.set_cksum();
  builder
    .append_data(&mut header, MODEL_FILE, &data[..])
    .unwrap();
  builder.into_inner().unwrap().finish().unwrap()
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
  bytes
}

fn jpeg_640x480() -> Vec<u8> {
  encode(&RgbImage::from_pixel(640, 480, Rgb([30, 30, 30])), ImageFormat::Jpeg)
}

struct Fixture {
  dir: TempDir,
  config: AppConfig,
  fetches: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
  let dir = tempfile::tempdir().unwrap();
  std::fs::write(dir.path().join("mscoco_label_map.pbtxt"), LABEL_MAP).unwrap();

  let mut config = AppConfig::default();
  config.workspace.work_dir = dir.path().to_path_buf();
  config.model.model_file = MODEL_FILE.into();
  config.render.font = None;

  Fixture {
    dir,
    config,
    fetches: Arc::new(AtomicUsize::new(0)),
  }
}

fn archive() -> ModelArchive {
  let url = Url::parse("https://models.example.com/detection/ssd_test.tar.gz").unwrap();
  ModelArchive::from_url(&url).unwrap().model_file(MODEL_FILE)
}

fn pipeline(fixture: &Fixture, loader: FakeLoader) -> Pipeline<FakeLoader, ArchiveFetcher> {
  let fetcher = ArchiveFetcher {
    calls: fixture.fetches.clone(),
    payload: archive_bytes(),
  };
  let renderer = BoxRenderer::new(fixture.config.render.min_score, Draw::default());
  Pipeline::new(fixture.config.clone(), archive(), fetcher, loader, renderer)
}

#[test]
fn upload_is_annotated_end_to_end() {
  let fixture = fixture();
  let pipeline = pipeline(&fixture, FakeLoader::default());

  let outcome = pipeline.process_upload(&jpeg_640x480(), "street.jpg").unwrap();

  let InferenceOutcome::Detections(annotations) = &outcome.inference else {
    panic!("expected detections, got {:?}", outcome.inference);
  };
  assert_eq!(annotations.len(), 1);
  assert_eq!(annotations[0].label, "person : 95%");
  assert_eq!(
    annotations[0].rect,
    PixelBox {
      x_min: 128,
      y_min: 48,
      x_max: 576,
      y_max: 384,
    }
  );

  assert!(outcome.output_name.ends_with("CONVERTED.jpg"));
  assert_eq!(
    outcome.output_path.parent(),
    Some(fixture.dir.path().join("images").as_path())
  );
  let annotated = image::open(&outcome.output_path).unwrap();
  assert_eq!((annotated.width(), annotated.height()), (640, 480));
  assert!(fixture.dir.path().join(MODEL_FILE).is_file());
}

#[test]
fn repeated_processing_reuses_model_and_archive() {
  let fixture = fixture();
  let loader = FakeLoader::default();
  let loads = loader.loads.clone();
  let pipeline = pipeline(&fixture, loader);

  let input = fixture.dir.path().join("frame.jpg");
  std::fs::write(&input, jpeg_640x480()).unwrap();

  let first = pipeline.process_image(&input).unwrap();
  let second = pipeline.process_image(&input).unwrap();

  assert_eq!(first.inference, second.inference);
  assert_eq!(first.output_name, "frameCONVERTED.jpg");
  assert_eq!(first.output_path, second.output_path);
  assert_eq!(loads.load(Ordering::SeqCst), 1);
  assert_eq!(fixture.fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn uploads_get_distinct_names() {
  let fixture = fixture();
  let pipeline = pipeline(&fixture, FakeLoader::default());
  let jpeg = jpeg_640x480();

  let first = pipeline.process_upload(&jpeg, "a.jpg").unwrap();
  let second = pipeline.process_upload(&jpeg, "a.jpg").unwrap();
  assert_ne!(first.output_name, second.output_name);
}

#[test]
fn jpeg_upload_with_foreign_name_is_annotated_as_jpeg() {
  let fixture = fixture();
  let pipeline = pipeline(&fixture, FakeLoader::default());

  for name in ["scan.txt", "photo.webp", "noextension"] {
    let outcome = pipeline.process_upload(&jpeg_640x480(), name).unwrap();
    assert!(matches!(outcome.inference, InferenceOutcome::Detections(_)));
    assert!(outcome.output_name.ends_with("CONVERTED.jpg"));

    let written = std::fs::read(&outcome.output_path).unwrap();
    assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Jpeg);
  }
}

#[test]
fn input_without_extension_still_gets_output() {
  let fixture = fixture();
  let pipeline = pipeline(&fixture, FakeLoader::default());

  let input = fixture.dir.path().join("frame");
  std::fs::write(&input, jpeg_640x480()).unwrap();

  let outcome = pipeline.process_image(&input).unwrap();
  assert_eq!(outcome.output_name, "frameCONVERTED");
  assert!(matches!(outcome.inference, InferenceOutcome::Detections(_)));
  let written = std::fs::read(&outcome.output_path).unwrap();
  assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Jpeg);
}

#[test]
fn non_jpeg_upload_is_rejected_before_any_write() {
  let fixture = fixture();
  let pipeline = pipeline(&fixture, FakeLoader::default());
  let png = encode(&RgbImage::new(64, 64), ImageFormat::Png);

  let result = pipeline.process_upload(&png, "fake.jpg");
  assert!(matches!(result, Err(PipelineError::InvalidInput)));
  assert_eq!(
    result.unwrap_err().to_string(),
    "Invalid image file"
  );

  assert!(!fixture.dir.path().join("images").exists());
  assert_eq!(fixture.fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn inference_failure_produces_no_output() {
  let fixture = fixture();
  let loader = FakeLoader {
    fail: true,
    ..FakeLoader::default()
  };
  let loads = loader.loads.clone();
  let pipeline = pipeline(&fixture, loader);

  let outcome = pipeline.process_upload(&jpeg_640x480(), "a.jpg").unwrap();
  assert!(matches!(outcome.inference, InferenceOutcome::Unavailable(_)));
  assert!(!outcome.output_path.exists());

  // 加载失败不缓存，下次请求重新加载
  pipeline.process_upload(&jpeg_640x480(), "b.jpg").unwrap();
  assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn slow_inference_times_out() {
  let mut fixture = fixture();
  fixture.config.model.inference_timeout_secs = 1;
  let loader = FakeLoader {
    delay: Duration::from_secs(3),
    ..FakeLoader::default()
  };
  let loads = loader.loads.clone();
  let pipeline = pipeline(&fixture, loader);

  let outcome = pipeline.process_upload(&jpeg_640x480(), "a.jpg").unwrap();
  let InferenceOutcome::Unavailable(reason) = outcome.inference else {
    panic!("expected timeout");
  };
  assert!(reason.contains("超时"));
  assert!(!outcome.output_path.exists());

  // 超时的模型不再复用，下次请求重新加载
  pipeline.process_upload(&jpeg_640x480(), "b.jpg").unwrap();
  assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn provisioning_failure_fails_the_request() {
  let fixture = fixture();
  let renderer = BoxRenderer::new(0.6, Draw::default());
  let pipeline = Pipeline::new(
    fixture.config.clone(),
    archive(),
    UnreachableFetcher,
    FakeLoader::default(),
    renderer,
  );

  let result = pipeline.process_upload(&jpeg_640x480(), "a.jpg");
  assert!(matches!(result, Err(PipelineError::Provision(_))));
  assert!(!fixture.dir.path().join(MODEL_FILE).exists());
}

#[test]
fn missing_catalog_fails_the_request() {
  let mut fixture = fixture();
  fixture.config.catalog.path = "missing_label_map.pbtxt".into();
  let pipeline = pipeline(&fixture, FakeLoader::default());

  let result = pipeline.process_upload(&jpeg_640x480(), "a.jpg");
  assert!(matches!(result, Err(PipelineError::Catalog(_))));
}
