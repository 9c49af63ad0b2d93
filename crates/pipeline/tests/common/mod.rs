//! Shared scripted collaborators for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sdprompt_core::backoff::BackoffConfig;
use sdprompt_core::config::{EffectiveConfig, ImageFormat, ServiceConfig};
use sdprompt_core::remote::{
    CompletionRequest, GeneratedImage, ImageRequest, ImageService, RemoteError, RemoteErrorKind,
    SpecService,
};
use sdprompt_core::types::ImageIndex;
use sdprompt_pipeline::retry::Sleeper;
use sdprompt_pipeline::Orchestrator;

pub const VALID_SPEC: &str = r#"{
  "status": {"success": true, "errors": [], "warnings": []},
  "analysis": {
    "subject": {"primary": "lighthouse"},
    "style": {"primary": "oil painting"},
    "technical": {"composition": "rule of thirds", "lighting": "dusk", "color": "warm"},
    "mood": "calm"
  },
  "generation": {
    "prompt": "an oil painting of a lighthouse at dusk",
    "negative_prompt": "blurry, low quality",
    "parameters": {"width": 768, "height": 512, "cfg_scale": 7.0, "steps": 30, "seed": 1234}
  }
}"#;

/// Encode a small valid PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbaImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn transient() -> RemoteError {
    RemoteError::new(RemoteErrorKind::ServerError, "upstream overloaded").with_status(503)
}

pub fn permanent() -> RemoteError {
    RemoteError::new(RemoteErrorKind::InvalidParameters, "steps out of range").with_status(400)
}

// -- spec service --

/// Returns queued responses in order, repeating the last one.
pub struct ScriptedSpecService {
    responses: Mutex<Vec<Result<String, RemoteError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedSpecService {
    pub fn new(responses: Vec<Result<String, RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn valid() -> Arc<Self> {
        Self::new(vec![Ok(VALID_SPEC.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SpecService for ScriptedSpecService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses[0].clone()
        }
    }
}

// -- image service --

/// Renders a PNG for every request unless the request's index has queued
/// failures, which are returned first. Per-index delays let tests force a
/// completion order.
#[derive(Default)]
pub struct ScriptedImageService {
    failures: Mutex<HashMap<ImageIndex, Vec<RemoteError>>>,
    calls: AtomicUsize,
    calls_per_index: Mutex<HashMap<ImageIndex, usize>>,
    requests: Mutex<Vec<ImageRequest>>,
    completed: Mutex<Vec<ImageIndex>>,
    default_delay: Option<Duration>,
    delays: HashMap<ImageIndex, Duration>,
    panic_on: Option<ImageIndex>,
}

impl ScriptedImageService {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: Vec<(ImageIndex, Vec<RemoteError>)>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            default_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn scripted(
        failures: Vec<(ImageIndex, Vec<RemoteError>)>,
        delays: Vec<(ImageIndex, Duration)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into_iter().collect()),
            delays: delays.into_iter().collect(),
            ..Self::default()
        })
    }

    /// Panics while rendering `index`.
    pub fn panicking(index: ImageIndex) -> Arc<Self> {
        Arc::new(Self {
            panic_on: Some(index),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, index: ImageIndex) -> usize {
        self.calls_per_index
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Indices in the order their renders returned.
    pub fn completed(&self) -> Vec<ImageIndex> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ImageService for ScriptedImageService {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_per_index
            .lock()
            .unwrap()
            .entry(request.index)
            .or_default() += 1;
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delays.get(&request.index).or(self.default_delay.as_ref()) {
            tokio::time::sleep(*delay).await;
        }
        if self.panic_on == Some(request.index) {
            panic!("scripted panic rendering image {}", request.index);
        }

        let queued = {
            let mut failures = self.failures.lock().unwrap();
            failures
                .get_mut(&request.index)
                .filter(|q| !q.is_empty())
                .map(|q| q.remove(0))
        };
        self.completed.lock().unwrap().push(request.index);
        match queued {
            Some(err) => Err(err),
            None => Ok(GeneratedImage {
                bytes: png(4, 3),
                seed: request.seed.unwrap_or(u64::from(request.index) * 1000),
            }),
        }
    }
}

// -- sleeper --

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

// -- config --

pub fn config(output_dir: &Path) -> EffectiveConfig {
    let svc = |model: &str| ServiceConfig {
        api_key: "sk-test".into(),
        model: model.into(),
        base_url: "http://localhost".into(),
    };
    EffectiveConfig {
        anthropic: svc("claude-test"),
        stability: svc("sdxl-test"),
        output_dir: output_dir.to_path_buf(),
        format: ImageFormat::Png,
        count: 1,
        timeout: Duration::from_secs(5),
        retry_attempts: 3,
        parallel: false,
        max_workers: 4,
        continue_on_error: false,
        log_level: "info".into(),
        log_file: None,
    }
}

pub fn orchestrator(
    spec: Arc<ScriptedSpecService>,
    images: Arc<ScriptedImageService>,
    sleeper: Arc<RecordingSleeper>,
) -> Orchestrator {
    Orchestrator::with_sleeper(spec, images, sleeper, BackoffConfig::without_jitter())
}
