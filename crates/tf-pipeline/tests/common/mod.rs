//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tf_convert::{BytesSource, Converter, Invocation, TextureSource};
use tf_core::config::Config;
use tf_core::TextureCategory;
use tf_pipeline::{ConversionTask, Pipeline, PollOutcome};

/// In-process stand-in for texconv: copies every staged input to the
/// converter's output path after an optional delay.
#[derive(Debug, Default)]
pub struct FakeConverter {
    pub unavailable: bool,
    pub delay: Duration,
    pub fail_with: Option<String>,
    invocations: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeConverter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn missing() -> Arc<Self> {
        Arc::new(Self {
            unavailable: true,
            ..Default::default()
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Most invocations ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for FakeConverter {
    fn name(&self) -> &str {
        "fake-texconv"
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn run(&self, invocation: &Invocation) -> tf_core::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = match &self.fail_with {
            Some(message) => Err(tf_core::Error::invocation("fake-texconv", message.clone())),
            None => invocation.inputs.iter().try_for_each(|input| {
                std::fs::copy(input, invocation.output_for(input))?;
                Ok::<(), tf_core::Error>(())
            }),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A source that cannot be written.
#[derive(Debug)]
pub struct BrokenSource;

impl TextureSource for BrokenSource {
    fn name(&self) -> &str {
        "broken"
    }

    fn save(&self, _path: &Path) -> tf_core::Result<()> {
        Err(tf_core::Error::stage("broken", "pixel data unavailable"))
    }
}

/// Small, fast settings for tests.
pub fn test_config(batch_size: usize, workers: usize) -> Config {
    let mut config = Config::default();
    config.pipeline.batch_size = batch_size;
    config.pipeline.batch_timeout_ms = 50;
    config.pipeline.max_workers = Some(workers);
    config.pipeline.dequeue_timeout_ms = 20;
    config
}

pub fn pipeline(config: Config, converter: Arc<FakeConverter>) -> Pipeline {
    Pipeline::with_converter(config, converter).unwrap()
}

pub fn task(dir: &Path, name: &str) -> ConversionTask {
    task_at(dir.join(format!("{name}.a.rtex.dds")), name)
}

pub fn task_at(output: PathBuf, name: &str) -> ConversionTask {
    ConversionTask::new(
        Arc::new(BytesSource::new(name, name.as_bytes().to_vec())),
        output,
        TextureCategory::BaseColor,
    )
}

pub fn tasks(dir: &Path, n: usize) -> Vec<ConversionTask> {
    (0..n).map(|i| task(dir, &format!("tex{i:02}"))).collect()
}

/// Poll jobs until none are active or `timeout` elapses. Returns the
/// accumulated outcome of every poll.
pub fn poll_until_idle(pipeline: &Pipeline, timeout: Duration) -> PollOutcome {
    let deadline = Instant::now() + timeout;
    let mut total = PollOutcome::default();
    loop {
        let outcome = pipeline.poll_jobs();
        total.delivered += outcome.delivered;
        total.finished += outcome.finished;
        total.active = outcome.active;
        if outcome.is_idle() || Instant::now() >= deadline {
            return total;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
