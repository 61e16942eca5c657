use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::Geometry;
use crate::ops::KernelPath;

/// Phase of a correlation call covered by one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStage {
    Pad,
    Forward,
    GradFirstInput,
    GradSecondInput,
}

/// Wall time of one stage, with the geometry it ran over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: CorrelationStage,
    pub duration_ms: f64,
    pub timestamp_ms: u128,
    pub input: [usize; 4],
    pub padded: [usize; 4],
    pub output: [usize; 4],
    pub kernel_size: usize,
    pub max_displacement: usize,
    pub stride_1: usize,
    pub stride_2: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<KernelPath>,
}

impl StageEvent {
    fn start(stage: CorrelationStage, geometry: &Geometry) -> Self {
        Self {
            stage,
            duration_ms: 0.0,
            timestamp_ms: current_timestamp_ms(),
            input: geometry.input_shape(),
            padded: geometry.padded_shape(),
            output: geometry.output_shape(),
            kernel_size: geometry.kernel_size,
            max_displacement: geometry.max_displacement,
            stride_1: geometry.stride_1,
            stride_2: geometry.stride_2,
            path: None,
        }
    }
}

/// Destination for stage events. Runs on the recorder's worker thread.
pub trait TelemetrySink: Send + 'static {
    fn record(&mut self, event: &StageEvent) -> Result<()>;
}

/// Appends events as JSON lines.
#[derive(Debug)]
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl TelemetrySink for JsonlSink {
    fn record(&mut self, event: &StageEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Hands stage events to a sink owned by a background thread.
///
/// Dropping the recorder closes the channel and waits until every queued
/// event has reached the sink.
pub struct TelemetryRecorder {
    sender: Option<Sender<StageEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryRecorder {
    pub fn new<S: TelemetrySink>(mut sink: S) -> Self {
        let (sender, receiver) = mpsc::channel::<StageEvent>();
        let worker = thread::spawn(move || {
            for event in receiver {
                if let Err(err) = sink.record(&event) {
                    warn!("telemetry sink dropped {:?} event: {err:?}", event.stage);
                }
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Starts a span for `stage`; the event is emitted when the timer drops.
    pub fn stage(&self, stage: CorrelationStage, geometry: &Geometry) -> StageTimer<'_> {
        StageTimer {
            recorder: self,
            event: StageEvent::start(stage, geometry),
            start: Instant::now(),
        }
    }

    fn send(&self, event: StageEvent) {
        let delivered = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(event).is_ok());
        if !delivered {
            warn!("telemetry worker gone, {:?} event lost", event.stage);
        }
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.join() {
                warn!("telemetry worker join failed: {err:?}");
            }
        }
    }
}

pub struct StageTimer<'a> {
    recorder: &'a TelemetryRecorder,
    event: StageEvent,
    start: Instant,
}

impl StageTimer<'_> {
    pub fn with_path(mut self, path: KernelPath) -> Self {
        self.event.path = Some(path);
        self
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        let mut event = self.event;
        event.duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.recorder.send(event);
    }
}

/// Opens a span only when a recorder is attached.
pub(crate) fn span<'a>(
    recorder: Option<&'a TelemetryRecorder>,
    stage: CorrelationStage,
    geometry: &Geometry,
) -> Option<StageTimer<'a>> {
    recorder.map(|recorder| recorder.stage(stage, geometry))
}

pub fn jsonl_recorder_from_env(var: &str) -> Result<Option<TelemetryRecorder>> {
    let path = match std::env::var_os(var) {
        Some(value) => PathBuf::from(value),
        None => return Ok(None),
    };
    Ok(Some(TelemetryRecorder::new(JsonlSink::new(path)?)))
}

fn current_timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default()
}
