//! Profiling around the forward pass
//!
//! [`profiled`] wraps a unit of work with any number of [`ProfileScope`]s.
//! Scopes are started before the work and stopped, published and torn down
//! after it in reverse order, whether the work succeeded, failed or
//! panicked. A scope that cannot start is logged and left out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use candle_core::Device;
use serde::Serialize;
use tracing::Span;

use crate::error::{BatchrError, BatchrResult};

/// A profiling session with a start/stop/publish/teardown lifecycle
pub trait ProfileScope {
    fn name(&self) -> &'static str;

    /// Begin collecting. Called strictly before the profiled work.
    fn start(&mut self) -> BatchrResult<()>;

    /// Stop collecting. Called right after the work returns.
    fn stop(&mut self);

    /// Report what was collected, attached to `span`.
    fn publish(&mut self, span: &Span);

    /// Release every resource held by the scope.
    fn teardown(&mut self);
}

/// Scopes that started successfully; finished in reverse order on drop.
struct ActiveScopes<'a> {
    scopes: Vec<Box<dyn ProfileScope + 'a>>,
    span: Span,
}

impl Drop for ActiveScopes<'_> {
    fn drop(&mut self) {
        for scope in self.scopes.iter_mut().rev() {
            scope.stop();
            scope.publish(&self.span);
            scope.teardown();
            tracing::debug!("Profiling scope '{}' finished", scope.name());
        }
    }
}

/// Run `work` inside the given profiling scopes.
pub fn profiled<'a, T>(
    scopes: Vec<Box<dyn ProfileScope + 'a>>,
    span: &Span,
    work: impl FnOnce() -> BatchrResult<T>,
) -> BatchrResult<T> {
    let mut active = ActiveScopes {
        scopes: Vec::with_capacity(scopes.len()),
        span: span.clone(),
    };
    for mut scope in scopes {
        match scope.start() {
            Ok(()) => active.scopes.push(scope),
            Err(e) => {
                tracing::warn!("Profiling scope '{}' not started: {}", scope.name(), e);
                scope.teardown();
            }
        }
    }

    let result = work();
    drop(active);
    result
}

/// Wall time of one executed node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpEvent {
    pub node: String,
    pub op: &'static str,
    /// Microseconds since profiling started
    pub start_us: u64,
    pub duration_us: u64,
}

/// Shared sink the executor reports node timings into
#[derive(Debug, Default)]
pub struct OpRecorder {
    active: AtomicBool,
    state: Mutex<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    origin: Option<Instant>,
    events: Vec<OpEvent>,
}

impl OpRecorder {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record a node that started at `started` and ran for `elapsed`.
    /// Ignored unless the recorder is active.
    pub fn record(&self, node: &str, op: &'static str, started: Instant, elapsed: Duration) {
        if !self.is_active() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let origin = *state.origin.get_or_insert(started);
        state.events.push(OpEvent {
            node: node.to_string(),
            op,
            start_us: started.saturating_duration_since(origin).as_micros() as u64,
            duration_us: elapsed.as_micros() as u64,
        });
    }

    fn begin(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.origin = Some(Instant::now());
            state.events.clear();
        }
        self.active.store(true, Ordering::Release);
    }

    fn end(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<OpEvent> {
        self.state
            .lock()
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    fn take(&self) -> Vec<OpEvent> {
        self.state
            .lock()
            .map(|mut s| std::mem::take(&mut s.events))
            .unwrap_or_default()
    }

    fn reset(&self) {
        self.end();
        if let Ok(mut state) = self.state.lock() {
            *state = RecorderState::default();
        }
    }
}

/// Software-level operator profiler
///
/// Attach [`OperatorProfiler::recorder`] to the predictor session; while
/// started, every executed node is timed. Publishing logs one event per node
/// and, when configured, writes a Chrome trace file.
pub struct OperatorProfiler {
    recorder: Arc<OpRecorder>,
    trace_output: Option<PathBuf>,
}

impl OperatorProfiler {
    pub fn new(trace_output: Option<PathBuf>) -> Self {
        Self {
            recorder: Arc::new(OpRecorder::default()),
            trace_output,
        }
    }

    pub fn recorder(&self) -> Arc<OpRecorder> {
        Arc::clone(&self.recorder)
    }

    fn write_trace(path: &std::path::Path, events: &[OpEvent]) -> BatchrResult<()> {
        let trace_events: Vec<_> = events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.node,
                    "cat": e.op,
                    "ph": "X",
                    "ts": e.start_us,
                    "dur": e.duration_us,
                    "pid": 0,
                    "tid": 0,
                })
            })
            .collect();
        let doc = serde_json::json!({ "traceEvents": trace_events });
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &doc)
            .map_err(|e| BatchrError::Profiling(format!("cannot write trace: {e}")))
    }
}

impl ProfileScope for OperatorProfiler {
    fn name(&self) -> &'static str {
        "operators"
    }

    fn start(&mut self) -> BatchrResult<()> {
        self.recorder.begin();
        Ok(())
    }

    fn stop(&mut self) {
        self.recorder.end();
    }

    fn publish(&mut self, span: &Span) {
        let events = self.recorder.take();
        let total: u64 = events.iter().map(|e| e.duration_us).sum();
        for event in &events {
            tracing::info!(
                parent: span,
                node = %event.node,
                op = event.op,
                duration_us = event.duration_us,
                "operator"
            );
        }
        tracing::info!(
            parent: span,
            "Profiled {} operators, {} us total",
            events.len(),
            total
        );

        if let Some(path) = &self.trace_output {
            match Self::write_trace(path, &events) {
                Ok(()) => tracing::info!("Operator trace written to {}", path.display()),
                Err(e) => tracing::warn!("Failed to write {}: {}", path.display(), e),
            }
        }
    }

    fn teardown(&mut self) {
        self.recorder.reset();
    }
}

/// Low-level device activity session, CUDA only
///
/// Starting synchronizes the device so the window opens on an idle queue.
/// Stopping hands the flush to a drain thread; publishing joins it before
/// reporting, so the device is always quiet once the scope is torn down.
pub struct DeviceActivityTracer {
    device: Device,
    started: Option<Instant>,
    drain: Option<JoinHandle<candle_core::Result<Duration>>>,
}

impl DeviceActivityTracer {
    pub fn new(device: &Device) -> BatchrResult<Self> {
        if !device.is_cuda() {
            return Err(BatchrError::Profiling(
                "device activity tracing requires a CUDA device".into(),
            ));
        }
        Ok(Self {
            device: device.clone(),
            started: None,
            drain: None,
        })
    }

    /// Block until the drain thread has flushed the device.
    fn wait(&mut self) -> Option<candle_core::Result<Duration>> {
        let handle = self.drain.take()?;
        match handle.join() {
            Ok(result) => Some(result),
            Err(_) => Some(Err(candle_core::Error::Msg(
                "device drain thread panicked".into(),
            ))),
        }
    }
}

impl ProfileScope for DeviceActivityTracer {
    fn name(&self) -> &'static str {
        "device-activity"
    }

    fn start(&mut self) -> BatchrResult<()> {
        self.device
            .synchronize()
            .map_err(|e| BatchrError::Profiling(format!("cannot attach to device: {e}")))?;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        if self.drain.is_some() {
            return;
        }
        let device = self.device.clone();
        self.drain = Some(std::thread::spawn(move || {
            let flush = Instant::now();
            device.synchronize()?;
            Ok(flush.elapsed())
        }));
    }

    fn publish(&mut self, span: &Span) {
        let window = self.started.map(|s| s.elapsed()).unwrap_or_default();
        match self.wait() {
            Some(Ok(flush)) => tracing::info!(
                parent: span,
                "Device activity: {:?} window, drained in {:?}",
                window,
                flush
            ),
            Some(Err(e)) => tracing::warn!(parent: span, "Device drain failed: {}", e),
            None => {}
        }
    }

    fn teardown(&mut self) {
        let _ = self.wait();
        self.started = None;
    }
}

impl Drop for DeviceActivityTracer {
    fn drop(&mut self) {
        let _ = self.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        fail_start: bool,
    }

    impl Recording {
        fn boxed(name: &'static str, log: &Log, fail_start: bool) -> Box<dyn ProfileScope> {
            Box::new(Self {
                name,
                log: Rc::clone(log),
                fail_start,
            })
        }

        fn push(&self, event: &str) {
            self.log.borrow_mut().push(format!("{}:{}", self.name, event));
        }
    }

    impl ProfileScope for Recording {
        fn name(&self) -> &'static str {
            self.name
        }
        fn start(&mut self) -> BatchrResult<()> {
            if self.fail_start {
                return Err(BatchrError::Profiling("refused".into()));
            }
            self.push("start");
            Ok(())
        }
        fn stop(&mut self) {
            self.push("stop");
        }
        fn publish(&mut self, _span: &Span) {
            self.push("publish");
        }
        fn teardown(&mut self) {
            self.push("teardown");
        }
    }

    #[test]
    fn test_hooks_wrap_work_in_order() {
        let log: Log = Rc::default();
        let scopes = vec![
            Recording::boxed("tracer", &log, false),
            Recording::boxed("ops", &log, false),
        ];
        let work_log = Rc::clone(&log);
        let value = profiled(scopes, &Span::none(), || {
            work_log.borrow_mut().push("work".into());
            Ok(42)
        })
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(
            *log.borrow(),
            vec![
                "tracer:start",
                "ops:start",
                "work",
                "ops:stop",
                "ops:publish",
                "ops:teardown",
                "tracer:stop",
                "tracer:publish",
                "tracer:teardown",
            ]
        );
    }

    #[test]
    fn test_scopes_released_when_work_fails() {
        let log: Log = Rc::default();
        let scopes = vec![Recording::boxed("ops", &log, false)];
        let result: BatchrResult<()> = profiled(scopes, &Span::none(), || {
            Err(BatchrError::Execution("device lost".into()))
        });

        assert!(matches!(result, Err(BatchrError::Execution(_))));
        assert_eq!(
            *log.borrow(),
            vec!["ops:start", "ops:stop", "ops:publish", "ops:teardown"]
        );
    }

    #[test]
    fn test_failed_start_is_tolerated() {
        let log: Log = Rc::default();
        let scopes = vec![
            Recording::boxed("broken", &log, true),
            Recording::boxed("ops", &log, false),
        ];
        let value = profiled(scopes, &Span::none(), || Ok("done")).unwrap();

        assert_eq!(value, "done");
        assert_eq!(
            *log.borrow(),
            vec![
                "broken:teardown",
                "ops:start",
                "ops:stop",
                "ops:publish",
                "ops:teardown"
            ]
        );
    }

    #[test]
    fn test_recorder_only_records_while_active() {
        let recorder = OpRecorder::default();
        let now = Instant::now();
        recorder.record("conv1", "conv2d", now, Duration::from_micros(5));
        assert!(recorder.take().is_empty());

        recorder.begin();
        recorder.record("conv1", "conv2d", Instant::now(), Duration::from_micros(5));
        recorder.end();
        recorder.record("relu1", "relu", Instant::now(), Duration::from_micros(1));

        let events = recorder.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node, "conv1");
        assert_eq!(events[0].duration_us, 5);
    }

    #[test]
    fn test_operator_profiler_writes_chrome_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let mut profiler = OperatorProfiler::new(Some(path.clone()));
        let recorder = profiler.recorder();

        profiler.start().unwrap();
        recorder.record("fc", "linear", Instant::now(), Duration::from_micros(7));
        profiler.stop();
        profiler.publish(&Span::none());
        profiler.teardown();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let events = doc["traceEvents"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["name"], "fc");
        assert_eq!(events[0]["dur"], 7);
        assert!(!recorder.is_active());
    }

    #[test]
    fn test_device_tracer_needs_cuda() {
        let err = DeviceActivityTracer::new(&Device::Cpu).err().unwrap();
        assert!(err.is_recoverable());
    }
}
