use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for per-run `events.jsonl` logs.
///
/// - default fields are `type`, `run_id`, `pipeline`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
/// - a writer without a path still builds events but drops them
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    run_id: String,
    pipeline: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(
        path: impl Into<PathBuf>,
        run_id: impl Into<String>,
        pipeline: impl Into<String>,
    ) -> Self {
        Self::build(Some(path.into()), run_id.into(), pipeline.into())
    }

    pub fn discard(run_id: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self::build(None, run_id.into(), pipeline.into())
    }

    fn build(path: Option<PathBuf>, run_id: String, pipeline: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                run_id,
                pipeline,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn pipeline(&self) -> &str {
        &self.inner.pipeline
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert(
            "pipeline".to_string(),
            Value::String(self.inner.pipeline.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Emits and swallows write failures. Run events are diagnostics and must
    /// never change the outcome of a pipeline.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            eprintln!("brandframe: dropped {event_type} event: {err:#}");
        }
    }
}

pub fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
