//! A small [`tracing_subscriber::Layer`] that renders events as one line each.
//!
//! The library only emits events through `tracing` macros; installing a
//! subscriber is left to the binary. [`LogLayer::stderr`] prints lines as they
//! happen, [`LogLayer::capture`] collects them into a [`LogBuffer`] instead.

use std::sync::{Arc, Mutex};

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Layer;
use tracing_subscriber::registry::LookupSpan;

/// Lines captured by a [`LogLayer::capture`] layer.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<String>>>);

impl LogBuffer {
    /// Take every captured line, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buf)
    }

    pub fn contains(&self, needle: &str) -> bool {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.iter().any(|line| line.contains(needle))
    }
}

enum Sink {
    Stderr,
    Buffer(LogBuffer),
}

/// Formats `LEVEL target: message {field=value, ...}` for every event at or
/// above `max_level`.
pub struct LogLayer {
    max_level: Level,
    sink: Sink,
}

impl LogLayer {
    pub fn stderr(max_level: Level) -> Self {
        Self {
            max_level,
            sink: Sink::Stderr,
        }
    }

    pub fn capture(max_level: Level) -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        (
            Self {
                max_level,
                sink: Sink::Buffer(buffer.clone()),
            },
            buffer,
        )
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for LogLayer {
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        // `Level` orders TRACE as the greatest.
        *metadata.level() <= self.max_level
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut line = format!(
            "{:>5} {}: {}",
            metadata.level(),
            metadata.target(),
            visitor.message
        );
        if !visitor.fields.is_empty() {
            let extras: Vec<String> = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            line.push_str(&format!(" {{{}}}", extras.join(", ")));
        }

        match &self.sink {
            Sink::Stderr => eprintln!("{line}"),
            Sink::Buffer(buffer) => {
                if let Ok(mut buf) = buffer.0.lock() {
                    buf.push(line);
                }
            }
        }
    }
}

/// Extracts the message and any extra fields from an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}
