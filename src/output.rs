//! Formatting of log lines and lifecycle messages.

use std::fmt::{Display, Write as _};
use std::io::{self, Write};

use anyhow::{Result, bail};
use chrono::{DateTime, Local, TimeZone, Utc};
use clap::ValueEnum;
use crossterm::style::{Color, ContentStyle, Stylize};
use serde::Deserialize;

use ktail_types::{ContainerSpec, LogEvent, PodInfo};

/// When to emit ANSI colors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn enabled(self, is_tty: bool) -> bool {
        match self {
            Self::Auto => is_tty,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

// ============================================================================
// Colors
// ============================================================================

/// (label, metadata) color pairs; labels use the bright variant
const COLOR_PAIRS: [(Color, Color); 6] = [
    (Color::Blue, Color::DarkBlue),
    (Color::Cyan, Color::DarkCyan),
    (Color::Green, Color::DarkGreen),
    (Color::Magenta, Color::DarkMagenta),
    (Color::Red, Color::DarkRed),
    (Color::Yellow, Color::DarkYellow),
];

/// 32-bit FNV-1 over the concatenated parts
fn fnv32(parts: &[&str]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for part in parts {
        for b in part.bytes() {
            hash = hash.wrapping_mul(0x0100_0193);
            hash ^= u32::from(b);
        }
    }
    hash
}

/// Stable color pair for a pod/container combination
fn color_pair(pod: &str, container: &str) -> (Color, Color) {
    COLOR_PAIRS[fnv32(&[pod, container]) as usize % COLOR_PAIRS.len()]
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Namespace,
    Pod,
    Container,
    Timestamp,
    Message,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(Field),
}

/// Line template with `{namespace}`, `{pod}`, `{container}`, `{timestamp}` and `{message}`
/// placeholders. `{{` and `}}` produce literal braces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => bail!("unclosed placeholder in template {source:?}"),
                        }
                    }
                    let field = match name.trim() {
                        "namespace" => Field::Namespace,
                        "pod" => Field::Pod,
                        "container" => Field::Container,
                        "timestamp" => Field::Timestamp,
                        "message" => Field::Message,
                        other => bail!("unknown template field {other:?}"),
                    };
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Field(field));
                }
                '}' => bail!("unmatched '}}' in template {source:?}"),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Self { parts })
    }

    fn render(&self, event: &LogEvent) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Field(Field::Namespace) => out.push_str(&event.pod.namespace),
                Part::Field(Field::Pod) => out.push_str(&event.pod.name),
                Part::Field(Field::Container) => out.push_str(&event.container.name),
                Part::Field(Field::Timestamp) => {
                    if let Some(ts) = event.timestamp {
                        out.push_str(&format_timestamp(ts));
                    }
                }
                Part::Field(Field::Message) => out.push_str(&event.message),
            }
        }
        out
    }
}

// ============================================================================
// Printer
// ============================================================================

/// Millisecond-precision local time, always 23 characters wide
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    format_timestamp_in(ts, &Local)
}

fn format_timestamp_in<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    ts.with_timezone(tz)
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

/// Output settings resolved once at startup
#[derive(Clone, Debug, Default)]
pub struct OutputConfig {
    pub color: bool,
    /// Message only (plus the timestamp with `timestamps`)
    pub raw: bool,
    pub timestamps: bool,
    /// Suppress attach/leave messages
    pub quiet: bool,
    /// Prefix labels with the namespace
    pub qualify_namespace: bool,
    pub template: Option<Template>,
}

pub struct Printer {
    config: OutputConfig,
}

impl Printer {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    fn paint<D: Display>(&self, color: Color, bold: bool, text: D) -> String {
        if !self.config.color {
            return text.to_string();
        }
        let mut style = ContentStyle::new().with(color);
        if bold {
            style = style.bold();
        }
        style.apply(text).to_string()
    }

    /// `pod:container`, or `namespace/pod:container` across namespaces
    pub fn label(&self, pod: &PodInfo, container: &ContainerSpec) -> String {
        if self.config.qualify_namespace {
            format!("{}/{}:{}", pod.namespace, pod.name, container.name)
        } else {
            format!("{}:{}", pod.name, container.name)
        }
    }

    pub fn format_event(&self, event: &LogEvent) -> String {
        if let Some(template) = &self.config.template {
            return template.render(event);
        }

        let (label_color, meta_color) = color_pair(&event.pod.name, &event.container.name);
        let mut line = String::new();

        if self.config.timestamps {
            if let Some(ts) = event.timestamp {
                let _ = write!(line, "{} ", self.paint(meta_color, true, format_timestamp(ts)));
            }
        }
        if !self.config.raw {
            let label = self.label(&event.pod, &event.container);
            let _ = write!(line, "{} ", self.paint(label_color, true, label));
        }
        line.push_str(&event.message);
        line
    }

    pub fn write_event(&self, out: &mut impl Write, event: &LogEvent) -> io::Result<()> {
        writeln!(out, "{}", self.format_event(event))?;
        out.flush()
    }

    pub fn info_line(&self, message: &str) -> String {
        self.paint(Color::DarkYellow, false, format!("==> {message}"))
    }

    pub fn error_line(&self, message: &str) -> String {
        self.paint(Color::DarkRed, false, format!("==> {message}"))
    }

    pub fn info(&self, message: &str) {
        eprintln!("{}", self.info_line(message));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", self.error_line(message));
    }

    pub fn entered(&self, pod: &PodInfo, container: &ContainerSpec, initial: bool) {
        if self.config.quiet {
            return;
        }
        let verb = if initial { "Attached to container" } else { "New container" };
        self.info(&format!("{verb} [{}]", self.label(pod, container)));
    }

    pub fn left(&self, pod: &PodInfo, container: &ContainerSpec) {
        if self.config.quiet {
            return;
        }
        self.info(&format!(
            "Container left ({}) [{}]",
            exit_status(pod, container),
            self.label(pod, container)
        ));
    }
}

/// State label of the container's current status entry
fn exit_status(pod: &PodInfo, container: &ContainerSpec) -> &'static str {
    pod.status_for(&container.name)
        .map(|s| s.state.label())
        .unwrap_or("unknown")
}
