//! Landing page rendering.
//!
//! Templates are plain HTML with `{{ name }}` placeholders. They are parsed
//! once at startup; an unknown placeholder or an unclosed `{{` is a startup
//! error.

use std::fmt::Write;
use std::path::Path;

use crate::error::AppError;

const DEFAULT_TEMPLATE: &str = include_str!("../assets/index.html");

/// Values available to the page template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderData {
    pub count: i64,
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Count,
    Hostname,
    /// Hostname with every character wrapped in its own `<span>`
    HostnameLetters,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "hostname" => Some(Self::Hostname),
            "hostname_letters" => Some(Self::HostnameLetters),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Value(Placeholder),
}

#[derive(Debug, Clone)]
pub struct PageTemplate {
    segments: Vec<Segment>,
}

impl PageTemplate {
    /// The page bundled into the binary
    pub fn embedded() -> Result<Self, AppError> {
        Self::parse(DEFAULT_TEMPLATE)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            AppError::Render(format!("failed to read template {}: {}", path.display(), e))
        })?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self, AppError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or_else(|| {
                AppError::Render(format!(
                    "unclosed placeholder at byte {}",
                    source.len() - rest.len() + open
                ))
            })?;
            let name = after_open[..close].trim();
            let placeholder = Placeholder::parse(name)
                .ok_or_else(|| AppError::Render(format!("unknown placeholder '{}'", name)))?;
            segments.push(Segment::Value(placeholder));
            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, data: &RenderData) -> Result<String, AppError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Value(Placeholder::Count) => {
                    write!(out, "{}", data.count).map_err(|e| AppError::Render(e.to_string()))?
                }
                Segment::Value(Placeholder::Hostname) => push_escaped(&mut out, &data.hostname),
                Segment::Value(Placeholder::HostnameLetters) => {
                    for letter in data.hostname.chars() {
                        out.push_str("<span>");
                        push_escaped(&mut out, letter.encode_utf8(&mut [0; 4]));
                        out.push_str("</span>");
                    }
                }
            }
        }
        Ok(out)
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
