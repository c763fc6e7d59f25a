//! Operator-facing decision panel.
//!
//! Rendering is fire-and-forget from the control loop's point of view: the
//! cycle calls [`Renderer::render`] after dispatching, logs any error, and
//! carries on.  Nothing a renderer does can change a directive.

use std::io::{self, Write};

use colored::{ColoredString, Colorize};
use visdrive_hal::Frame;
use visdrive_types::{Directive, DriveError, OracleMetadata};

/// Obstacles listed on the panel.
pub const MAX_OBSTACLES: usize = 5;

/// Default wrap width for free-text sections.
pub const DEFAULT_WIDTH: usize = 60;

/// Draws the resolved directive and oracle metadata for a human.
pub trait Renderer: Send {
    /// # Errors
    ///
    /// Returns [`DriveError::Render`] on output failure.  Callers ignore it
    /// beyond logging.
    fn render(
        &mut self,
        frame: &Frame,
        directive: Directive,
        metadata: Option<&OracleMetadata>,
    ) -> Result<(), DriveError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Panel model
// ─────────────────────────────────────────────────────────────────────────────

/// Colour band for the oracle's confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// Above 70.
    High,
    /// Above 40.
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: u8) -> Self {
        match confidence {
            71.. => ConfidenceBand::High,
            41..=70 => ConfidenceBand::Medium,
            _ => ConfidenceBand::Low,
        }
    }
}

/// How a panel line is styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Command,
    Confidence(ConfidenceBand),
    Heading,
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelLine {
    pub style: LineStyle,
    pub text: String,
}

impl PanelLine {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }

    fn painted(&self) -> ColoredString {
        match self.style {
            LineStyle::Command => self.text.green().bold(),
            LineStyle::Confidence(ConfidenceBand::High) => self.text.green(),
            LineStyle::Confidence(ConfidenceBand::Medium) => self.text.yellow(),
            LineStyle::Confidence(ConfidenceBand::Low) => self.text.red(),
            LineStyle::Heading => self.text.bold(),
            LineStyle::Detail => self.text.dimmed(),
        }
    }
}

/// Greedy word wrap.  Words longer than `width` get a line of their own.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Build the decision panel: command, confidence, obstacles (at most
/// [`MAX_OBSTACLES`]), path description and reasoning.
pub fn panel_lines(
    directive: Directive,
    metadata: Option<&OracleMetadata>,
    width: usize,
) -> Vec<PanelLine> {
    let empty = OracleMetadata::default();
    let meta = metadata.unwrap_or(&empty);
    let mut lines = vec![PanelLine::new(
        LineStyle::Command,
        format!("Command: {}", directive.as_str().to_uppercase()),
    )];

    lines.push(match meta.confidence {
        Some(c) => PanelLine::new(
            LineStyle::Confidence(ConfidenceBand::of(c)),
            format!("Confidence: {c}%"),
        ),
        None => PanelLine::new(LineStyle::Confidence(ConfidenceBand::Low), "Confidence: --"),
    });

    lines.push(PanelLine::new(LineStyle::Heading, "Obstacles:"));
    if meta.obstacles.is_empty() {
        lines.push(PanelLine::new(LineStyle::Detail, "  (none reported)"));
    }
    for obstacle in meta.obstacles.iter().take(MAX_OBSTACLES) {
        lines.push(PanelLine::new(LineStyle::Detail, format!("  - {obstacle}")));
    }

    let sections = [
        ("Path Description:", meta.path_description.as_deref(), "No description"),
        ("Reasoning:", meta.reasoning.as_deref(), "No specific reasoning"),
    ];
    for (heading, body, fallback) in sections {
        lines.push(PanelLine::new(LineStyle::Heading, heading));
        for line in wrap_text(body.unwrap_or(fallback), width.saturating_sub(2).max(1)) {
            lines.push(PanelLine::new(LineStyle::Detail, format!("  {line}")));
        }
    }
    lines
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsoleRenderer
// ─────────────────────────────────────────────────────────────────────────────

/// Prints the panel to a terminal (stdout by default).
pub struct ConsoleRenderer<W: Write + Send = io::Stdout> {
    out: W,
    width: usize,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> ConsoleRenderer<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out,
            width: DEFAULT_WIDTH,
        }
    }

    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_panel(
        &mut self,
        frame: &Frame,
        directive: Directive,
        metadata: Option<&OracleMetadata>,
    ) -> io::Result<()> {
        let header = if frame.width > 0 {
            format!("── frame {}x{} ", frame.width, frame.height)
        } else {
            format!("── frame {} bytes ", frame.data.len())
        };
        writeln!(self.out, "{}", header.dimmed())?;
        for line in panel_lines(directive, metadata, self.width) {
            writeln!(self.out, "  {}", line.painted())?;
        }
        self.out.flush()
    }
}

impl<W: Write + Send> Renderer for ConsoleRenderer<W> {
    fn render(
        &mut self,
        frame: &Frame,
        directive: Directive,
        metadata: Option<&OracleMetadata>,
    ) -> Result<(), DriveError> {
        self.write_panel(frame, directive, metadata)
            .map_err(|e| DriveError::Render(e.to_string()))
    }
}
