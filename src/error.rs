use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use std::fmt;

/// A region of source text. `line` is 1-based and refers to `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    pub fn single(pos: usize, line: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
            line,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: &Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexical,
    Syntax,
    Semantic,
    Conversion,
    Index,
    Arithmetic,
    Fatal,
}

impl DiagnosticKind {
    pub fn title(&self) -> &'static str {
        match self {
            DiagnosticKind::Lexical => "Lexical Error",
            DiagnosticKind::Syntax => "Syntax Error",
            DiagnosticKind::Semantic => "Semantic Error",
            DiagnosticKind::Conversion => "Conversion Error",
            DiagnosticKind::Index => "Index Error",
            DiagnosticKind::Arithmetic => "Arithmetic Error",
            DiagnosticKind::Fatal => "Fatal Error",
        }
    }

    fn color(&self) -> Color {
        match self {
            DiagnosticKind::Lexical => Color::Red,
            DiagnosticKind::Syntax => Color::Yellow,
            DiagnosticKind::Semantic => Color::Blue,
            DiagnosticKind::Conversion | DiagnosticKind::Arithmetic => Color::Magenta,
            DiagnosticKind::Index => Color::Magenta,
            DiagnosticKind::Fatal => Color::Red,
        }
    }

    /// Run-time kinds are produced by the evaluator, the rest by the parser.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            DiagnosticKind::Conversion
                | DiagnosticKind::Index
                | DiagnosticKind::Arithmetic
                | DiagnosticKind::Fatal
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One compile-time or run-time problem. Records never carry UI formatting;
/// `report` is a separate rendering step.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: Span, message: String) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            span,
            message,
            help: None,
        }
    }

    pub fn new_with_help(kind: DiagnosticKind, span: Span, message: String, help: String) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            span,
            message,
            help: Some(help),
        }
    }

    pub fn lex_error(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Lexical, span, message)
    }

    pub fn syntax_error(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Syntax, span, message)
    }

    pub fn syntax_error_with_help(span: Span, message: String, help: String) -> Self {
        Self::new_with_help(DiagnosticKind::Syntax, span, message, help)
    }

    pub fn semantic_error(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Semantic, span, message)
    }

    pub fn semantic_error_with_help(span: Span, message: String, help: String) -> Self {
        Self::new_with_help(DiagnosticKind::Semantic, span, message, help)
    }

    pub fn conversion_error(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Conversion, span, message)
    }

    pub fn index_error(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Index, span, message)
    }

    pub fn arithmetic_error(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Arithmetic, span, message)
    }

    pub fn fatal(span: Span, message: String) -> Self {
        Self::new(DiagnosticKind::Fatal, span, message)
    }

    /// Downgrade to a warning.
    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn report(&self, source: &str, filename: Option<&str>) -> std::io::Result<()> {
        let filename = filename.unwrap_or("<input>");
        let color = self.kind.color();
        let report_kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        // Spans produced at end of input may point one past the last byte.
        let end = self.span.end.min(source.len()).max(self.span.start.min(source.len()));
        let start = self.span.start.min(end);

        let mut report_builder = Report::build(report_kind, filename, start)
            .with_message(format!("{}: {}", self.kind.title().fg(color), self.message))
            .with_label(
                Label::new((filename, start..end))
                    .with_message(&self.message)
                    .with_color(color),
            );

        if let Some(ref help_text) = self.help {
            report_builder = report_builder.with_note(format!("{}: {}", "help".fg(Color::Cyan), help_text));
        }

        report_builder
            .finish()
            .eprint((filename, Source::from(source)))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: line {}: {}: {}", level, self.span.line, self.kind.title(), self.message)
    }
}

impl std::error::Error for Diagnostic {}
