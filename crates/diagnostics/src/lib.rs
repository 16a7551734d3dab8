//! Translates shader-compiler output into editor-facing markers.
//!
//! The playground prepends a fixed header to every user shader before
//! compiling, so raw compiler positions point into text the user never sees.
//! This crate owns the two halves of the correction: [`parse_compiler_log`]
//! turns the compiler's caret-style text log into structured [`Diagnostic`]s
//! with header lines subtracted, and [`validate`] runs the naga GLSL frontend
//! over the effective source and feeds its errors through the same parser so
//! every marker has one shape.

use tracing::warn;

mod validate;

pub use validate::validate;

/// Shader stage within a GPU program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Marker severity, mirroring what editors expect in their gutter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    fn from_token(token: &str) -> Self {
        if token.trim().eq_ignore_ascii_case("warning") {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

/// One compiler-reported problem, positioned in user-visible coordinates.
///
/// Lines and columns are 1-based. `start_line`/`end_line` are relative to the
/// user's text, i.e. the header line count has already been subtracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub start_line: u32,
    pub end_line: u32,
    pub start_column: u32,
    pub end_column: u32,
    pub message: String,
}

impl Diagnostic {
    /// Marker carrying a message but no usable span.
    ///
    /// Used when a log chunk cannot be parsed, or when the compiler reports a
    /// position inside the injected header that the user cannot see.
    fn zero_span(severity: Severity, message: String) -> Self {
        Self {
            severity,
            start_line: 1,
            end_line: 1,
            start_column: 1,
            end_column: 1,
            message,
        }
    }
}

/// Per-error delimiter in the compiler log. Each chunk that follows starts
/// with `line:column:`.
pub const LOG_DELIMITER: &str = "<stdin>:";

/// Parses a raw compiler log into ordered diagnostics.
///
/// `header_lines` is the number of lines the fixed header prepends to the
/// user's text; reported line numbers are shifted by that amount before they
/// are surfaced. The result fully replaces any previous marker set.
pub fn parse_compiler_log(log: &str, header_lines: u32) -> Vec<Diagnostic> {
    log.split(LOG_DELIMITER)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| parse_chunk(chunk, header_lines))
        .collect()
}

fn parse_chunk(chunk: &str, header_lines: u32) -> Diagnostic {
    let mut parts = chunk.splitn(4, ':');
    let line = parts.next().and_then(|v| v.trim().parse::<u32>().ok());
    let column = parts.next().and_then(|v| v.trim().parse::<u32>().ok());
    let severity = parts
        .next()
        .map(Severity::from_token)
        .unwrap_or(Severity::Error);
    let message = parts.next().unwrap_or("").trim().to_string();

    let (Some(line), Some(column)) = (line, column) else {
        warn!(chunk = chunk.trim(), "unrecognised compiler log chunk");
        return Diagnostic::zero_span(Severity::Error, chunk.trim().to_string());
    };

    // A caret at the very tail marks a single-column error; otherwise the
    // tilde underline on the last marker line gives the span width.
    let end_column = if chunk.trim_end().ends_with('^') {
        column + 1
    } else {
        let underline = chunk
            .lines()
            .rev()
            .find(|candidate| !candidate.trim().is_empty())
            .unwrap_or("");
        column + underline.matches('~').count() as u32
    };

    if line <= header_lines {
        // The header is fixed text the compiler should never trip over; a
        // position inside it means the pipeline is inconsistent with itself.
        warn!(
            line,
            header_lines, "diagnostic points into the injected shader header"
        );
        return Diagnostic::zero_span(severity, message);
    }

    let user_line = line - header_lines;
    Diagnostic {
        severity,
        start_line: user_line,
        end_line: user_line,
        start_column: column,
        end_column,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_underline_gives_the_span_width() {
        let log = "<stdin>:12:5: error: unknown identifier 'vep4'\n    vep4 color;\n    ^~~~\n";
        let diagnostics = parse_compiler_log(log, 0);
        assert_eq!(diagnostics.len(), 1);
        let marker = &diagnostics[0];
        assert_eq!(marker.start_column, 5);
        assert_eq!(marker.end_column - marker.start_column, 3);
        assert_eq!(marker.severity, Severity::Error);
    }

    #[test]
    fn tail_caret_marks_a_single_column() {
        let log = "<stdin>:3:9: error: expected ';'\n    foo\n        ^\n";
        let diagnostics = parse_compiler_log(log, 0);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].start_column, 9);
        assert_eq!(diagnostics[0].end_column, 10);
    }

    #[test]
    fn header_lines_are_subtracted_from_reported_lines() {
        let log = "<stdin>:12:1: error: bad thing\n    x\n    ^\n";
        let diagnostics = parse_compiler_log(log, 9);
        assert_eq!(diagnostics[0].start_line, 3);
        assert_eq!(diagnostics[0].end_line, 3);
    }

    #[test]
    fn diagnostics_inside_the_header_degrade_to_zero_span() {
        let log = "<stdin>:2:4: error: header should never fail\n    y\n    ^\n";
        let diagnostics = parse_compiler_log(log, 9);
        assert_eq!(diagnostics.len(), 1);
        let marker = &diagnostics[0];
        assert_eq!(marker.start_line, 1);
        assert_eq!(marker.start_column, marker.end_column);
    }

    #[test]
    fn malformed_chunks_degrade_instead_of_panicking() {
        let diagnostics = parse_compiler_log("driver said no", 4);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].start_column, diagnostics[0].end_column);
        assert!(diagnostics[0].message.contains("driver said no"));
    }

    #[test]
    fn multiple_chunks_produce_ordered_markers() {
        let log = concat!(
            "<stdin>:11:2: error: first\n    a\n    ^\n",
            "<stdin>:14:6: warning: second\n    bb\n    ^~~\n",
        );
        let diagnostics = parse_compiler_log(log, 10);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].start_line, 1);
        assert_eq!(diagnostics[1].start_line, 4);
        assert_eq!(diagnostics[1].severity, Severity::Warning);
        assert_eq!(diagnostics[1].end_column - diagnostics[1].start_column, 3);
    }

    #[test]
    fn empty_log_means_the_shader_is_valid() {
        assert!(parse_compiler_log("", 9).is_empty());
        assert!(parse_compiler_log("  \n", 9).is_empty());
    }
}
