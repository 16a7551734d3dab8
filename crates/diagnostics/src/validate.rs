use std::fmt::Write;

use naga::front::glsl::{Frontend, Options, ParseErrors};
use naga::valid::{Capabilities, ValidationError, Validator, ValidationFlags};
use naga::{ShaderStage, SourceLocation, WithSpan};

use crate::{parse_compiler_log, Diagnostic, Stage, LOG_DELIMITER};

/// Validates one shader stage's effective source (header + user body).
///
/// An empty result means the stage is renderable this cycle; any marker at
/// all means the orchestrator must keep the previous valid program on screen.
/// Errors are rendered into the caret log format first so that
/// [`parse_compiler_log`] is the single source of marker geometry.
pub fn validate(stage: Stage, effective_source: &str, header_lines: u32) -> Vec<Diagnostic> {
    let mut frontend = Frontend::default();
    let options = Options::from(naga_stage(stage));

    let module = match frontend.parse(&options, effective_source) {
        Ok(module) => module,
        Err(errors) => {
            let log = render_parse_log(&errors, effective_source);
            return parse_compiler_log(&log, header_lines);
        }
    };

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    match validator.validate(&module) {
        Ok(_) => Vec::new(),
        Err(error) => {
            let log = render_validation_log(&error, effective_source);
            parse_compiler_log(&log, header_lines)
        }
    }
}

fn naga_stage(stage: Stage) -> ShaderStage {
    match stage {
        Stage::Vertex => ShaderStage::Vertex,
        Stage::Fragment => ShaderStage::Fragment,
    }
}

fn render_parse_log(errors: &ParseErrors, source: &str) -> String {
    let mut log = String::new();
    for error in &errors.errors {
        let location = error.meta.location(source);
        push_chunk(&mut log, Some(location), &error.kind.to_string(), source);
    }
    log
}

fn render_validation_log(error: &WithSpan<ValidationError>, source: &str) -> String {
    let location = error
        .spans()
        .next()
        .map(|(span, _)| span.location(source));
    let mut log = String::new();
    push_chunk(&mut log, location, &error.as_inner().to_string(), source);
    log
}

/// Appends one clang-style chunk: position line, offending source line, and
/// a `^~~~` underline whose tilde count encodes the span width.
fn push_chunk(log: &mut String, location: Option<SourceLocation>, message: &str, source: &str) {
    let (line_number, column, length) = match location {
        Some(location) => (
            location.line_number.max(1),
            location.line_position.max(1),
            location.length.max(1),
        ),
        None => (1, 1, 1),
    };

    let line_text = source
        .lines()
        .nth(line_number as usize - 1)
        .unwrap_or("");
    let available = line_text
        .chars()
        .count()
        .saturating_sub(column as usize - 1)
        .max(1);
    let span = (length as usize).min(available);

    let mut underline = " ".repeat(column as usize - 1);
    underline.push('^');
    underline.push_str(&"~".repeat(span - 1));

    let _ = writeln!(log, "{LOG_DELIMITER}{line_number}:{column}: error: {message}");
    let _ = writeln!(log, "{line_text}");
    let _ = writeln!(log, "{underline}");
}
