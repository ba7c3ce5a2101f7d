//! Decoding of a single analysis-output document into parsed records.
//!
//! Decoding happens in two passes: the version marker is checked on the raw
//! JSON value first, then the body is read into lenient structs whose
//! required fields are validated by hand so the error can name the record.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{TraceError, TraceResult};
use crate::models::{issue_handle, TraceKind, ROOT_PORT, SUPPORTED_INPUT_VERSIONS};
use crate::parser::{ParsedFrame, ParsedIssue, ParsedRun};

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    preconditions: Vec<RawFrame>,
    #[serde(default)]
    postconditions: Vec<RawFrame>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIssue {
    code: Option<Value>,
    callable: Option<String>,
    message: Option<String>,
    filename: Option<String>,
    line: Option<i64>,
    kind: Option<String>,
    #[serde(default)]
    sources: Vec<RawFrame>,
    #[serde(default)]
    sinks: Vec<RawFrame>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    caller: Option<String>,
    caller_port: Option<String>,
    callee: Option<String>,
    callee_port: Option<String>,
    filename: Option<String>,
    line: Option<i64>,
    #[serde(default)]
    features: Vec<String>,
}

fn check_version(doc: &Value, origin: &str) -> TraceResult<()> {
    let version = doc
        .get("version")
        .ok_or_else(|| TraceError::Schema(format!("{origin}: missing `version` marker")))?;
    match version.as_i64() {
        Some(v) if SUPPORTED_INPUT_VERSIONS.contains(&v) => Ok(()),
        _ => Err(TraceError::Schema(format!(
            "{origin}: unsupported version {version}, expected one of {SUPPORTED_INPUT_VERSIONS:?}"
        ))),
    }
}

fn require<T>(value: Option<T>, context: &str, field: &str) -> TraceResult<T> {
    value.ok_or_else(|| TraceError::malformed(context, field))
}

fn code_to_string(code: Value, context: &str) -> TraceResult<String> {
    match code {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(TraceError::malformed(context, "code")),
    }
}

fn frame(raw: RawFrame, kind: TraceKind, context: &str) -> TraceResult<ParsedFrame> {
    Ok(ParsedFrame {
        kind,
        caller: require(raw.caller, context, "caller")?,
        caller_port: require(raw.caller_port, context, "caller_port")?,
        callee: require(raw.callee, context, "callee")?,
        callee_port: require(raw.callee_port, context, "callee_port")?,
        filename: require(raw.filename, context, "filename")?,
        line: require(raw.line, context, "line")?,
        features: raw.features,
    })
}

/// Root frames hang off the issue's callable, so caller fields default to it.
fn root_frame(
    mut raw: RawFrame,
    kind: TraceKind,
    callable: &str,
    context: &str,
) -> TraceResult<ParsedFrame> {
    raw.caller.get_or_insert_with(|| callable.to_string());
    raw.caller_port.get_or_insert_with(|| ROOT_PORT.to_string());
    frame(raw, kind, context)
}

fn issue(raw: RawIssue, index: usize, origin: &str) -> TraceResult<ParsedIssue> {
    let context = format!("{origin}: issue #{index}");
    let code = code_to_string(require(raw.code, &context, "code")?, &context)?;
    let callable = require(raw.callable, &context, "callable")?;
    let filename = require(raw.filename, &context, "filename")?;
    let line = require(raw.line, &context, "line")?;

    let sources = raw
        .sources
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            root_frame(f, TraceKind::Postcondition, &callable, &format!("{context} source #{i}"))
        })
        .collect::<TraceResult<Vec<_>>>()?;
    let sinks = raw
        .sinks
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            root_frame(f, TraceKind::Precondition, &callable, &format!("{context} sink #{i}"))
        })
        .collect::<TraceResult<Vec<_>>>()?;

    let kind = raw.kind.filter(|k| !k.is_empty());
    Ok(ParsedIssue {
        handle: issue_handle(&code, &callable, &filename, line, kind.as_deref()),
        code,
        callable,
        message: raw.message.unwrap_or_default(),
        filename,
        line,
        kind,
        sources,
        sinks,
    })
}

/// Decode one document. `origin` names it in error messages.
pub fn parse_document(contents: &str, origin: &str) -> TraceResult<ParsedRun> {
    let value: Value = serde_json::from_str(contents)?;
    check_version(&value, origin)?;
    let raw: RawDocument = serde_json::from_value(value)
        .map_err(|e| TraceError::MalformedInput(format!("{origin}: {e}")))?;

    let issues = raw
        .issues
        .into_iter()
        .enumerate()
        .map(|(i, r)| issue(r, i, origin))
        .collect::<TraceResult<Vec<_>>>()?;
    let preconditions = raw
        .preconditions
        .into_iter()
        .enumerate()
        .map(|(i, f)| frame(f, TraceKind::Precondition, &format!("{origin}: precondition #{i}")))
        .collect::<TraceResult<Vec<_>>>()?;
    let postconditions = raw
        .postconditions
        .into_iter()
        .enumerate()
        .map(|(i, f)| frame(f, TraceKind::Postcondition, &format!("{origin}: postcondition #{i}")))
        .collect::<TraceResult<Vec<_>>>()?;

    Ok(ParsedRun {
        issues,
        preconditions,
        postconditions,
    })
}
