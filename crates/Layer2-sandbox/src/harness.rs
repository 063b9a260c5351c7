//! Python harness
//!
//! Generated code runs inside a small launcher script that captures the
//! top-level `result` variable and reports uncaught exceptions on stderr
//! between marker lines. The launcher is written next to the code file for
//! every invocation.

/// Prefix of the stdout line carrying the serialized `result`
pub const RESULT_MARKER: &str = "__SKILLFORGE_RESULT__=";
/// Opens the traceback block on stderr
pub const FAILURE_BEGIN: &str = "__SKILLFORGE_FAILURE_BEGIN__";
/// Closes the traceback block on stderr
pub const FAILURE_END: &str = "__SKILLFORGE_FAILURE_END__";
/// Printed when the interpreter raised MemoryError
pub const MEMORY_MARKER: &str = "__SKILLFORGE_MEMORY_ERROR__";

pub const HARNESS_FILE: &str = "_skillforge_harness.py";
pub const CODE_FILE: &str = "main.py";

/// Launcher source. Usage: `python _skillforge_harness.py main.py`
pub fn harness_source() -> String {
    format!(
        r#"import json
import sys
import traceback

_path = sys.argv[1]
_ns = {{"__name__": "__main__", "__file__": _path}}
try:
    with open(_path, "r", encoding="utf-8") as _fh:
        _source = _fh.read()
    _code = compile(_source, _path, "exec")
    exec(_code, _ns)
except SystemExit as _exit:
    _status = _exit.code
    if _status is None:
        _status = 0
    elif not isinstance(_status, int):
        sys.stderr.write(str(_status) + "\n")
        _status = 1
    sys.stdout.flush()
    sys.exit(_status)
except MemoryError:
    sys.stderr.write("\n{memory}\n")
    sys.stderr.flush()
    sys.exit(137)
except BaseException:
    sys.stderr.write("\n{begin}\n" + traceback.format_exc() + "{end}\n")
    sys.stderr.flush()
    sys.exit(1)
else:
    if "result" in _ns:
        _value = _ns["result"]
        try:
            _text = json.dumps(_value, default=str)
        except Exception:
            _text = repr(_value)
        sys.stdout.write("\n{result}" + _text + "\n")
    sys.stdout.flush()
"#,
        memory = MEMORY_MARKER,
        begin = FAILURE_BEGIN,
        end = FAILURE_END,
        result = RESULT_MARKER,
    )
}

/// Harness markers separated from user-visible output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub stdout: String,
    pub stderr: String,
    pub return_value: Option<String>,
    pub traceback: Option<String>,
    pub memory_error: bool,
}

/// Strip harness markers from raw process output
pub fn parse_output(raw_stdout: &str, raw_stderr: &str) -> ParsedOutput {
    let mut return_value = None;
    let mut stdout_lines = Vec::new();
    for line in raw_stdout.lines() {
        match line.strip_prefix(RESULT_MARKER) {
            Some(value) => return_value = Some(decode_result(value)),
            None => stdout_lines.push(line),
        }
    }
    // harness prefixes the marker with a newline
    while stdout_lines.last().is_some_and(|l| l.is_empty()) {
        stdout_lines.pop();
    }

    let mut traceback = None;
    let mut memory_error = false;
    let mut stderr_lines = Vec::new();
    let mut in_failure = false;
    let mut failure_lines = Vec::new();

    for line in raw_stderr.lines() {
        if line == MEMORY_MARKER {
            memory_error = true;
        } else if line == FAILURE_BEGIN {
            in_failure = true;
        } else if line == FAILURE_END {
            in_failure = false;
            traceback = Some(failure_lines.join("\n"));
            failure_lines.clear();
        } else if in_failure {
            failure_lines.push(line);
        } else {
            stderr_lines.push(line);
        }
    }
    // end marker missing when the process was killed mid-write
    if in_failure && !failure_lines.is_empty() {
        traceback = Some(failure_lines.join("\n"));
    }
    while stderr_lines.last().is_some_and(|l| l.is_empty()) {
        stderr_lines.pop();
    }

    ParsedOutput {
        stdout: join_lines(&stdout_lines, raw_stdout),
        stderr: join_lines(&stderr_lines, raw_stderr),
        return_value,
        traceback,
        memory_error,
    }
}

/// JSON strings are unquoted; other values keep their JSON text
fn decode_result(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(text)) => text,
        _ => raw.to_string(),
    }
}

fn join_lines(lines: &[&str], raw: &str) -> String {
    let mut joined = lines.join("\n");
    if !joined.is_empty() && raw.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_result_is_unquoted() {
        let stdout = format!("{}\"3.1415926536\"\n", RESULT_MARKER);
        let parsed = parse_output(&stdout, "");
        assert_eq!(parsed.return_value.as_deref(), Some("3.1415926536"));

        // repr() fallback is not JSON
        let stdout = format!("{}<object at 0x1>\n", RESULT_MARKER);
        assert_eq!(parse_output(&stdout, "").return_value.as_deref(), Some("<object at 0x1>"));
    }

    #[test]
    fn test_result_marker_extracted() {
        let stdout = format!("hello\n\n{}[1, 2, 3]\n", RESULT_MARKER);
        let parsed = parse_output(&stdout, "");
        assert_eq!(parsed.stdout, "hello\n");
        assert_eq!(parsed.return_value.as_deref(), Some("[1, 2, 3]"));
    }

    #[test]
    fn test_traceback_extracted() {
        let stderr = format!(
            "warn\n\n{}\nTraceback (most recent call last):\nZeroDivisionError: division by zero\n{}\n",
            FAILURE_BEGIN, FAILURE_END
        );
        let parsed = parse_output("", &stderr);
        assert_eq!(parsed.stderr, "warn\n");
        let tb = parsed.traceback.unwrap();
        assert!(tb.starts_with("Traceback"));
        assert!(tb.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_memory_marker() {
        let parsed = parse_output("", &format!("\n{}\n", MEMORY_MARKER));
        assert!(parsed.memory_error);
        assert!(parsed.traceback.is_none());
    }

    #[test]
    fn test_harness_mentions_markers() {
        let source = harness_source();
        assert!(source.contains(RESULT_MARKER));
        assert!(source.contains(FAILURE_BEGIN));
        assert!(source.contains("{\"__name__\": \"__main__\""));
    }
}
