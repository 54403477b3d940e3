//! Crash data model and the processed-crash adapter.
//!
//! [`CrashData`] is the canonical input to signature generation. Every
//! field is optional: a missing annotation means the rules that would use
//! it do not apply, never an error.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

/// One crash report's worth of input to signature generation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CrashData {
    /// Raw Java exception text; when present, the Java tool generates the
    /// base signature instead of the native tool.
    pub java_stack_trace: Option<String>,
    /// Index into `threads` of the crashing thread.
    pub crashing_thread: Option<usize>,
    pub threads: Vec<Thread>,
    /// Operating system name, e.g. `Windows NT`. Affects module casing.
    pub os: Option<String>,
    pub oom_allocation_size: Option<u64>,
    pub abort_message: Option<String>,
    /// minidump-stackwalk status string.
    pub mdsw_status_string: Option<String>,
    /// JSON blob describing an async shutdown timeout.
    pub async_shutdown_timeout: Option<String>,
    pub ipc_channel_error: Option<String>,
    pub ipc_message_name: Option<String>,
    pub moz_crash_reason: Option<String>,
    pub additional_minidumps: Vec<String>,
    /// Crash reason from the exception record, e.g.
    /// `EXCEPTION_STACK_OVERFLOW`.
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Thread {
    pub frames: Vec<Frame>,
    /// Last Windows error value seen on the thread, e.g.
    /// `ERROR_COMMITMENT_LIMIT`.
    pub last_error_value: Option<String>,
}

/// One stack frame as produced by the stackwalker.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub module: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub module_offset: Option<String>,
    pub offset: Option<String>,
    /// Inlined calls at this address, innermost first. They expand into
    /// the frame stream before this frame.
    pub inlines: Vec<InlineFrame>,
    /// Only meaningful on a frame with no module: modules that were
    /// unloaded from the address range the frame falls in.
    pub unloaded_modules: Vec<UnloadedModule>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct InlineFrame {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnloadedModule {
    pub module: Option<String>,
    pub offsets: Vec<String>,
}

impl CrashData {
    /// Builds canonical crash data from a processed-crash document.
    ///
    /// Field paths follow the processed-crash schema; missing or malformed
    /// values degrade to absent. This never fails.
    pub fn from_processed_crash(processed: &Value) -> CrashData {
        CrashData {
            java_stack_trace: string_at(processed, &["java_stack_trace"]),
            crashing_thread: integer_at(processed, &["json_dump", "crash_info", "crashing_thread"])
                .map(|n| n as usize),
            threads: threads_at(processed, &["json_dump", "threads"]),
            os: string_at(processed, &["json_dump", "system_info", "os"]),
            oom_allocation_size: integer_at(processed, &["oom_allocation_size"]),
            abort_message: string_at(processed, &["abort_message"]),
            mdsw_status_string: string_at(processed, &["mdsw_status_string"]),
            async_shutdown_timeout: string_at(processed, &["async_shutdown_timeout"]),
            ipc_channel_error: string_at(processed, &["ipc_channel_error"]),
            ipc_message_name: string_at(processed, &["ipc_message_name"]),
            moz_crash_reason: string_at(processed, &["moz_crash_reason"]),
            additional_minidumps: strings_at(processed, &["additional_minidumps"]),
            reason: string_at(processed, &["reason"]),
        }
    }
}

fn lookup<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    lookup(value, path)?.as_str().map(str::to_string)
}

/// Accepts a number or a numeric string; processed crashes carry both.
fn integer_at(value: &Value, path: &[&str]) -> Option<u64> {
    match lookup(value, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts an array of strings or one comma-separated string.
fn strings_at(value: &Value, path: &[&str]) -> Vec<String> {
    match lookup(value, path) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn threads_at(value: &Value, path: &[&str]) -> Vec<Thread> {
    match lookup(value, path) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|thread| serde_json::from_value(thread.clone()).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    }
}

static CRASH_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{6}[0-9]{6}$")
        .expect("crash id pattern compiles")
});

/// Extracts a crash id from a bare id, a `bp-` prefixed id, or a
/// crash-stats report URL. Returns `None` when no valid id is present.
pub fn parse_crashid(item: &str) -> Option<&str> {
    if CRASH_ID_RE.is_match(item) {
        return Some(item);
    }

    if let Some(rest) = item.strip_prefix("bp-") {
        if CRASH_ID_RE.is_match(rest) {
            return Some(rest);
        }
    }

    if item.starts_with("http") {
        let path = item
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(item);
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if let Some(index) = path.find("/report/index/") {
            let candidate = path[index..].rsplit('/').next().unwrap_or("");
            if CRASH_ID_RE.is_match(candidate) {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_crashid_variants() {
        assert_eq!(parse_crashid(""), None);
        assert_eq!(parse_crashid("foo"), None);
        assert_eq!(
            parse_crashid("0b794045-87ec-4649-9ce1-73ec10191120"),
            Some("0b794045-87ec-4649-9ce1-73ec10191120")
        );
        assert_eq!(
            parse_crashid("bp-0b794045-87ec-4649-9ce1-73ec10191120"),
            Some("0b794045-87ec-4649-9ce1-73ec10191120")
        );
        assert_eq!(
            parse_crashid(
                "https://crash-stats.mozilla.org/report/index/0b794045-87ec-4649-9ce1-73ec10191120"
            ),
            Some("0b794045-87ec-4649-9ce1-73ec10191120")
        );
        // The last six characters must be a date.
        assert_eq!(parse_crashid("0b794045-87ec-4649-9ce1-73ec1019112x"), None);
    }

    #[test]
    fn from_processed_crash_maps_fields() {
        let processed = json!({
            "java_stack_trace": "SomeJavaException: oops",
            "json_dump": {
                "crash_info": {"crashing_thread": 1},
                "system_info": {"os": "Windows NT"},
                "threads": [
                    {"frames": []},
                    {
                        "frames": [
                            {"function": "f(int)", "module": "xul.dll", "line": 12}
                        ],
                        "last_error_value": "ERROR_NOT_ENOUGH_MEMORY"
                    }
                ]
            },
            "oom_allocation_size": "262144",
            "abort_message": "oh no",
            "reason": "EXCEPTION_STACK_OVERFLOW",
            "additional_minidumps": ["upload_file_minidump_browser"]
        });

        let crash_data = CrashData::from_processed_crash(&processed);
        assert_eq!(crash_data.java_stack_trace.as_deref(), Some("SomeJavaException: oops"));
        assert_eq!(crash_data.crashing_thread, Some(1));
        assert_eq!(crash_data.os.as_deref(), Some("Windows NT"));
        assert_eq!(crash_data.oom_allocation_size, Some(262144));
        assert_eq!(crash_data.abort_message.as_deref(), Some("oh no"));
        assert_eq!(crash_data.reason.as_deref(), Some("EXCEPTION_STACK_OVERFLOW"));
        assert_eq!(crash_data.additional_minidumps, vec!["upload_file_minidump_browser"]);
        assert_eq!(crash_data.threads.len(), 2);
        let thread = &crash_data.threads[1];
        assert_eq!(thread.last_error_value.as_deref(), Some("ERROR_NOT_ENOUGH_MEMORY"));
        assert_eq!(thread.frames[0].function.as_deref(), Some("f(int)"));
        assert_eq!(thread.frames[0].line, Some(12));
    }

    #[test]
    fn from_processed_crash_tolerates_missing_and_malformed() {
        let crash_data = CrashData::from_processed_crash(&json!({}));
        assert!(crash_data.java_stack_trace.is_none());
        assert!(crash_data.crashing_thread.is_none());
        assert!(crash_data.threads.is_empty());

        let crash_data = CrashData::from_processed_crash(&json!({
            "json_dump": {"threads": "not an array", "crash_info": {"crashing_thread": "zero"}},
            "oom_allocation_size": {"nested": true},
            "additional_minidumps": "browser, content"
        }));
        assert!(crash_data.threads.is_empty());
        assert!(crash_data.crashing_thread.is_none());
        assert!(crash_data.oom_allocation_size.is_none());
        assert_eq!(crash_data.additional_minidumps, vec!["browser", "content"]);
    }
}
