//! The signature generation rule set.
//!
//! Each rule is a predicate/action pair over the crash data and the
//! accumulated result. The pipeline runs them in a fixed order; the order
//! is load-bearing, since later rules rewrite what earlier rules produced.

use crate::data::CrashData;
use crate::generator::SignatureResult;
use crate::java::JavaSignatureTool;
use crate::native::NativeSignatureTool;
use crate::siglists::SignatureLists;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

/// Signatures never exceed this many characters.
pub const SIGNATURE_MAX_LENGTH: usize = 255;

/// A rule failed while running. The pipeline reports the failure as a note
/// and continues with the next rule.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RuleError(pub String);

/// A single signature transformation.
///
/// Rules hold no per-call state. `predicate` decides whether the rule
/// applies to this crash; `action` mutates the result in place. Either may
/// fail, and a failure never aborts the pipeline.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn predicate(
        &self,
        crash_data: &CrashData,
        result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        let _ = (crash_data, result);
        Ok(true)
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError>;
}

/// Generates the base signature from stack frames.
///
/// Java crashes go through [`JavaSignatureTool`]; everything else goes
/// through [`NativeSignatureTool`], walking the crashing thread's
/// normalized frames against the signature lists. Also records
/// `proto_signature` and `normalized_frames` in the result extras.
pub struct SignatureGenerationRule {
    java_tool: JavaSignatureTool,
    native_tool: NativeSignatureTool,
}

impl SignatureGenerationRule {
    pub fn new(lists: Arc<SignatureLists>) -> Self {
        SignatureGenerationRule {
            java_tool: JavaSignatureTool::new(),
            native_tool: NativeSignatureTool::new(lists),
        }
    }

    /// Runs base signature generation against `crashing_thread`, recording
    /// notes under `name`. [`SignatureRunWatchDog`] reuses this with the
    /// thread forced to 0.
    fn run(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
        crashing_thread: Option<usize>,
        name: &'static str,
    ) {
        if let Some(java_stack_trace) = crash_data
            .java_stack_trace
            .as_deref()
            .filter(|trace| !trace.is_empty())
        {
            result.debug(name, "using JavaSignatureTool");
            let generated = self.java_tool.generate(java_stack_trace, ": ");
            for note in &generated.notes {
                result.info(name, note);
            }
            for note in &generated.debug_notes {
                result.debug(name, note);
            }
            result.set_signature(name, generated.signature);
            return;
        }

        result.debug(name, "using NativeSignatureTool");
        let signature_list = match crashing_thread.and_then(|index| crash_data.threads.get(index))
        {
            Some(thread) => self
                .native_tool
                .create_frame_list(thread, crash_data.os.as_deref() == Some("Windows NT")),
            None => Vec::new(),
        };

        let generated = self.native_tool.generate(&signature_list, crashing_thread);

        if !signature_list.is_empty() {
            result.extra.insert(
                "proto_signature".to_string(),
                Value::String(signature_list.join(" | ")),
            );
            result.extra.insert(
                "normalized_frames".to_string(),
                Value::Array(signature_list.into_iter().map(Value::String).collect()),
            );
        }
        for note in &generated.notes {
            result.info(name, note);
        }
        for note in &generated.debug_notes {
            result.debug(name, note);
        }
        if !generated.signature.is_empty() {
            result.set_signature(name, generated.signature);
        }
    }
}

impl Rule for SignatureGenerationRule {
    fn name(&self) -> &'static str {
        "SignatureGenerationRule"
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        self.run(crash_data, result, crash_data.crashing_thread, self.name());
        Ok(())
    }
}

/// Appends the minidump-stackwalker status to `EMPTY` signatures.
pub struct StackwalkerErrorSignatureRule;

impl Rule for StackwalkerErrorSignatureRule {
    fn name(&self) -> &'static str {
        "StackwalkerErrorSignatureRule"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(result.signature.starts_with("EMPTY")
            && crash_data
                .mdsw_status_string
                .as_deref()
                .is_some_and(|status| !status.is_empty()))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let status = crash_data.mdsw_status_string.as_deref().unwrap_or_default();
        let signature = format!("{}; {}", result.signature, status);
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

/// Crash reasons reported when the machine's disk or memory is failing.
const BAD_HARDWARE_REASONS: &[&str] = &[
    "EXCEPTION_IN_PAGE_ERROR / STATUS_DEVICE_DATA_ERROR",
    "EXCEPTION_IN_PAGE_ERROR / STATUS_DISK_FULL",
];

/// Prepends `bad hardware` to signatures for hardware-fault crashes.
pub struct BadHardware;

impl Rule for BadHardware {
    fn name(&self) -> &'static str {
        "BadHardware"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        let reason = crash_data.reason.as_deref().unwrap_or_default();
        Ok(BAD_HARDWARE_REASONS
            .iter()
            .any(|bad_reason| reason.contains(bad_reason)))
    }

    fn action(
        &self,
        _crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let signature = format!("bad hardware | {}", result.signature);
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

/// Signature fragments that only appear in out-of-memory crashes.
const OOM_SIGNATURE_FRAGMENTS: &[&str] = &[
    "NS_ABORT_OOM",
    "mozalloc_handle_oom",
    "CrashAtUnhandlableOOM",
    "AutoEnterOOMUnsafeRegion",
    "alloc::oom::oom",
];

/// Last-error values on the crashing thread that indicate an OOM.
const OOM_LAST_ERROR_VALUES: &[&str] = &["ERROR_COMMITMENT_LIMIT", "ERROR_NOT_ENOUGH_MEMORY"];

/// Crash reason fragments that indicate an OOM.
const OOM_CRASH_REASON_FRAGMENTS: &[&str] = &["[unhandlable oom]", "MOZ_CRASH(OOM)"];

/// Allocations at or under this size classify as `OOM | small`.
const OOM_SMALL_MAX_SIZE: u64 = 262_144;

/// Rewrites signatures of out-of-memory crashes to
/// `OOM | small`, `OOM | large | <sig>`, or `OOM | unknown | <sig>`.
pub struct OOMSignature;

impl Rule for OOMSignature {
    fn name(&self) -> &'static str {
        "OOMSignature"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        if crash_data.oom_allocation_size.is_some_and(|size| size > 0) {
            return Ok(true);
        }

        if result.signature.is_empty() {
            return Ok(false);
        }

        if OOM_SIGNATURE_FRAGMENTS
            .iter()
            .any(|fragment| result.signature.contains(fragment))
        {
            return Ok(true);
        }

        let last_error_value = crash_data
            .crashing_thread
            .and_then(|index| crash_data.threads.get(index))
            .and_then(|thread| thread.last_error_value.as_deref());
        if last_error_value.is_some_and(|value| OOM_LAST_ERROR_VALUES.contains(&value)) {
            return Ok(true);
        }

        let moz_crash_reason = crash_data.moz_crash_reason.as_deref().unwrap_or_default();
        Ok(OOM_CRASH_REASON_FRAGMENTS
            .iter()
            .any(|fragment| moz_crash_reason.contains(fragment)))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let signature = match crash_data.oom_allocation_size {
            None => format!("OOM | unknown | {}", result.signature),
            Some(size) if size <= OOM_SMALL_MAX_SIZE => "OOM | small".to_string(),
            Some(_) => format!("OOM | large | {}", result.signature),
        };
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

/// Prepends the cleaned-up abort message to the signature.
pub struct AbortSignature;

impl Rule for AbortSignature {
    fn name(&self) -> &'static str {
        "AbortSignature"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(crash_data
            .abort_message
            .as_deref()
            .is_some_and(|message| !message.is_empty()))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let abort_message = crash_data.abort_message.as_deref().unwrap_or_default();

        if abort_message.contains("###!!! ABORT: file ") {
            // The message carries nothing beyond the file and line, which
            // change between builds; keep only the marker.
            let signature = format!("Abort | {}", result.signature);
            result.set_signature(self.name(), signature);
            return Ok(());
        }

        let mut message = abort_message.to_string();

        // Drop the noise that precedes the actual abort message.
        if let Some((_, rest)) = message.split_once("###!!! ABORT:") {
            message = rest.to_string();
        }

        // File names and line numbers change between builds.
        if let Some((front, _)) = message.split_once(": file ") {
            message = front.to_string();
        }

        // "unable to find a usable font" messages carry a parenthesized
        // localized message; remove it.
        if message.contains("unable to find a usable font") {
            if let (Some(open), Some(close)) = (message.find('('), message.rfind(')')) {
                if close > open {
                    message = format!("{}{}", &message[..open], &message[close + 1..]);
                }
            }
        }

        let mut message = crate::text::drop_bad_characters(&message)
            .trim()
            .to_string();

        if message.len() > 80 {
            // All ASCII after drop_bad_characters, so byte indexing is
            // char indexing.
            message = format!("{}...", &message[..77]);
        }

        let signature = format!("Abort | {} | {}", message, result.signature);
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

/// Replaces the signature with the async shutdown timeout's phase and
/// conditions.
pub struct SignatureShutdownTimeout;

fn shutdown_timeout_signature(raw: &str) -> Result<String, String> {
    let data: Value = serde_json::from_str(raw).map_err(|error| error.to_string())?;
    let phase = data
        .get("phase")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing phase".to_string())?;
    let raw_conditions = data
        .get("conditions")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing conditions".to_string())?;

    // A condition is either a bare name or an object carrying a "name".
    let mut conditions = Vec::new();
    for condition in raw_conditions {
        let name = match condition {
            Value::String(name) => name.clone(),
            Value::Object(map) => map
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| "condition missing name".to_string())?
                .to_string(),
            _ => return Err("unexpected condition type".to_string()),
        };
        conditions.push(name);
    }

    let conditions = if conditions.is_empty() {
        "(none)".to_string()
    } else {
        conditions.sort();
        conditions.join(",")
    };

    Ok(format!("AsyncShutdownTimeout | {phase} | {conditions}"))
}

impl Rule for SignatureShutdownTimeout {
    fn name(&self) -> &'static str {
        "SignatureShutdownTimeout"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(crash_data
            .async_shutdown_timeout
            .as_deref()
            .is_some_and(|timeout| !timeout.is_empty()))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let raw = crash_data
            .async_shutdown_timeout
            .as_deref()
            .unwrap_or_default();

        let new_signature = match shutdown_timeout_signature(raw) {
            Ok(signature) => signature,
            Err(error) => {
                result.info(
                    self.name(),
                    &format!("Error parsing AsyncShutdownTimeout: {error}"),
                );
                "AsyncShutdownTimeout | UNKNOWN".to_string()
            }
        };

        let note = format!(
            "Signature replaced with a Shutdown Timeout signature, was: {:?}",
            result.signature
        );
        result.info(self.name(), &note);
        result.set_signature(self.name(), new_signature);
        Ok(())
    }
}

/// Regenerates the signature against thread 0 and prepends `shutdownhang`.
///
/// Shutdown-hang crashes are triggered artificially when thread 0 stops
/// responding, so the crashing thread is the watchdog and the stack that
/// matters is thread 0's.
pub struct SignatureRunWatchDog {
    inner: SignatureGenerationRule,
}

impl SignatureRunWatchDog {
    pub fn new(lists: Arc<SignatureLists>) -> Self {
        SignatureRunWatchDog {
            inner: SignatureGenerationRule::new(lists),
        }
    }
}

impl Rule for SignatureRunWatchDog {
    fn name(&self) -> &'static str {
        "SignatureRunWatchDog"
    }

    fn predicate(
        &self,
        _crash_data: &CrashData,
        result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(result.signature.contains("RunWatchdog"))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        self.inner.run(crash_data, result, Some(0), self.name());
        let signature = format!("shutdownhang | {}", result.signature);
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

/// Replaces the signature for IPC channel errors.
pub struct SignatureIPCChannelError;

impl Rule for SignatureIPCChannelError {
    fn name(&self) -> &'static str {
        "SignatureIPCChannelError"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(crash_data
            .ipc_channel_error
            .as_deref()
            .is_some_and(|error| !error.is_empty()))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let error = crash_data.ipc_channel_error.as_deref().unwrap_or_default();
        let truncated: String = error.chars().take(100).collect();
        let kind = if crash_data
            .additional_minidumps
            .iter()
            .any(|dump| dump == "upload_file_minidump_browser")
        {
            "browser"
        } else {
            "content"
        };

        result.info(self.name(), "IPC Channel Error stomped on signature");
        result.set_signature(self.name(), format!("IPCError-{kind} | {truncated}"));
        Ok(())
    }
}

/// Appends the IPC message name to the signature.
pub struct SignatureIPCMessageName;

impl Rule for SignatureIPCMessageName {
    fn name(&self) -> &'static str {
        "SignatureIPCMessageName"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(crash_data
            .ipc_message_name
            .as_deref()
            .is_some_and(|message_name| !message_name.is_empty()))
    }

    fn action(
        &self,
        crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let message_name = crash_data.ipc_message_name.as_deref().unwrap_or_default();
        let signature = format!("{} | IPC_Message_Name={}", result.signature, message_name);
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

/// Replaces the signature when the parent and child build ids differ.
///
/// When this assertion fails, symbolification is unreliable and the
/// generated signatures are junk, so all such crashes bucket together.
pub struct SignatureParentIDNotEqualsChildID;

impl Rule for SignatureParentIDNotEqualsChildID {
    fn name(&self) -> &'static str {
        "SignatureParentIDNotEqualsChildID"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(crash_data.moz_crash_reason.as_deref()
            == Some("MOZ_RELEASE_ASSERT(parentBuildID == childBuildID)"))
    }

    fn action(
        &self,
        _crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let note = format!(
            "Signature replaced with MOZ_RELEASE_ASSERT, was: {:?}",
            result.signature
        );
        result.info(self.name(), &note);
        // The crash reason lists the assertion that failed, so the
        // signature uses "!=".
        result.set_signature(self.name(), "parentBuildID != childBuildID");
        Ok(())
    }
}

/// Prepends `stackoverflow` for stack overflow crashes.
pub struct StackOverflowSignature;

impl Rule for StackOverflowSignature {
    fn name(&self) -> &'static str {
        "StackOverflowSignature"
    }

    fn predicate(
        &self,
        crash_data: &CrashData,
        _result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(crash_data.reason.as_deref() == Some("EXCEPTION_STACK_OVERFLOW"))
    }

    fn action(
        &self,
        _crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let signature = format!("stackoverflow | {}", result.signature);
        result.set_signature(self.name(), signature);
        Ok(())
    }
}

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s").expect("whitespace pattern compiles"));
static CONSECUTIVE_WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\s+").expect("whitespace run pattern compiles"));

/// Trims the signature and collapses all whitespace to single spaces.
pub struct SigFixWhitespace;

impl Rule for SigFixWhitespace {
    fn name(&self) -> &'static str {
        "SigFixWhitespace"
    }

    fn action(
        &self,
        _crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let original = result.signature.clone();

        let signature = original.trim();
        let signature = WHITESPACE_RE.replace_all(signature, " ");
        let signature = CONSECUTIVE_WHITESPACE_RE.replace_all(&signature, " ");

        if signature != original {
            result.set_signature(self.name(), signature.into_owned());
        }
        Ok(())
    }
}

/// Truncates signatures down to [`SIGNATURE_MAX_LENGTH`] characters.
pub struct SigTruncate;

impl Rule for SigTruncate {
    fn name(&self) -> &'static str {
        "SigTruncate"
    }

    fn predicate(
        &self,
        _crash_data: &CrashData,
        result: &SignatureResult,
    ) -> Result<bool, RuleError> {
        Ok(result.signature.chars().count() > SIGNATURE_MAX_LENGTH)
    }

    fn action(
        &self,
        _crash_data: &CrashData,
        result: &mut SignatureResult,
    ) -> Result<(), RuleError> {
        let truncated: String = result
            .signature
            .chars()
            .take(SIGNATURE_MAX_LENGTH - 3)
            .collect();
        result.set_signature(self.name(), format!("{truncated}..."));
        result.info(self.name(), "SigTrunc: signature truncated due to length");
        Ok(())
    }
}
