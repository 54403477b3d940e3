//! The rule pipeline.

use crate::data::CrashData;
use crate::rules::{
    AbortSignature, BadHardware, OOMSignature, Rule, RuleError, SigFixWhitespace, SigTruncate,
    SignatureGenerationRule, SignatureIPCChannelError, SignatureIPCMessageName,
    SignatureParentIDNotEqualsChildID, SignatureRunWatchDog, SignatureShutdownTimeout,
    StackOverflowSignature, StackwalkerErrorSignatureRule,
};
use crate::siglists::{SigListError, SignatureLists};
use serde_json::{Map, Value};
use std::sync::Arc;

/// The accumulated output of one generation call.
///
/// Created empty at the start of [`SignatureGenerator::generate`], mutated
/// by each rule in turn, and returned to the caller.
#[derive(Debug, Default, serde::Serialize)]
pub struct SignatureResult {
    /// The signature. Rules overwrite it via [`set_signature`], which
    /// records every transition in `debug_log`.
    ///
    /// [`set_signature`]: SignatureResult::set_signature
    pub signature: String,
    /// Human-readable notes about material transformations and rule
    /// failures. Append-only.
    pub notes: Vec<String>,
    /// Verbose per-rule trace. Append-only.
    pub debug_log: Vec<String>,
    /// Side-channel data such as `proto_signature` and
    /// `normalized_frames`.
    pub extra: Map<String, Value>,
}

impl SignatureResult {
    /// Replaces the signature, recording the old and new values in the
    /// debug log.
    pub fn set_signature(&mut self, rule: &str, signature: impl Into<String>) {
        let signature = signature.into();
        let transition = format!("change: {:?} -> {:?}", self.signature, signature);
        self.debug(rule, &transition);
        self.signature = signature;
    }

    /// Appends a user-facing note attributed to `rule`.
    pub fn info(&mut self, rule: &str, msg: &str) {
        self.notes.push(format!("{rule}: {msg}"));
    }

    /// Appends a debug-log line attributed to `rule`.
    pub fn debug(&mut self, rule: &str, msg: &str) {
        self.debug_log.push(format!("{rule}: {msg}"));
    }
}

/// Callback invoked when a rule fails: receives the crash data, the error,
/// and the rule name.
pub type ErrorHandler = dyn Fn(&CrashData, &RuleError, &str) + Send + Sync;

/// The default rule order. It is load-bearing: rules rewrite what earlier
/// rules produced, and the whitespace and truncation fixups run last.
pub fn default_ruleset(lists: Arc<SignatureLists>) -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(SignatureGenerationRule::new(lists.clone())),
        Box::new(StackwalkerErrorSignatureRule),
        Box::new(BadHardware),
        Box::new(OOMSignature),
        Box::new(AbortSignature),
        Box::new(SignatureShutdownTimeout),
        Box::new(SignatureRunWatchDog::new(lists)),
        Box::new(SignatureIPCChannelError),
        Box::new(SignatureIPCMessageName),
        Box::new(SignatureParentIDNotEqualsChildID),
        Box::new(StackOverflowSignature),
        Box::new(SigFixWhitespace),
        Box::new(SigTruncate),
    ]
}

/// Runs an ordered list of rules over crash data to produce a signature.
///
/// Generation is pure and synchronous; a generator can be shared across
/// threads and used concurrently, since each call gets its own
/// [`SignatureResult`].
pub struct SignatureGenerator {
    ruleset: Vec<Box<dyn Rule>>,
    error_handler: Option<Box<ErrorHandler>>,
}

impl SignatureGenerator {
    /// A generator with the default ruleset over the bundled signature
    /// lists.
    pub fn new() -> Result<Self, SigListError> {
        Ok(Self::with_lists(Arc::new(SignatureLists::bundled()?)))
    }

    /// A generator with the default ruleset over the given lists.
    pub fn with_lists(lists: Arc<SignatureLists>) -> Self {
        Self::with_ruleset(default_ruleset(lists))
    }

    /// A generator running exactly the given rules.
    pub fn with_ruleset(ruleset: Vec<Box<dyn Rule>>) -> Self {
        SignatureGenerator {
            ruleset,
            error_handler: None,
        }
    }

    /// Installs a callback invoked whenever a rule fails.
    pub fn error_handler(mut self, handler: Box<ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Generates a signature for one crash.
    ///
    /// A failing rule contributes a `Rule failed` note and whatever
    /// partial state it already committed; it never aborts the pipeline,
    /// and this function never fails.
    pub fn generate(&self, crash_data: &CrashData) -> SignatureResult {
        let mut result = SignatureResult::default();

        for rule in &self.ruleset {
            let name = rule.name();
            let outcome = rule.predicate(crash_data, &result).and_then(|applies| {
                if applies {
                    rule.action(crash_data, &mut result)
                } else {
                    Ok(())
                }
            });
            if let Err(error) = outcome {
                if let Some(handler) = &self.error_handler {
                    handler(crash_data, &error, name);
                }
                log::debug!("rule {name} failed: {error}");
                result.info(name, &format!("Rule failed: {error}"));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FailingPredicate;

    impl Rule for FailingPredicate {
        fn name(&self) -> &'static str {
            "FailingPredicate"
        }

        fn predicate(
            &self,
            _crash_data: &CrashData,
            _result: &SignatureResult,
        ) -> Result<bool, RuleError> {
            Err(RuleError("thread index out of range".to_string()))
        }

        fn action(
            &self,
            _crash_data: &CrashData,
            _result: &mut SignatureResult,
        ) -> Result<(), RuleError> {
            Ok(())
        }
    }

    struct SetSignature(&'static str);

    impl Rule for SetSignature {
        fn name(&self) -> &'static str {
            "SetSignature"
        }

        fn action(
            &self,
            _crash_data: &CrashData,
            result: &mut SignatureResult,
        ) -> Result<(), RuleError> {
            result.set_signature(self.name(), self.0);
            Ok(())
        }
    }

    #[test]
    fn failing_rule_is_contained() {
        let generator = SignatureGenerator::with_ruleset(vec![Box::new(FailingPredicate)]);
        let result = generator.generate(&CrashData::default());
        assert_eq!(result.signature, "");
        assert_eq!(
            result.notes,
            vec!["FailingPredicate: Rule failed: thread index out of range"]
        );
    }

    #[test]
    fn failing_rule_keeps_earlier_state() {
        let generator = SignatureGenerator::with_ruleset(vec![
            Box::new(SetSignature("kept")),
            Box::new(FailingPredicate),
        ]);
        let result = generator.generate(&CrashData::default());
        assert_eq!(result.signature, "kept");
        assert_eq!(result.notes.len(), 1);
    }

    #[test]
    fn error_handler_receives_failures() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        let generator = SignatureGenerator::with_ruleset(vec![Box::new(FailingPredicate)])
            .error_handler(Box::new(move |_crash_data, error, rule| {
                seen_in_handler
                    .lock()
                    .unwrap()
                    .push((rule.to_string(), error.to_string()));
            }));

        generator.generate(&CrashData::default());
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(
                "FailingPredicate".to_string(),
                "thread index out of range".to_string()
            )]
        );
    }

    #[test]
    fn set_signature_records_transition() {
        let mut result = SignatureResult::default();
        result.set_signature("SomeRule", "new signature");
        assert_eq!(result.signature, "new signature");
        assert_eq!(
            result.debug_log,
            vec!["SomeRule: change: \"\" -> \"new signature\""]
        );
    }
}
