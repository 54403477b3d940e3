//! Signature generation for Java exception stacks.

use crate::GeneratedSignature;
use regex::Regex;
use std::sync::LazyLock;

/// Signatures longer than this drop the exception description.
const DESCRIPTION_MAX_LENGTH: usize = 255;

// Java line numbers change between builds; `.java:666)` becomes `.java)`.
static LINE_NUMBER_KILLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.java:\d+\)$").expect("line number pattern compiles"));

// Heap addresses like `@4054b560` change between runs.
static HEX_ADDR_KILLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[0-9a-f]{8}").expect("hex addr pattern compiles"));

/// Generates signatures from Java exception text.
#[derive(Default)]
pub struct JavaSignatureTool;

impl JavaSignatureTool {
    pub fn new() -> Self {
        JavaSignatureTool
    }

    /// Builds a signature from the first two lines of a Java stack trace:
    /// the exception class and description, and the topmost frame with its
    /// line number dropped.
    pub fn generate(&self, source: &str, delimiter: &str) -> GeneratedSignature {
        let lines: Vec<&str> = source.lines().map(str::trim).collect();
        if lines.is_empty() {
            return GeneratedSignature {
                signature: "EMPTY: Java stack trace not in expected format".to_string(),
                notes: vec![
                    "JavaSignatureTool: stack trace not in expected format".to_string()
                ],
                debug_notes: Vec::new(),
            };
        }

        let mut notes = Vec::new();

        let (exception_class, description) = match lines[0].split_once(':') {
            Some((class, description)) => {
                let description = HEX_ADDR_KILLER.replace_all(description, "@<addr>");
                (class.trim().to_string(), description.trim().to_string())
            }
            None => {
                notes.push(
                    "JavaSignatureTool: stack trace line 1 is not in the expected format"
                        .to_string(),
                );
                (lines[0].to_string(), String::new())
            }
        };

        let java_method = match lines.get(1) {
            Some(line) => {
                let method = LINE_NUMBER_KILLER.replace(line, ".java)").into_owned();
                if method.is_empty() {
                    notes.push("JavaSignatureTool: stack trace line 2 is empty".to_string());
                }
                method
            }
            None => {
                notes.push("JavaSignatureTool: stack trace line 2 is missing".to_string());
                String::new()
            }
        };

        // An error in an earlier version of this code left the colon out
        // between the description and the method unless the description
        // ended with "<addr>". The error is kept so existing signatures
        // stay stable.
        let signature = if description.ends_with("<addr>") {
            join_ignore_empty(delimiter, &[&exception_class, &description, &java_method])
        } else {
            let description_method = join_ignore_empty(" ", &[&description, &java_method]);
            join_ignore_empty(delimiter, &[&exception_class, &description_method])
        };

        let signature = if signature.chars().count() > DESCRIPTION_MAX_LENGTH {
            notes.push(
                "JavaSignatureTool: dropped Java exception description due to length".to_string(),
            );
            [exception_class, java_method].join(delimiter)
        } else {
            signature
        };

        GeneratedSignature {
            signature,
            notes,
            debug_notes: Vec::new(),
        }
    }
}

fn join_ignore_empty(delimiter: &str, parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(source: &str) -> GeneratedSignature {
        JavaSignatureTool::new().generate(source, ": ")
    }

    #[test]
    fn empty_stack() {
        let result = generate("");
        assert_eq!(result.signature, "EMPTY: Java stack trace not in expected format");
        assert_eq!(
            result.notes,
            vec!["JavaSignatureTool: stack trace not in expected format"]
        );
    }

    #[test]
    fn basic_stack_frame_with_line_number() {
        let result = generate(
            "SomeJavaException: totally made up  \n\
             at org.mozilla.lars.myInvention(larsFile.java:666)",
        );
        assert_eq!(
            result.signature,
            "SomeJavaException: totally made up at org.mozilla.lars.myInvention(larsFile.java)"
        );
        assert!(result.notes.is_empty());
    }

    #[test]
    fn basic_stack_frame() {
        let result = generate(
            "SomeJavaException: totally made up  \n\
             at org.mozilla.lars.myInvention(larsFile.java)",
        );
        assert_eq!(
            result.signature,
            "SomeJavaException: totally made up at org.mozilla.lars.myInvention(larsFile.java)"
        );
        assert!(result.notes.is_empty());
    }

    #[test]
    fn long_exception_description() {
        let source = format!(
            "   SomeJavaException: {} \nat org.mozilla.lars.myInvention(larsFile.java)",
            "t".repeat(1000)
        );
        let result = generate(&source);
        assert_eq!(
            result.signature,
            "SomeJavaException: at org.mozilla.lars.myInvention(larsFile.java)"
        );
        assert_eq!(
            result.notes,
            vec!["JavaSignatureTool: dropped Java exception description due to length"]
        );
    }

    #[test]
    fn no_description() {
        let result = generate(
            "   SomeJavaException\n\
             at org.mozilla.lars.myInvention(larsFile.java:1234)",
        );
        assert_eq!(
            result.signature,
            "SomeJavaException: at org.mozilla.lars.myInvention(larsFile.java)"
        );
        assert_eq!(
            result.notes,
            vec!["JavaSignatureTool: stack trace line 1 is not in the expected format"]
        );
    }

    #[test]
    fn missing_second_line() {
        let result = generate("SomeJavaException: totally made up  ");
        assert_eq!(result.signature, "SomeJavaException: totally made up");
        assert_eq!(
            result.notes,
            vec!["JavaSignatureTool: stack trace line 2 is missing"]
        );
    }

    #[test]
    fn second_line_after_line_ending_is_missing() {
        let result = generate("SomeJavaException: totally made up  \n");
        assert_eq!(result.signature, "SomeJavaException: totally made up");
        assert_eq!(
            result.notes,
            vec!["JavaSignatureTool: stack trace line 2 is missing"]
        );
    }

    #[test]
    fn hex_address_out_of_position_left_alone() {
        let result = JavaSignatureTool::new().generate(
            "SomeJavaException: totally made up  \n\
             at org.mozilla.lars.myInvention(larsFile.java:@abef1234)",
            " ",
        );
        assert_eq!(
            result.signature,
            "SomeJavaException totally made up at org.mozilla.lars.myInvention(larsFile.java:@abef1234)"
        );
        assert!(result.notes.is_empty());
    }

    // The colon placement depends on whether the description ends with
    // "<addr>"; this inconsistency is historical and intentionally kept.
    #[test]
    fn colon_placement_quirk() {
        let result = generate(
            "java.lang.IllegalArgumentException: Given view not a child of android.widget.AbsoluteLayout@4054b560\n\
             \tat android.view.ViewGroup.updateViewLayout(ViewGroup.java:1968)\n\
             \tat org.mozilla.gecko.GeckoApp.repositionPluginViews(GeckoApp.java:1492)",
        );
        assert_eq!(
            result.signature,
            "java.lang.IllegalArgumentException: \
             Given view not a child of android.widget.AbsoluteLayout@<addr>: \
             at android.view.ViewGroup.updateViewLayout(ViewGroup.java)"
        );
        assert!(result.notes.is_empty());

        let result = generate(
            "android.view.WindowManager$BadTokenException: Unable to add window -- token android.os.BinderProxy@406237c0 is not valid; is your activity running?\n\
             \tat android.view.ViewRoot.setView(ViewRoot.java:533)\n\
             \tat android.view.WindowManagerImpl.addView(WindowManagerImpl.java:202)",
        );
        assert_eq!(
            result.signature,
            "android.view.WindowManager$BadTokenException: \
             Unable to add window -- token android.os.BinderProxy@<addr> \
             is not valid; is your activity running? \
             at android.view.ViewRoot.setView(ViewRoot.java)"
        );
        assert!(result.notes.is_empty());
    }
}
