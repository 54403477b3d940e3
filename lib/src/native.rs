//! Signature generation for C/C++/Rust stacks.
//!
//! [`NativeSignatureTool`] normalizes stack frames into short textual
//! tokens and walks them against the signature lists to pick the frames
//! that make up the signature.

use crate::data::{Frame, Thread};
use crate::siglists::SignatureLists;
use crate::text::{
    collapse, drop_prefix_and_return_type, fixup_spaces, parse_source_file, strip_leading_zeros,
};
use crate::GeneratedSignature;
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// Frames beyond this point never contribute to a signature.
pub const MAXIMUM_FRAMES_TO_CONSIDER: usize = 40;

// Rust-generated uniqueness hashes, e.g. `::h7f635057bfba806a`.
static FIXUP_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-fA-F]+$").expect("hash pattern compiles"));

// Numbered lambda markers, e.g. `::$_12::`.
static FIXUP_LAMBDA_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::\$_\d+::").expect("lambda pattern compiles"));

/// `(file, function)` pairs for Rust 1.34 panic symbols that are missing
/// their module, mapped to the fully-qualified name so sentinel and prefix
/// matching still works.
const FILE_FUNCTION_TO_FUNCTION: &[(&str, &str, &str)] = &[
    (
        "src/liballoc/raw_vec.rs",
        "capacity_overflow",
        "alloc::raw_vec::capacity_overflow",
    ),
    (
        "src/libcore/option.rs",
        "expect_failed",
        "core::option::expect_failed",
    ),
    (
        "src/libcore/panicking.rs",
        "panic_bounds_check",
        "core::panicking::panic_bounds_check",
    ),
    (
        "src/libcore/panicking.rs",
        "panic_fmt",
        "core::panicking::panic_fmt",
    ),
    ("src/libcore/panicking.rs", "panic", "core::panicking::panic"),
    (
        "src/libcore/slice/mod.rs",
        "slice_index_order_fail",
        "core::slice::slice_index_order_fail",
    ),
    (
        "src/libstd/panicking.rs",
        "begin_panic_fmt",
        "std::panicking::begin_panic_fmt",
    ),
    (
        "src/libstd/panicking.rs",
        "continue_panic_fmt",
        "std::panicking::continue_panic_fmt",
    ),
    (
        "src/libstd/panicking.rs",
        "rust_panic_with_hook",
        "std::panicking::rust_panic_with_hook",
    ),
];

fn nonempty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn fixed_function_for(file: &str, function: &str) -> Option<&'static str> {
    let parsed = parse_source_file(Some(file)).unwrap_or("");
    for &(list_file, list_function, fixed) in FILE_FUNCTION_TO_FUNCTION {
        if parsed == list_file && function == list_function {
            return Some(fixed);
        }
    }
    None
}

fn fix_missing_module(frame: &mut Frame) {
    let fixed = match (frame.file.as_deref(), frame.function.as_deref()) {
        (Some(file), Some(function)) => fixed_function_for(file, function),
        _ => None,
    };
    if let Some(fixed) = fixed {
        frame.function = Some(fixed.to_string());
    }
}

/// Generates signatures from C/C++/Rust stacks.
///
/// Frames are normalized one at a time, then the list of normalized frames
/// is walked against the signature lists to decide which frames end up in
/// the signature.
pub struct NativeSignatureTool {
    lists: Arc<SignatureLists>,
}

impl NativeSignatureTool {
    pub fn new(lists: Arc<SignatureLists>) -> Self {
        NativeSignatureTool { lists }
    }

    /// Normalizes a single Rust frame with a function.
    pub fn normalize_rust_function(&self, function: &str, line: Option<u32>) -> String {
        let function = drop_prefix_and_return_type(function);

        let function = collapse(&function, '<', '>', "<T>", &[" as "]);
        let mut function = collapse(&function, '(', ')', "", &[]);

        if self.lists.signatures_with_line_numbers_re.is_match(&function) {
            if let Some(line) = line {
                function = format!("{function}:{line}");
            }
        }

        let function = fixup_spaces(&function);

        // Remove rust-generated uniqueness hashes.
        FIXUP_HASH.replace(&function, "").into_owned()
    }

    /// Normalizes a single C/C++ frame with a function.
    pub fn normalize_cpp_function(&self, function: &str, line: Option<u32>) -> String {
        // Drop member function cv/ref qualifiers. `const&` is checked
        // before bare `&`, and each qualifier applies to the result of the
        // previous strip.
        let mut function = function.to_string();
        for qualifier in ["const", "const&", "&&", "&"] {
            if let Some(stripped) = function.strip_suffix(qualifier) {
                function = stripped.trim().to_string();
            }
        }

        // Drop the prefix and return type unless this is operator
        // overloading, which doesn't have the parts being dropped and
        // would come out mangled.
        if !function.contains("::operator") {
            function = drop_prefix_and_return_type(&function);
        }

        let function = function.replace("`anonymous namespace'", "(anonymous namespace)");

        // Remove lambda numbers so lambdas group across builds.
        let function = FIXUP_LAMBDA_NUMBERS.replace_all(&function, "::$$::");

        // The " in " exception handles "<unknown in foobar.dll>".
        let function = collapse(
            &function,
            '<',
            '>',
            "<T>",
            &["name omitted", "IPC::ParamTraits", " in "],
        );

        let mut function = collapse(
            &function,
            '(',
            ')',
            "",
            &["anonymous namespace", "operator"],
        );

        // Remove PGO cold block labels like "[clone .cold.222]".
        if function.contains("clone .cold") {
            function = collapse(&function, '[', ']', "", &[]);
        }

        if self.lists.signatures_with_line_numbers_re.is_match(&function) {
            if let Some(line) = line {
                function = format!("{function}:{line}");
            }
        }

        fixup_spaces(&function)
    }

    /// Normalizes a single frame into its signature token.
    ///
    /// Never fails: a frame with no usable data still renders as a
    /// module/offset token.
    pub fn normalize_frame(&self, frame: &Frame) -> String {
        if let Some(function) = nonempty(frame.function.as_deref()) {
            // A filename ending in .rs means Rust rules apply.
            let is_rust = nonempty(frame.file.as_deref()).is_some()
                && parse_source_file(frame.file.as_deref())
                    .unwrap_or("")
                    .ends_with(".rs");
            if is_rust {
                return self.normalize_rust_function(function, frame.line);
            }
            return self.normalize_cpp_function(function, frame.line);
        }

        // No function; fall back to file and line.
        if let (Some(file), Some(line)) = (
            nonempty(frame.file.as_deref()),
            frame.line.filter(|line| *line != 0),
        ) {
            let trimmed = file.trim_end_matches(['/', '\\']);
            let basename = if trimmed.contains('\\') {
                trimmed.rsplit('\\').next().unwrap_or(trimmed)
            } else {
                trimmed.rsplit('/').next().unwrap_or(trimmed)
            };
            return format!("{basename}#{line}");
        }

        let module = nonempty(frame.module.as_deref());
        let module_offset = nonempty(frame.module_offset.as_deref());

        if module.is_none() && module_offset.is_none() {
            // Prefer the first unloaded module over a bare offset.
            if let Some(unloaded) = frame.unloaded_modules.first() {
                let name = unloaded.module.as_deref().unwrap_or("");
                return match unloaded.offsets.first() {
                    Some(offset) => {
                        format!("(unloaded {name}@{})", strip_leading_zeros(offset))
                    }
                    None => format!("(unloaded {name})"),
                };
            }
            if let Some(offset) = nonempty(frame.offset.as_deref()) {
                return format!("@{}", strip_leading_zeros(offset));
            }
        }

        format!(
            "{}@{}",
            module.unwrap_or(""),
            module_offset.map(strip_leading_zeros).unwrap_or_default()
        )
    }

    /// Normalizes the frames of one thread, expanding inline frames before
    /// the frame that contains them and capping the result at
    /// [`MAXIMUM_FRAMES_TO_CONSIDER`] frames.
    pub fn create_frame_list(&self, thread: &Thread, make_modules_lower_case: bool) -> Vec<String> {
        let mut normalized = Vec::new();
        for frame in &thread.frames {
            for inline in &frame.inlines {
                if normalized.len() >= MAXIMUM_FRAMES_TO_CONSIDER {
                    return normalized;
                }
                let mut inline_frame = Frame {
                    function: inline.function.clone(),
                    file: inline.file.clone(),
                    line: inline.line,
                    ..Default::default()
                };
                fix_missing_module(&mut inline_frame);
                normalized.push(self.normalize_frame(&inline_frame));
            }
            if normalized.len() >= MAXIMUM_FRAMES_TO_CONSIDER {
                return normalized;
            }
            let mut frame = frame.clone();
            fix_missing_module(&mut frame);
            if make_modules_lower_case {
                // Vendor DLL names are case-inconsistent on Windows.
                if let Some(module) = &mut frame.module {
                    *module = module.to_lowercase();
                }
            }
            normalized.push(self.normalize_frame(&frame));
        }
        normalized
    }

    /// Walks normalized frames and joins the relevant ones into the
    /// provisional signature.
    ///
    /// The walk starts at the earliest sentinel occurrence, if any. Then
    /// each frame is handled in order: irrelevant frames are skipped,
    /// prefix frames are appended and the walk continues, and the first
    /// frame that is neither ends the signature. Adjacent duplicate DLL
    /// frames collapse after their `@offset` is trimmed.
    pub fn generate(
        &self,
        source_list: &[String],
        crashed_thread: Option<usize>,
    ) -> GeneratedSignature {
        let mut notes = Vec::new();
        let mut debug_notes = Vec::new();

        // Shorten the list to the earliest matching sentinel.
        let mut sentinel_locations = Vec::new();
        for sentinel in &self.lists.signature_sentinels {
            if !sentinel.applies(source_list) {
                continue;
            }
            if let Some(index) = source_list.iter().position(|f| f == sentinel.value()) {
                sentinel_locations.push(index);
            }
        }
        let source_list = match sentinel_locations.iter().min() {
            Some(&min_index) => {
                debug_notes.push(format!(
                    "sentinel; starting at {:?} index {min_index}",
                    source_list[min_index]
                ));
                &source_list[min_index..]
            }
            None => source_list,
        };

        let mut new_signature_list: Vec<&str> = Vec::new();
        for frame in source_list {
            if self.lists.irrelevant_signature_re.is_match(frame) {
                debug_notes.push(format!("irrelevant; ignoring: {frame:?}"));
                continue;
            }

            let mut frame = frame.as_str();
            // For DLL frames, remove the @offset part and collapse runs of
            // the same DLL into one frame.
            if frame.to_lowercase().contains(".dll") && !frame.starts_with("(unloaded") {
                frame = frame.split('@').next().unwrap_or(frame);
                if new_signature_list.last() == Some(&frame) {
                    continue;
                }
            }

            new_signature_list.push(frame);

            // A frame that isn't a prefix is the last one included.
            if !self.lists.prefix_signature_re.is_match(frame) {
                debug_notes.push(format!("not a prefix; stop: {frame:?}"));
                break;
            }
            debug_notes.push(format!("prefix; continue iterating: {frame:?}"));
        }

        let mut signature = new_signature_list.join(" | ");

        // Explain empty signatures instead of returning nothing.
        if signature.is_empty() {
            match crashed_thread {
                None => {
                    notes.push(
                        "NativeSignatureTool: no crashing thread identified; \
                         no signature could be created"
                            .to_string(),
                    );
                    signature = "EMPTY: no crashing thread identified".to_string();
                }
                Some(thread) => {
                    notes.push(format!(
                        "NativeSignatureTool: no proper signature could be created because \
                         no good data for the crashing thread ({thread}) was found"
                    ));
                    signature = match source_list.first() {
                        Some(first) => first.clone(),
                        None => "EMPTY: no frame data available".to_string(),
                    };
                }
            }
        }

        GeneratedSignature {
            signature,
            notes,
            debug_notes,
        }
    }
}
