//! Signature list configuration.
//!
//! Four lists parameterize the frame normalizer and the signature walker:
//! patterns for irrelevant frames, patterns for prefix frames, patterns for
//! functions that keep their line number, and sentinel frames. They load
//! once, from the bundled defaults or from an override directory, and are
//! read-only afterwards, so one [`SignatureLists`] can be shared across
//! concurrent generation calls.

use regex::Regex;
use std::path::Path;

const IRRELEVANT_FILE: &str = "irrelevant_signature_re.txt";
const PREFIX_FILE: &str = "prefix_signature_re.txt";
const LINE_NUMBERS_FILE: &str = "signatures_with_line_numbers_re.txt";
const SENTINELS_FILE: &str = "signature_sentinels.txt";

const BUNDLED_IRRELEVANT: &str = include_str!("../siglists/irrelevant_signature_re.txt");
const BUNDLED_PREFIX: &str = include_str!("../siglists/prefix_signature_re.txt");
const BUNDLED_LINE_NUMBERS: &str = include_str!("../siglists/signatures_with_line_numbers_re.txt");
const BUNDLED_SENTINELS: &str = include_str!("../siglists/signature_sentinels.txt");

/// A signature list failed to load.
#[derive(Debug, thiserror::Error)]
pub enum SigListError {
    /// A line did not compile as a regex.
    #[error("{file} line {line}: invalid pattern {pattern:?}: {source}")]
    BadPattern {
        file: String,
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// A list file could not be read.
    #[error("failed to read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// A sentinel frame. When a sentinel occurs in a frame list, the signature
/// walk starts at the earliest occurrence instead of at the top of the
/// stack.
#[derive(Clone, Debug)]
pub enum Sentinel {
    /// Matches a frame exactly.
    Plain(String),
    /// Matches a frame exactly, but only when the predicate accepts the
    /// whole frame list.
    Conditional(&'static str, fn(&[String]) -> bool),
}

impl Sentinel {
    /// The frame text this sentinel matches.
    pub fn value(&self) -> &str {
        match self {
            Sentinel::Plain(value) => value,
            Sentinel::Conditional(value, _) => value,
        }
    }

    /// Whether this sentinel applies to the given frame list.
    pub fn applies(&self, frames: &[String]) -> bool {
        match self {
            Sentinel::Plain(_) => true,
            Sentinel::Conditional(_, condition) => condition(frames),
        }
    }
}

const PAIRED_MINIDUMP_WRITER: &str = "CrashReporter::CreatePairedMinidumps(void*, unsigned long, \
     nsAString_internal*, nsILocalFile**, nsILocalFile**)";

fn paired_minidumps_on_stack(frames: &[String]) -> bool {
    frames.iter().any(|frame| frame == PAIRED_MINIDUMP_WRITER)
}

// The sentinel list is data except for this entry, which only applies when
// the paired-minidump writer is also on the stack.
fn conditional_sentinels() -> Vec<Sentinel> {
    vec![Sentinel::Conditional(
        "mozilla::ipc::RPCChannel::Call(IPC::Message*, IPC::Message*)",
        paired_minidumps_on_stack,
    )]
}

/// The compiled signature lists.
#[derive(Debug)]
pub struct SignatureLists {
    /// Frames skipped by the walker.
    pub irrelevant_signature_re: Regex,
    /// Frames appended without ending the walk.
    pub prefix_signature_re: Regex,
    /// Functions whose signature keeps the source line number.
    pub signatures_with_line_numbers_re: Regex,
    /// Frames the walk restarts from.
    pub signature_sentinels: Vec<Sentinel>,
}

impl SignatureLists {
    /// The lists bundled with the crate.
    pub fn bundled() -> Result<Self, SigListError> {
        Self::from_contents(
            BUNDLED_IRRELEVANT,
            BUNDLED_PREFIX,
            BUNDLED_LINE_NUMBERS,
            BUNDLED_SENTINELS,
        )
    }

    /// Loads the four list files from a directory, for deployments that
    /// carry their own lists.
    pub fn from_dir(dir: &Path) -> Result<Self, SigListError> {
        let read = |file: &str| {
            std::fs::read_to_string(dir.join(file)).map_err(|source| SigListError::Read {
                file: dir.join(file).display().to_string(),
                source,
            })
        };
        Self::from_contents(
            &read(IRRELEVANT_FILE)?,
            &read(PREFIX_FILE)?,
            &read(LINE_NUMBERS_FILE)?,
            &read(SENTINELS_FILE)?,
        )
    }

    fn from_contents(
        irrelevant: &str,
        prefix: &str,
        line_numbers: &str,
        sentinels: &str,
    ) -> Result<Self, SigListError> {
        let mut signature_sentinels: Vec<Sentinel> = parse_lines(SENTINELS_FILE, sentinels, false)?
            .into_iter()
            .map(Sentinel::Plain)
            .collect();
        signature_sentinels.extend(conditional_sentinels());

        Self::from_parts(
            &parse_lines(IRRELEVANT_FILE, irrelevant, true)?,
            &parse_lines(PREFIX_FILE, prefix, true)?,
            &parse_lines(LINE_NUMBERS_FILE, line_numbers, true)?,
            signature_sentinels,
        )
    }

    /// Builds lists from in-memory patterns. Patterns match at the start of
    /// a frame, like the file-based lists.
    pub fn from_parts<S: AsRef<str>>(
        irrelevant: &[S],
        prefix: &[S],
        line_numbers: &[S],
        signature_sentinels: Vec<Sentinel>,
    ) -> Result<Self, SigListError> {
        Ok(SignatureLists {
            irrelevant_signature_re: compile_alternation(IRRELEVANT_FILE, irrelevant)?,
            prefix_signature_re: compile_alternation(PREFIX_FILE, prefix)?,
            signatures_with_line_numbers_re: compile_alternation(LINE_NUMBERS_FILE, line_numbers)?,
            signature_sentinels,
        })
    }
}

/// Parses one pattern per line; `#` comments and blank lines are skipped.
/// When `validate` is set, each line must compile as a regex on its own so
/// a bad line is reported with its file and line number.
fn parse_lines(file: &str, contents: &str, validate: bool) -> Result<Vec<String>, SigListError> {
    let mut patterns = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if validate {
            if let Err(source) = Regex::new(line) {
                return Err(SigListError::BadPattern {
                    file: file.to_string(),
                    line: index + 1,
                    pattern: line.to_string(),
                    source,
                });
            }
        }
        patterns.push(line.to_string());
    }
    Ok(patterns)
}

/// Joins patterns into one anchored alternation. Patterns match at the
/// start of the frame text, not anywhere inside it.
fn compile_alternation<S: AsRef<str>>(file: &str, patterns: &[S]) -> Result<Regex, SigListError> {
    let joined = format!(
        "^(?:{})",
        patterns
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("|")
    );
    Regex::new(&joined).map_err(|source| SigListError::BadPattern {
        file: file.to_string(),
        line: 0,
        pattern: joined.clone(),
        source,
    })
}
