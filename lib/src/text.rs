//! Text transforms shared by the frame normalizers.
//!
//! These walk symbol text character by character: the grammars track nested
//! delimiters with a depth counter, which a regular expression cannot do.

/// Collapses spans between `open_char` and `close_char` into `replacement`.
///
/// Nested delimiters of the same kind are depth-counted, so the whole
/// outermost span collapses at once. A span survives collapsing when the
/// text before its opening delimiter ends with one of `exceptions` (the
/// delimiter is then treated as plain text and inner spans are still
/// processed independently), or when the span itself contains one of
/// `exceptions`. A span still open at the end of input is collapsed under
/// the same rules.
pub fn collapse(
    text: &str,
    open_char: char,
    close_char: char,
    replacement: &str,
    exceptions: &[&str],
) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut token = String::new();
    let mut depth = 0usize;

    for c in text.chars() {
        if depth == 0 {
            if c == open_char && !exceptions.iter().any(|e| collapsed.ends_with(e)) {
                token.clear();
                token.push(c);
                depth = 1;
            } else {
                collapsed.push(c);
            }
        } else if c == open_char {
            token.push(c);
            depth += 1;
        } else if c == close_char {
            token.push(c);
            depth -= 1;
            if depth == 0 {
                if exceptions.iter().any(|e| token.contains(e)) {
                    collapsed.push_str(&token);
                } else {
                    collapsed.push_str(replacement);
                }
            }
        } else {
            token.push(c);
        }
    }

    if depth > 0 {
        if exceptions.iter().any(|e| token.contains(e)) {
            collapsed.push_str(&token);
        } else {
            collapsed.push_str(replacement);
        }
    }

    collapsed
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '{' => '}',
        '[' => ']',
        '<' => '>',
        '`' => '\'',
        '"' => '"',
        _ => open,
    }
}

/// Drops the storage-class and return-type prefix from a function
/// signature, leaving `name(args)`.
///
/// The text splits into tokens on spaces at delimiter depth zero; spaces
/// inside `()`, `{}`, `[]`, `<>`, backtick/quote pairs, or double quotes do
/// not split. A trailing token that begins with `(` or `[clone` was
/// separated from the function name by a stray space, so trailing tokens
/// are merged back until that is no longer the case.
pub fn drop_prefix_and_return_type(function: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut levels: Vec<char> = Vec::new();

    for c in function.chars() {
        match c {
            '(' | '{' | '[' | '<' | '`' => {
                levels.push(c);
                current.push(c);
            }
            '"' => {
                if levels.last() == Some(&'"') {
                    levels.pop();
                } else {
                    levels.push('"');
                }
                current.push(c);
            }
            ')' | '}' | ']' | '>' | '\'' => {
                if levels.last().map(|&open| closing(open)) == Some(c) {
                    levels.pop();
                }
                current.push(c);
            }
            ' ' if levels.is_empty() => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    tokens.push(current);

    while tokens.len() > 1 {
        let last = &tokens[tokens.len() - 1];
        if !(last.starts_with('(') || last.starts_with("[clone")) {
            break;
        }
        let last = tokens.pop().unwrap_or_default();
        let previous = tokens.pop().unwrap_or_default();
        tokens.push(format!("{previous} {last}"));
    }

    tokens.pop().unwrap_or_default()
}

/// Extracts the file path from a VCS-qualified source reference.
///
/// `hg:hg.mozilla.org/repo:js/src/x.cpp:<rev>` yields `js/src/x.cpp` and
/// `f:\dd\vctools\x.c` yields `\dd\vctools\x.c`; anything else passes
/// through unchanged.
pub fn parse_source_file(source_file: Option<&str>) -> Option<&str> {
    let source_file = source_file?;
    let parts: Vec<&str> = source_file.split(':').collect();
    match parts.len() {
        4 => Some(parts[2]),
        2 => Some(parts[1]),
        _ => Some(source_file),
    }
}

/// Drops non-ASCII and non-printable characters. Space survives; all other
/// whitespace does not.
pub fn drop_bad_characters(text: &str) -> String {
    text.chars()
        .filter(|c| *c == ' ' || c.is_ascii_graphic())
        .collect()
}

/// Strips leading zeros from a hex offset, e.g. `0x0000000000032ec0` to
/// `0x32ec0`. Text that does not parse as hex passes through unchanged.
pub fn strip_leading_zeros(text: &str) -> String {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    match u128::from_str_radix(digits, 16) {
        Ok(value) => format!("0x{value:x}"),
        Err(_) => text.to_string(),
    }
}

/// Removes the space before each `*`, `&`, and `,`, then inserts a space
/// after each `,` that lacks one.
///
/// Two passes, in that order: the comma spacing applies to the text with
/// the pre-punctuation spaces already removed. Only the single space
/// directly before the punctuation is removed.
pub fn fixup_spaces(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut no_spaces = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' && matches!(chars.get(i + 1), Some('*' | '&' | ',')) {
            continue;
        }
        no_spaces.push(c);
    }

    let chars: Vec<char> = no_spaces.chars().collect();
    let mut out = String::with_capacity(no_spaces.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if c == ',' && !matches!(chars.get(i + 1), Some(' ')) {
            out.push(' ');
        }
    }
    out
}
