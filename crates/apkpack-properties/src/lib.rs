//! Reader and writer for the Java `.properties` text format.
//!
//! Incremental build state (the known-files ledger, the dex rename table) is
//! persisted in this format so that it stays readable by the tools that
//! produced it originally. Reading follows the `java.util.Properties` rules
//! (logical lines, `\` continuations, `#`/`!` comments, `\uXXXX` escapes);
//! writing mirrors `Properties.store`.

use std::fmt::Write as _;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyEntry {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertiesFile {
    pub entries: Vec<PropertyEntry>,
}

impl PropertiesFile {
    #[must_use]
    pub fn by_key(&self, key: &str) -> impl Iterator<Item = &PropertyEntry> {
        let key = key.to_string();
        self.entries.iter().filter(move |e| e.key == key)
    }

    /// Returns the effective value for `key`.
    ///
    /// Like `java.util.Properties`, a key that appears more than once takes
    /// the last value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Appends `key = value`, replacing any previous value for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.entries.retain(|e| e.key != key);
        self.entries.push(PropertyEntry { key, value });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `.properties` file into key/value entries.
#[must_use]
pub fn parse(text: &str) -> PropertiesFile {
    let chars: Vec<char> = text.chars().collect();
    let mut offset = 0usize;
    let mut entries = Vec::new();

    while offset < chars.len() {
        let line_start = offset;
        let logical = read_logical_line(&chars, &mut offset);
        if let Some((key, value)) = parse_logical_line(&logical) {
            entries.push(PropertyEntry { key, value });
        }

        // Ensure we always make progress even on pathological inputs.
        if offset == line_start {
            offset += 1;
        }
    }

    PropertiesFile { entries }
}

fn read_logical_line(chars: &[char], offset: &mut usize) -> Vec<char> {
    let mut out = Vec::new();
    let mut first_segment = true;

    loop {
        let segment_start = *offset;
        let mut line_end = segment_start;
        while line_end < chars.len() && chars[line_end] != '\n' && chars[line_end] != '\r' {
            line_end += 1;
        }

        // Does the physical line end with an unescaped `\`?
        let segment = &chars[segment_start..line_end];
        let continues = !(first_segment && is_comment(segment))
            && ends_with_unescaped_backslash(segment);
        first_segment = false;
        let copy_end = if continues {
            line_end.saturating_sub(1)
        } else {
            line_end
        };
        out.extend_from_slice(&chars[segment_start..copy_end]);

        // Consume `\n`, `\r` or `\r\n`.
        *offset = line_end;
        if *offset < chars.len() && chars[*offset] == '\r' {
            *offset += 1;
        }
        if *offset < chars.len() && chars[*offset] == '\n' {
            *offset += 1;
        }

        if !continues || *offset >= chars.len() {
            break;
        }

        // Continuation: skip leading whitespace on the next physical line.
        while *offset < chars.len() && is_whitespace(chars[*offset]) {
            *offset += 1;
        }
    }

    out
}

fn is_comment(line: &[char]) -> bool {
    matches!(
        line.iter().find(|c| !is_whitespace(**c)),
        Some('#') | Some('!')
    )
}

fn ends_with_unescaped_backslash(line: &[char]) -> bool {
    let backslashes = line.iter().rev().take_while(|c| **c == '\\').count();
    backslashes % 2 == 1
}

fn parse_logical_line(line: &[char]) -> Option<(String, String)> {
    let mut i = 0usize;
    while i < line.len() && is_whitespace(line[i]) {
        i += 1;
    }

    if i >= line.len() || line[i] == '#' || line[i] == '!' {
        return None;
    }

    let key_start = i;
    while i < line.len() {
        match line[i] {
            '\\' => i += 2,
            '=' | ':' => break,
            c if is_whitespace(c) => break,
            _ => i += 1,
        }
    }
    let key_end = i.min(line.len());

    while i < line.len() && is_whitespace(line[i]) {
        i += 1;
    }
    if i < line.len() && (line[i] == '=' || line[i] == ':') {
        i += 1;
    }
    while i < line.len() && is_whitespace(line[i]) {
        i += 1;
    }

    let key = unescape(&line[key_start..key_end]);
    let value = unescape(&line[i.min(line.len())..]);
    Some((key, value))
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0C')
}

fn unescape(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    let mut pending_high: Option<u16> = None;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            flush_surrogate(&mut out, &mut pending_high);
            out.push(c);
            i += 1;
            continue;
        }

        i += 1;
        let Some(&escaped) = chars.get(i) else {
            break;
        };
        match escaped {
            'u' => match parse_hex4(chars.get(i + 1..i + 5)) {
                Some(unit) => {
                    push_utf16_unit(&mut out, &mut pending_high, unit);
                    i += 4;
                }
                None => {
                    flush_surrogate(&mut out, &mut pending_high);
                    out.push('u');
                }
            },
            't' => push_plain(&mut out, &mut pending_high, '\t'),
            'n' => push_plain(&mut out, &mut pending_high, '\n'),
            'r' => push_plain(&mut out, &mut pending_high, '\r'),
            'f' => push_plain(&mut out, &mut pending_high, '\x0C'),
            other => push_plain(&mut out, &mut pending_high, other),
        }
        i += 1;
    }

    flush_surrogate(&mut out, &mut pending_high);
    out
}

fn push_plain(out: &mut String, pending_high: &mut Option<u16>, c: char) {
    flush_surrogate(out, pending_high);
    out.push(c);
}

fn push_utf16_unit(out: &mut String, pending_high: &mut Option<u16>, unit: u16) {
    if let Some(high) = pending_high.take() {
        if (0xDC00..0xE000).contains(&unit) {
            let combined = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(unit) - 0xDC00);
            out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
            return;
        }
        out.push(char::REPLACEMENT_CHARACTER);
    }

    if (0xD800..0xDC00).contains(&unit) {
        *pending_high = Some(unit);
    } else {
        out.push(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
}

fn flush_surrogate(out: &mut String, pending_high: &mut Option<u16>) {
    if pending_high.take().is_some() {
        out.push(char::REPLACEMENT_CHARACTER);
    }
}

fn parse_hex4(digits: Option<&[char]>) -> Option<u16> {
    let digits = digits?;
    let mut value = 0u16;
    for c in digits {
        value = (value << 4) | c.to_digit(16)? as u16;
    }
    Some(value)
}

/// Serialize entries the way `Properties.store` does.
///
/// `comment` (when present) is written as a leading `#` line. Non-ASCII
/// characters are written as `\uXXXX` escapes so the output is pure ASCII.
#[must_use]
pub fn to_string(file: &PropertiesFile, comment: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(comment) = comment {
        for line in comment.lines() {
            out.push('#');
            out.push_str(line);
            out.push('\n');
        }
    }
    for entry in &file.entries {
        escape_into(&mut out, &entry.key, true);
        out.push('=');
        escape_into(&mut out, &entry.value, false);
        out.push('\n');
    }
    out
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (idx, c) in text.chars().enumerate() {
        match c {
            ' ' if idx == 0 || is_key => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0C' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c if (' '..='~').contains(&c) => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04X}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_basic_entries() {
        let text = "# comment\ncount=2\n0.base = /out/dex\n";
        let parsed = parse(text);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.get("count"), Some("2"));
        assert_eq!(parsed.get("0.base"), Some("/out/dex"));
    }

    #[test]
    fn supports_line_continuations_and_unicode_escapes() {
        let text = "greeting=hello\\\n  world\nunicode=\\u0041\r\nemoji=\\uD83D\\uDE00\n";
        let parsed = parse(text);
        assert_eq!(parsed.get("greeting"), Some("helloworld"));
        assert_eq!(parsed.get("unicode"), Some("A"));
        assert_eq!(parsed.get("emoji"), Some("\u{1F600}"));
    }

    #[test]
    fn later_keys_override_earlier_ones() {
        let parsed = parse("a=1\na=2\n");
        assert_eq!(parsed.by_key("a").count(), 2);
        assert_eq!(parsed.get("a"), Some("2"));
    }

    #[test]
    fn writer_escapes_separators_and_non_ascii() {
        let mut file = PropertiesFile::default();
        file.set("0.file", "C:\\out\\a=b:c.dex");
        file.set("1.file", " leading space/é");
        let text = to_string(&file, Some("Internal package file, do not edit."));

        assert_eq!(
            text,
            "#Internal package file, do not edit.\n\
             0.file=C\\:\\\\out\\\\a\\=b\\:c.dex\n\
             1.file=\\ leading space/\\u00E9\n"
        );
        assert_eq!(parse(&text), file);
    }

    #[test]
    fn comment_lines_ending_in_backslash_do_not_continue() {
        let parsed = parse("# trailing \\\nkey=value\n");
        assert_eq!(parsed.get("key"), Some("value"));
    }
}
