//! Terminal output processing
//!
//! Scripts run under a pseudo-terminal, so their output carries control
//! sequences. Everything except SGR color/style sequences is stripped
//! before lines reach observers; chunk boundaries may fall mid-line, so
//! line assembly buffers partial lines between chunks.

use once_cell::sync::Lazy;
use regex::Regex;

// OSC sequences (terminal title, hyperlinks): ESC ] ... BEL
static OSC_RE: Lazy<Regex> = Lazy::new(|| Regex::new("\u{1B}\\][^\u{07}]*\u{07}").unwrap());

// Character set selection: ESC ( or ESC ) plus designator
static CHARSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new("\u{1B}[()][AB012]").unwrap());

// Keypad mode: ESC > or ESC =
static KEYPAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new("\u{1B}[>=]").unwrap());

// Control characters other than tab, newline and ESC (kept for SGR)
static CONTROL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\u{00}-\u{08}\u{0B}\u{0C}\u{0E}-\u{1A}\u{1C}-\u{1F}]").unwrap());

/// Strips problematic control sequences while preserving SGR color codes.
///
/// Carriage returns, OSC/charset/keypad sequences and stray control
/// characters are removed; `ESC[...m` styling, tabs and newlines pass
/// through untouched.
#[must_use]
pub fn clean_terminal_output(text: &str) -> String {
    let text = text.replace('\r', "");
    let text = OSC_RE.replace_all(&text, "");
    let text = CHARSET_RE.replace_all(&text, "");
    let text = KEYPAD_RE.replace_all(&text, "");
    CONTROL_RE.replace_all(&text, "").into_owned()
}

/// Flattens a multi-line script into one display line.
#[must_use]
pub fn flatten_script(script: &str) -> String {
    script.replace('\n', "; ")
}

/// Assembles complete output lines from an incremental byte stream.
///
/// A chunk may end mid-line, or even mid-character; raw bytes are
/// buffered and only decoded once a newline completes the line, so a
/// multi-byte UTF-8 sequence split across chunks survives intact. Each
/// completed line is cleaned before it is returned.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    /// Creates an assembler with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the lines it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(clean_terminal_output(&text));
        }
        lines
    }

    /// Flushes the remaining partial line, if any, at stream end.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(clean_terminal_output(&String::from_utf8_lossy(&rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_preserves_plain_text() {
        assert_eq!(clean_terminal_output("hello world"), "hello world");
    }

    #[test]
    fn test_preserves_sgr_colors() {
        let green = "\u{1B}[32mhello\u{1B}[0m";
        assert_eq!(clean_terminal_output(green), green);
    }

    #[test]
    fn test_removes_carriage_returns() {
        assert_eq!(clean_terminal_output("hello\rworld"), "helloworld");
    }

    #[test]
    fn test_removes_osc_sequences() {
        assert_eq!(clean_terminal_output("\u{1B}]0;title\u{07}hello"), "hello");
    }

    #[test]
    fn test_removes_charset_and_keypad_sequences() {
        assert_eq!(clean_terminal_output("\u{1B}(Bok\u{1B}="), "ok");
    }

    #[test]
    fn test_preserves_newlines_and_tabs() {
        assert_eq!(clean_terminal_output("line1\n\tline2"), "line1\n\tline2");
    }

    #[test]
    fn test_flatten_script() {
        assert_eq!(flatten_script("echo a\necho b"), "echo a; echo b");
    }

    #[test]
    fn test_assembler_buffers_partial_lines() {
        let mut assembler = LineAssembler::new();

        assert_eq!(assembler.push_chunk(b"hel"), Vec::<String>::new());
        assert_eq!(assembler.push_chunk(b"lo\nwor"), vec!["hello".to_string()]);
        assert_eq!(assembler.push_chunk(b"ld\n"), vec!["world".to_string()]);
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_assembler_flushes_trailing_line() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push_chunk(b"no newline").is_empty());
        assert_eq!(assembler.finish(), Some("no newline".to_string()));
    }

    #[test]
    fn test_assembler_keeps_multibyte_char_split_across_chunks() {
        let mut assembler = LineAssembler::new();
        let bytes = "héllo\n".as_bytes();

        // Split inside the two-byte é sequence.
        assert!(assembler.push_chunk(&bytes[..2]).is_empty());
        assert_eq!(assembler.push_chunk(&bytes[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_assembler_multiple_lines_in_one_chunk() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push_chunk(b"a\r\nb\nc");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(assembler.finish(), Some("c".to_string()));
    }
}
