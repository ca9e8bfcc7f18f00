//! Bytes to fragments.
//!
//! Transport chunks do not line up with fragments: one chunk may carry
//! several fragments, and one fragment may span several chunks. The decoder
//! buffers text and cuts it at fragment boundaries:
//!
//! - a script fragment runs from `<script` through its `</script>`;
//! - a message fragment runs from `<img` through its `<br>`, or up to the
//!   next `<script` if the line break never came. Inline `<img>` icons inside
//!   a message do not start a new fragment;
//! - anything else between fragments is passed on as-is and discarded later
//!   by the parser.
//!
//! Incomplete UTF-8 sequences are held as bytes until the rest arrives.

use tracing::{debug, trace};

/// Upper bound on buffered text before it is flushed as one fragment.
const MAX_PENDING: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    Message,
    Script,
}

/// Incremental fragment decoder for one stream.
#[derive(Debug, Default)]
pub struct FragmentDecoder {
    /// Decoded text not yet cut into fragments.
    text: String,
    /// Trailing bytes of an unfinished UTF-8 sequence.
    partial: Vec<u8>,
}

impl FragmentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns the fragments it completes, in
    /// stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let complete = utf8_complete_len(&self.partial);
        if complete > 0 {
            self.text
                .push_str(&String::from_utf8_lossy(&self.partial[..complete]));
            self.partial.drain(..complete);
        }

        let (mut fragments, consumed) = split_fragments(&self.text);
        self.text.drain(..consumed);

        if self.text.len() >= MAX_PENDING {
            debug!(
                target: "chatbridge::channel",
                buffered = self.text.len(),
                "Unterminated fragment exceeded buffer limit, flushing"
            );
            let flushed = std::mem::take(&mut self.text);
            if !flushed.trim().is_empty() {
                fragments.push(flushed);
            }
        } else if !self.text.is_empty() {
            trace!(
                target: "chatbridge::channel",
                buffered = self.text.len(),
                "Holding incomplete fragment"
            );
        }

        fragments
    }

    /// Number of bytes waiting for the rest of a fragment.
    pub fn pending_len(&self) -> usize {
        self.text.len() + self.partial.len()
    }
}

/// Cut `text` into complete fragments. Returns them with the number of bytes
/// consumed; the rest is an unfinished fragment.
fn split_fragments(text: &str) -> (Vec<String>, usize) {
    // ASCII lowercasing keeps byte offsets intact.
    let lower = text.to_ascii_lowercase();
    let mut fragments = Vec::new();
    let mut pos = 0;

    loop {
        let Some((start, kind)) = next_start(&lower, pos) else {
            // Keep a trailing `<scr` or `<im` that may still become a start.
            let hold = partial_start(&lower, pos).unwrap_or(text.len());
            push_fragment(&mut fragments, &text[pos..hold]);
            return (fragments, hold);
        };

        if start > pos {
            push_fragment(&mut fragments, &text[pos..start]);
            pos = start;
        }

        let end = match kind {
            Start::Script => script_end(&lower, start),
            Start::Message => message_end(&lower, start),
        };
        match end {
            Some(end) => {
                push_fragment(&mut fragments, &text[start..end]);
                pos = end;
            }
            None => return (fragments, pos),
        }
    }
}

fn push_fragment(fragments: &mut Vec<String>, fragment: &str) {
    if !fragment.trim().is_empty() {
        fragments.push(fragment.to_string());
    }
}

/// Tag name at `i` (just after `<`) followed by whitespace, `>` or `/`.
fn tag_at(lower: &str, i: usize, name: &str) -> bool {
    let rest = &lower[i + 1..];
    rest.starts_with(name)
        && rest[name.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
}

fn start_at(lower: &str, i: usize) -> Option<Start> {
    if tag_at(lower, i, "img") {
        Some(Start::Message)
    } else if tag_at(lower, i, "script") {
        Some(Start::Script)
    } else {
        None
    }
}

fn next_start(lower: &str, from: usize) -> Option<(usize, Start)> {
    lower[from..]
        .match_indices('<')
        .find_map(|(i, _)| start_at(lower, from + i).map(|kind| (from + i, kind)))
}

/// Offset of a trailing `<` that could grow into a fragment start.
fn partial_start(lower: &str, from: usize) -> Option<usize> {
    let i = from + lower[from..].rfind('<')?;
    let tail = &lower[i..];
    ("<img".starts_with(tail) || "<script".starts_with(tail)).then_some(i)
}

/// End of the script block opened at `start`, just past `</script>`.
fn script_end(lower: &str, start: usize) -> Option<usize> {
    let close = start + lower[start..].find("</script")?;
    let gt = close + lower[close..].find('>')?;
    Some(gt + 1)
}

/// End of the message opened at `start`: just past its `<br>`, or at the
/// next script start.
fn message_end(lower: &str, start: usize) -> Option<usize> {
    for (i, _) in lower[start + 1..].match_indices('<') {
        let at = start + 1 + i;
        if tag_at(lower, at, "br") {
            let gt = at + lower[at..].find('>')?;
            return Some(gt + 1);
        }
        if start_at(lower, at) == Some(Start::Script) {
            return Some(at);
        }
    }
    None
}

/// Length of the longest prefix that does not end inside a UTF-8 sequence.
fn utf8_complete_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most 4 bytes, so only the tail needs checking.
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = if b & 0b1110_0000 == 0b1100_0000 {
            2
        } else if b & 0b1111_0000 == 0b1110_0000 {
            3
        } else if b & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            return len;
        };
        return if back < needed { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FragmentParser;
    use chatbridge_types::{ChatEvent, RoomId};

    fn bodies(fragments: &[String]) -> Vec<String> {
        let parser = FragmentParser::new(RoomId::from("101"));
        fragments
            .iter()
            .filter_map(|f| match parser.parse(f) {
                Some(ChatEvent::Message { body, .. }) => Some(body),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_whole_message_is_one_fragment() {
        let mut decoder = FragmentDecoder::new();
        let out = decoder.push(b"<img src=\"s.gif\"><a>bob</a>: hi<br>\n");
        assert_eq!(out, vec!["<img src=\"s.gif\"><a>bob</a>: hi<br>".to_string()]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_coalesced_scripts_are_split() {
        let mut decoder = FragmentDecoder::new();
        let out = decoder.push(
            b"<script>parent.user_add(new parent.User('', 'alice', 1));</script>\
              <script>user_remove('bob');</script>",
        );
        assert_eq!(
            out,
            vec![
                "<script>parent.user_add(new parent.User('', 'alice', 1));</script>".to_string(),
                "<script>user_remove('bob');</script>".to_string(),
            ]
        );
    }

    #[test]
    fn test_coalesced_message_and_script_are_split() {
        let mut decoder = FragmentDecoder::new();
        let out = decoder.push(
            b"<img src=\"s.gif\"><a>bob</a>: hi<br><script>user_remove('bob');</script>",
        );
        assert_eq!(out.len(), 2);
        assert_eq!(bodies(&out), vec!["hi"]);
        assert!(out[1].starts_with("<script>"));
    }

    #[test]
    fn test_split_message_waits_for_line_break() {
        let mut decoder = FragmentDecoder::new();
        assert!(decoder.push(b"<img src=\"s.gif\"><a>bob</a>: hello wo").is_empty());
        let out = decoder.push(b"rld<br>");
        assert_eq!(bodies(&out), vec!["hello world"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_inline_icons_do_not_split_message() {
        let mut decoder = FragmentDecoder::new();
        let out = decoder.push(
            b"<img src=\"s.gif\"><a>bob</a>: <img border=\"0\" src=\"/img/vip/smile.gif\"> moi<br>",
        );
        assert_eq!(out.len(), 1);
        assert_eq!(bodies(&out), vec!["moi"]);
    }

    #[test]
    fn test_message_without_line_break_ends_at_script() {
        let mut decoder = FragmentDecoder::new();
        let out = decoder.push(b"<img src=\"s.gif\"><a>bob</a>: hi<script>user_remove('bob');</script>");
        assert_eq!(out.len(), 2);
        assert_eq!(bodies(&out), vec!["hi"]);
    }

    #[test]
    fn test_split_utf8_sequence_is_held() {
        let mut decoder = FragmentDecoder::new();
        let bytes = "<img src=\"s.gif\"><a>bob</a>: hyvää<br>".as_bytes();
        // Inside the second two-byte "ä".
        let split = bytes.len() - "<br>".len() - 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        let out = decoder.push(&bytes[split..]);
        assert_eq!(bodies(&out), vec!["hyv\u{e4}\u{e4}"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_unterminated_script_waits_for_close() {
        let mut decoder = FragmentDecoder::new();
        assert!(decoder.push(b"<script>parent.user_add(").is_empty());
        let out = decoder.push(b"new parent.User('', 'alice'));</script>");
        assert_eq!(
            out,
            vec!["<script>parent.user_add(new parent.User('', 'alice'));</script>".to_string()]
        );
    }

    #[test]
    fn test_split_start_tag_is_held() {
        let mut decoder = FragmentDecoder::new();
        assert!(decoder.push(b"<scr").is_empty());
        assert_eq!(decoder.pending_len(), 4);
        let out = decoder.push(b"ipt>user_remove('bob');</script>");
        assert_eq!(out, vec!["<script>user_remove('bob');</script>".to_string()]);
    }

    #[test]
    fn test_noise_is_passed_through() {
        let mut decoder = FragmentDecoder::new();
        assert_eq!(decoder.push(b"<p>noise</p>"), vec!["<p>noise</p>".to_string()]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_whitespace_only_chunk_yields_nothing() {
        let mut decoder = FragmentDecoder::new();
        assert!(decoder.push(b" \r\n").is_empty());
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut decoder = FragmentDecoder::new();
        let out = decoder.push(&[b'a', 0xff, b'b']);
        assert_eq!(out, vec!["a\u{fffd}b".to_string()]);
    }

    #[test]
    fn test_oversized_fragment_is_flushed() {
        let mut decoder = FragmentDecoder::new();
        let mut chunk = b"<script>".to_vec();
        chunk.extend(std::iter::repeat_n(b'x', MAX_PENDING));
        let out = decoder.push(&chunk);
        assert_eq!(out.len(), 1);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_utf8_complete_len() {
        assert_eq!(utf8_complete_len(b"abc"), 3);
        assert_eq!(utf8_complete_len(&[b'a', 0xc3]), 1);
        assert_eq!(utf8_complete_len(&[b'a', 0xc3, 0xa4]), 3);
        assert_eq!(utf8_complete_len(&[0xe2, 0x82]), 0);
        assert_eq!(utf8_complete_len(&[0xf0, 0x9f, 0x98, 0x80]), 4);
    }
}
