//! Keystroke handling for the interactive command line
//!
//! The buffer only ever holds a string the grammar accepts: a keystroke
//! that would make it invalid is swallowed. A few control keys bypass the
//! buffer entirely, mirroring what the game itself expects mid-round.

use crate::commands::Grammar;
use shared::{CHAT_ESCAPE, MAX_PACKET};

const CTRL_D: char = '\u{4}';
const CTRL_L: char = '\u{c}';
const BACKSPACE: char = '\u{8}';
const DEL: char = '\u{7f}';
const ESCAPE: char = '\u{1b}';

/// What the caller should do after feeding one keystroke.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Transmit this finished line (buffer has been cleared).
    Submit(String),
    /// Transmit this single character immediately, outside the buffer.
    SendNow(char),
    /// The rendering changed; re-echo it.
    Echo(String),
    /// The keystroke was swallowed; nothing to do.
    Ignored,
    /// The user asked to leave (Ctrl-D).
    Quit,
}

/// Drains complete UTF-8 characters from a raw byte accumulator.
///
/// Terminal reads arrive as bytes, so a multi-byte character can be split
/// across reads. Bytes forming an incomplete trailing sequence stay in the
/// accumulator until the rest arrives; invalid bytes are skipped.
pub fn decode_keys(pending: &mut Vec<u8>) -> Vec<char> {
    let mut keys = Vec::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                keys.extend(text.chars());
                pending.clear();
                return keys;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&pending[..valid]) {
                    keys.extend(text.chars());
                }
                match e.error_len() {
                    Some(bad) => {
                        pending.drain(..valid + bad);
                    }
                    None => {
                        pending.drain(..valid);
                        return keys;
                    }
                }
            }
        }
    }
}

/// Incrementally validated input buffer.
pub struct InputBuffer {
    buf: String,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// The raw text typed so far.
    pub fn current(&self) -> &str {
        &self.buf
    }

    /// Grammar rendering of the current buffer.
    pub fn rendering(&self) -> String {
        Grammar::shared()
            .validate(&self.buf)
            .map(|v| v.rendering)
            .unwrap_or_default()
    }

    /// Feeds one keystroke through the buffer.
    pub fn handle_key(&mut self, ch: char) -> Action {
        match ch {
            CTRL_D => Action::Quit,
            // Refresh request: the game redraws, so pass it straight on.
            CTRL_L => Action::SendNow(CTRL_L),
            // A lone space answers end-of-round prompts; send it at once
            // unless we are in the middle of a chat line.
            ' ' if !self.buf.starts_with(CHAT_ESCAPE) => Action::SendNow(' '),
            '\r' | '\n' => {
                let valid = Grammar::shared().validate(&self.buf);
                match valid {
                    Some(v) if v.submittable => Action::Submit(std::mem::take(&mut self.buf)),
                    _ => Action::Ignored,
                }
            }
            BACKSPACE | DEL => {
                if self.buf.pop().is_some() {
                    Action::Echo(self.rendering())
                } else {
                    Action::Ignored
                }
            }
            ESCAPE => {
                self.buf.clear();
                Action::Echo(String::new())
            }
            ch => {
                // Byte budget: the char's encoding plus the framing newline.
                if self.buf.len() + ch.len_utf8() + 1 > MAX_PACKET {
                    return Action::Ignored;
                }
                let mut candidate = self.buf.clone();
                candidate.push(ch);
                match Grammar::shared().validate(&candidate) {
                    Some(v) => {
                        self.buf = candidate;
                        Action::Echo(v.rendering)
                    }
                    None => Action::Ignored,
                }
            }
        }
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_string(buf: &mut InputBuffer, s: &str) {
        for ch in s.chars() {
            buf.handle_key(ch);
        }
    }

    #[test]
    fn test_valid_keystrokes_accumulate() {
        let mut buf = InputBuffer::new();
        assert_eq!(buf.handle_key('a'), Action::Echo("a:".to_string()));
        assert_eq!(buf.handle_key('a'), Action::Echo("a: altitude:".to_string()));
        assert_eq!(
            buf.handle_key('5'),
            Action::Echo("a: altitude: 5000 feet".to_string())
        );
        assert_eq!(buf.current(), "aa5");
    }

    #[test]
    fn test_invalid_keystroke_swallowed() {
        let mut buf = InputBuffer::new();
        buf.handle_key('a');
        assert_eq!(buf.handle_key('!'), Action::Ignored);
        assert_eq!(buf.current(), "a");
    }

    #[test]
    fn test_enter_submits_only_when_submittable() {
        let mut buf = InputBuffer::new();
        type_string(&mut buf, "aa");
        assert_eq!(buf.handle_key('\r'), Action::Ignored);
        assert_eq!(buf.current(), "aa");

        buf.handle_key('5');
        assert_eq!(buf.handle_key('\r'), Action::Submit("aa5".to_string()));
        assert_eq!(buf.current(), "");
    }

    #[test]
    fn test_enter_on_empty_buffer_submits_empty_line() {
        let mut buf = InputBuffer::new();
        assert_eq!(buf.handle_key('\n'), Action::Submit(String::new()));
    }

    #[test]
    fn test_chat_line() {
        let mut buf = InputBuffer::new();
        type_string(&mut buf, "/hi there");
        assert_eq!(buf.current(), "/hi there");
        assert_eq!(
            buf.handle_key('\r'),
            Action::Submit("/hi there".to_string())
        );
    }

    #[test]
    fn test_lone_chat_escape_not_submittable() {
        let mut buf = InputBuffer::new();
        buf.handle_key('/');
        assert_eq!(buf.handle_key('\r'), Action::Ignored);
    }

    #[test]
    fn test_space_sent_immediately_outside_chat() {
        let mut buf = InputBuffer::new();
        assert_eq!(buf.handle_key(' '), Action::SendNow(' '));
        assert_eq!(buf.current(), "");
    }

    #[test]
    fn test_space_buffered_inside_chat() {
        let mut buf = InputBuffer::new();
        type_string(&mut buf, "/a b");
        assert_eq!(buf.current(), "/a b");
    }

    #[test]
    fn test_ctrl_l_passthrough() {
        let mut buf = InputBuffer::new();
        assert_eq!(buf.handle_key('\u{c}'), Action::SendNow('\u{c}'));
    }

    #[test]
    fn test_ctrl_d_quits() {
        let mut buf = InputBuffer::new();
        assert_eq!(buf.handle_key('\u{4}'), Action::Quit);
    }

    #[test]
    fn test_backspace() {
        let mut buf = InputBuffer::new();
        type_string(&mut buf, "aa");
        assert_eq!(buf.handle_key('\u{8}'), Action::Echo("a:".to_string()));
        assert_eq!(buf.current(), "a");
        assert_eq!(buf.handle_key('\u{7f}'), Action::Echo(String::new()));
        assert_eq!(buf.handle_key('\u{8}'), Action::Ignored);
    }

    #[test]
    fn test_escape_clears() {
        let mut buf = InputBuffer::new();
        type_string(&mut buf, "aa5");
        assert_eq!(buf.handle_key('\u{1b}'), Action::Echo(String::new()));
        assert_eq!(buf.current(), "");
    }

    #[test]
    fn test_decode_keys_reassembles_split_utf8() {
        let mut pending = Vec::new();
        pending.extend_from_slice(&[0xc3]); // first byte of 'é'
        assert_eq!(decode_keys(&mut pending), Vec::<char>::new());
        assert_eq!(pending, vec![0xc3]);

        pending.extend_from_slice(&[0xa9, b'x']);
        assert_eq!(decode_keys(&mut pending), vec!['é', 'x']);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_keys_skips_invalid_bytes() {
        let mut pending = vec![b'a', 0xff, b'b'];
        assert_eq!(decode_keys(&mut pending), vec!['a', 'b']);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_multibyte_chat_char_buffers_and_counts_bytes() {
        let mut buf = InputBuffer::new();
        type_string(&mut buf, "/caf");
        assert_eq!(
            buf.handle_key('é'),
            Action::Echo("chat: café".to_string())
        );
        assert_eq!(buf.current(), "/café");

        // Near the packet cap a two-byte char must not squeeze past the
        // byte budget where a one-byte char still fits.
        let mut buf = InputBuffer::new();
        buf.handle_key('/');
        while buf.current().len() < MAX_PACKET - 2 {
            buf.handle_key('x');
        }
        assert_eq!(buf.handle_key('é'), Action::Ignored);
        assert!(matches!(buf.handle_key('x'), Action::Echo(_)));
    }

    #[test]
    fn test_buffer_capacity_cap() {
        let mut buf = InputBuffer::new();
        buf.handle_key('/');
        for _ in 0..MAX_PACKET {
            buf.handle_key('x');
        }
        assert!(buf.current().len() + 2 <= MAX_PACKET + 1);
        assert_eq!(buf.handle_key('x'), Action::Ignored);
    }
}
