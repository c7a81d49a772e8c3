// SPDX-License-Identifier: Apache-2.0

/// Longest line held back waiting for a terminator. Anything longer is
/// emitted in pieces of this size.
pub(crate) const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into LF-terminated lines. Bytes after the last LF,
/// including a partial multi-byte character, are carried to the next push.
#[derive(Debug)]
pub(crate) struct LineDecoder {
    pending: Vec<u8>,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            max_line: MAX_LINE_BYTES,
        }
    }
}

fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

impl LineDecoder {
    #[cfg(test)]
    pub(crate) fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            self.split_oversized(&mut lines);
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(decode(line));
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        self.split_oversized(&mut lines);
        lines
    }

    fn split_oversized(&mut self, lines: &mut Vec<String>) {
        while self.pending.len() > self.max_line {
            let head: Vec<u8> = self.pending.drain(..self.max_line).collect();
            lines.push(decode(head));
        }
    }

    /// Bytes consumed but not yet part of a completed line.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn reset(&mut self) {
        self.pending.clear();
    }
}
