// src/io/serial/framer.rs
//
// Newline framing for the device line protocol.
// Bytes arrive from the port in arbitrary chunks; the framer accumulates them
// and hands back one complete line per `\n`. Lines longer than `max_length`
// (not counting a CRLF's `\r`) are force-split so a device that never sends a
// newline cannot grow the buffer without bound; every piece of a split line is
// marked incomplete.

const NEWLINE: u8 = b'\n';

/// A complete line extracted from the serial stream (delimiter removed)
#[derive(Debug, Clone, PartialEq)]
pub struct LineFrame {
    pub bytes: Vec<u8>,
    /// Whether this line was force-split on max length
    pub incomplete: bool,
}

impl LineFrame {
    /// Decode as text, substituting invalid UTF-8 sequences.
    pub fn decode(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

pub struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
    /// Current line has already been force-split
    overflowed: bool,
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::new(),
            max_length: max_length.max(1),
            overflowed: false,
        }
    }

    /// Feed bytes and return every line completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Vec<LineFrame> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == NEWLINE {
                let line: Vec<u8> = self.buffer.drain(..).collect();
                if !line.is_empty() {
                    lines.push(LineFrame {
                        bytes: line,
                        incomplete: self.overflowed,
                    });
                }
                self.overflowed = false;
                continue;
            }

            self.buffer.push(byte);

            // Force split once the line content exceeds max length
            if self.content_len() > self.max_length {
                self.overflowed = true;
                lines.push(LineFrame {
                    bytes: self.buffer.drain(..).collect(),
                    incomplete: true,
                });
            }
        }

        lines
    }

    /// Drop any partial line, returning how many bytes were held.
    ///
    /// Called when the stream breaks so the head of a line cut off by a
    /// disconnect is not glued onto the first line after it.
    pub fn discard_partial(&mut self) -> usize {
        self.overflowed = false;
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }

    // A trailing `\r` may be the first half of a CRLF and is not counted.
    fn content_len(&self) -> usize {
        match self.buffer.last() {
            Some(b'\r') => self.buffer.len() - 1,
            _ => self.buffer.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
