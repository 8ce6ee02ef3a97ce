// ── Sandbox: PTY Stream Processor ──────────────────────────────────────────
// Streaming transform between container output and the client. Normalizes
// CRLF to LF (with the CR possibly arriving in the previous chunk), keeps
// ANSI escapes and control bytes intact when configured to, splits oversized
// chunks at a high-water mark, and counts what passes through. It never
// buffers more than one held-back CR.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoneCr {
    /// Drop a `\r` that is not followed by `\n`.
    Drop,
    /// Replace it with `\n`.
    ToLf,
}

#[derive(Debug, Clone)]
pub struct PtyStreamConfig {
    pub preserve_ansi: bool,
    pub preserve_control_chars: bool,
    pub lone_cr: LoneCr,
    /// Output chunks never exceed this many bytes.
    pub high_water_mark: usize,
}

impl Default for PtyStreamConfig {
    fn default() -> Self {
        Self {
            preserve_ansi: true,
            preserve_control_chars: true,
            lone_cr: LoneCr::ToLf,
            high_water_mark: 64 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCounters {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub ansi_sequences: u64,
    pub control_chars: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AnsiState {
    Ground,
    /// Saw ESC, deciding what follows.
    Escape,
    /// Inside a CSI sequence, waiting for the final byte (0x40–0x7E).
    Csi,
}

pub struct PtyStreamProcessor {
    config: PtyStreamConfig,
    counters: StreamCounters,
    /// A chunk ended in `\r`; its fate depends on the next byte.
    pending_cr: bool,
    ansi_state: AnsiState,
}

impl PtyStreamProcessor {
    pub fn new(config: PtyStreamConfig) -> Self {
        PtyStreamProcessor {
            config,
            counters: StreamCounters::default(),
            pending_cr: false,
            ansi_state: AnsiState::Ground,
        }
    }

    pub fn counters(&self) -> StreamCounters {
        self.counters
    }

    /// Transform one incoming chunk into zero or more outgoing chunks, each
    /// bounded by the high-water mark.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.counters.bytes_in += chunk.len() as u64;
        let mut out: Vec<Vec<u8>> = Vec::new();
        let mut current = Vec::with_capacity(chunk.len().min(self.config.high_water_mark));

        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    // CRLF pair — emit a single LF.
                    self.push(&mut out, &mut current, b'\n');
                    continue;
                }
                if self.config.lone_cr == LoneCr::ToLf {
                    self.push(&mut out, &mut current, b'\n');
                }
                // fall through to handle `byte` itself
            }

            self.track_ansi(byte);

            match byte {
                b'\r' => {
                    // Hold; resolved by the next byte (or flush()).
                    self.pending_cr = true;
                }
                0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F => {
                    self.counters.control_chars += 1;
                    if self.config.preserve_control_chars || self.in_ansi_sequence(byte) {
                        self.push(&mut out, &mut current, byte);
                    }
                }
                _ => self.push(&mut out, &mut current, byte),
            }
        }

        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// Resolve a trailing held-back CR at end of stream.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if !self.pending_cr {
            return None;
        }
        self.pending_cr = false;
        if self.config.lone_cr == LoneCr::ToLf {
            self.counters.bytes_out += 1;
            Some(vec![b'\n'])
        } else {
            None
        }
    }

    fn push(&mut self, out: &mut Vec<Vec<u8>>, current: &mut Vec<u8>, byte: u8) {
        current.push(byte);
        self.counters.bytes_out += 1;
        if current.len() >= self.config.high_water_mark {
            out.push(std::mem::take(current));
        }
    }

    fn in_ansi_sequence(&self, byte: u8) -> bool {
        self.config.preserve_ansi && (byte == 0x1B || self.ansi_state != AnsiState::Ground)
    }

    fn track_ansi(&mut self, byte: u8) {
        match self.ansi_state {
            AnsiState::Ground => {
                if byte == 0x1B {
                    self.ansi_state = AnsiState::Escape;
                }
            }
            AnsiState::Escape => {
                self.ansi_state = if byte == b'[' { AnsiState::Csi } else { AnsiState::Ground };
                if byte != b'[' {
                    // Two-byte escape (e.g. ESC c) — counted as one sequence.
                    self.counters.ansi_sequences += 1;
                }
            }
            AnsiState::Csi => {
                if (0x40..=0x7E).contains(&byte) {
                    self.counters.ansi_sequences += 1;
                    self.ansi_state = AnsiState::Ground;
                }
            }
        }
    }
}

impl Default for PtyStreamProcessor {
    fn default() -> Self {
        Self::new(PtyStreamConfig::default())
    }
}
