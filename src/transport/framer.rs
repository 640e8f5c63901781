use crate::protocol::commands::PROMPT;

/// Splits the port agent byte stream into lines.
///
/// Lines end at `\n` or `\r`; blank lines are skipped. The console prompt is
/// not newline terminated, so a buffer holding only the prompt is released
/// as its own line.
#[derive(Debug)]
pub struct LineFramer {
    partial: String,
    max_len: usize,
    trims: u64,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self { partial: String::new(), max_len, trims: 0 }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find(['\n', '\r']) {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        if self.partial.trim() == PROMPT {
            self.partial.clear();
            lines.push(PROMPT.to_string());
        }

        if self.partial.len() > self.max_len {
            let keep_from = self.partial.len() - self.max_len / 2;
            let cut = (keep_from..self.partial.len())
                .find(|i| self.partial.is_char_boundary(*i))
                .unwrap_or(self.partial.len());
            self.partial.drain(..cut);
            self.trims += 1;
            log::warn!("Line buffer exceeded {} bytes without a terminator; trimmed", self.max_len);
        }

        lines
    }

    /// Number of times an unterminated line was trimmed
    pub fn trims(&self) -> u64 {
        self.trims
    }

    pub fn pending(&self) -> &str {
        &self.partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut framer = LineFramer::new(4096);
        assert!(framer.push(b"SATPAR0229,10.0").is_empty());
        assert_eq!(framer.push(b"1,2206748544,234\r\nSATPAR"), vec!["SATPAR0229,10.01,2206748544,234"]);
        assert_eq!(framer.pending(), "SATPAR");
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut framer = LineFramer::new(4096);
        assert_eq!(framer.push(b"\r\n\r\nCommand Console\r\n\r\n"), vec!["Command Console"]);
    }

    #[test]
    fn test_prompt_released_without_newline() {
        let mut framer = LineFramer::new(4096);
        assert_eq!(framer.push(b"Maximum Frame Rate: 1 Hz\r\n$ "), vec!["Maximum Frame Rate: 1 Hz", "$"]);
        assert_eq!(framer.pending(), "");
    }

    #[test]
    fn test_overflow_trim() {
        let mut framer = LineFramer::new(64);
        framer.push(&[b'x'; 100]);
        assert_eq!(framer.trims(), 1);
        assert_eq!(framer.pending().len(), 32);
    }
}
