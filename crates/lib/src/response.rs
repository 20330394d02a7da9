/// Default capacity of the response buffer, in bytes
pub const RESPONSE_CAPACITY: usize = 2_000_000;

/// Append-only, newline-delimited buffer with a hard byte capacity.
///
/// Once a line does not fit, the buffer is sealed: that line and every later
/// one are dropped, and what was already stored is left untouched.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    text: String,
    capacity: usize,
    sealed: bool,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::with_capacity(RESPONSE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::new(),
            capacity,
            sealed: false,
        }
    }

    /// Append `line` plus a line feed. Returns `false` if the line was dropped.
    pub fn push_line(&mut self, line: &str) -> bool {
        if self.sealed {
            return false;
        }
        if self.text.len() + line.len() + 1 > self.capacity {
            self.sealed = true;
            return false;
        }
        self.text.push_str(line);
        self.text.push('\n');
        true
    }

    /// Whether a line has been dropped for lack of space
    pub fn is_truncated(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}
