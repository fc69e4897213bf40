//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks can split lines (and multi-byte characters) anywhere, so
//! bytes are held until a full line is available. Only `data` fields matter
//! here; comments and the `event`/`id`/`retry` fields are skipped.

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, unterminated line
    pending: Vec<u8>,
    /// `data` lines of the event being assembled
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the data of every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut completed = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(data) = self.process_line(&line) {
                completed.push(data);
            }
        }
        completed
    }

    /// Drop any partially received event.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.data.clear();
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        let data = self.data.join("\n");
        self.data.clear();
        if data.is_empty() {
            None
        } else {
            Some(data)
        }
    }
}
