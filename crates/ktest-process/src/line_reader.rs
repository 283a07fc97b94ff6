//! Byte-stream reader over an async I/O handle with predicate-driven
//! read-until and deadline (§4.1 LineReader).

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

const READ_CHUNK_SIZE: usize = 4096;

/// Wraps an async byte source and exposes one operation, `read_until`.
///
/// Bytes are accumulated into a growing buffer; after each chunk read the
/// predicate is re-evaluated against the whole buffer. Completed lines are
/// forwarded to an optional callback as they are found, in arrival order.
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    reported_up_to: usize,
}

/// Outcome of a `read_until` call.
pub struct ReadUntilResult {
    /// All bytes accumulated since this LineReader was created (or last reset).
    pub buffer: Vec<u8>,
    pub timed_out: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            reported_up_to: 0,
        }
    }

    /// Drop all accumulated bytes, keeping the underlying reader open.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.reported_up_to = 0;
    }

    /// Reclaim the underlying reader, discarding any buffered bytes not yet
    /// reported. Used when handing a stream off to a different consumer
    /// after a one-off handshake (e.g. the hypervisor login sequence).
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read until `predicate(&buffer)` holds or `deadline` elapses.
    ///
    /// Completed lines (`\n`-terminated) not yet reported are passed to
    /// `line_callback` as they appear. A partial line still in the buffer at
    /// the deadline is never reported to the callback but is retained in the
    /// returned buffer.
    pub async fn read_until(
        &mut self,
        deadline: Instant,
        mut predicate: impl FnMut(&[u8]) -> bool,
        mut line_callback: Option<&mut dyn FnMut(&str)>,
    ) -> ReadUntilResult {
        if predicate(&self.buffer) {
            self.report_new_lines(&mut line_callback);
            return ReadUntilResult {
                buffer: self.buffer.clone(),
                timed_out: false,
            };
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return ReadUntilResult {
                    buffer: self.buffer.clone(),
                    timed_out: true,
                };
            }

            tokio::select! {
                result = self.reader.read(&mut chunk) => {
                    match result {
                        Ok(0) => {
                            // EOF: stop trying to read further, but let the
                            // caller see what the predicate makes of the tail.
                            self.report_new_lines(&mut line_callback);
                            return ReadUntilResult {
                                buffer: self.buffer.clone(),
                                timed_out: !predicate(&self.buffer),
                            };
                        }
                        Ok(n) => {
                            self.buffer.extend_from_slice(&chunk[..n]);
                            self.report_new_lines(&mut line_callback);
                            if predicate(&self.buffer) {
                                return ReadUntilResult {
                                    buffer: self.buffer.clone(),
                                    timed_out: false,
                                };
                            }
                        }
                        Err(_) => {
                            self.report_new_lines(&mut line_callback);
                            return ReadUntilResult {
                                buffer: self.buffer.clone(),
                                timed_out: true,
                            };
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return ReadUntilResult {
                        buffer: self.buffer.clone(),
                        timed_out: true,
                    };
                }
            }
        }
    }

    /// Deliver every complete line not yet reported to the callback.
    fn report_new_lines(&mut self, line_callback: &mut Option<&mut dyn FnMut(&str)>) {
        let Some(callback) = line_callback.as_deref_mut() else {
            // Still need to track `reported_up_to` so a later call with a
            // callback attached does not replay already-arrived lines.
            if let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') {
                self.reported_up_to = last_newline + 1;
            }
            return;
        };

        while let Some(rel_newline) = self.buffer[self.reported_up_to..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let line_end = self.reported_up_to + rel_newline;
            let line = String::from_utf8_lossy(&self.buffer[self.reported_up_to..line_end]);
            callback(line.trim_end_matches('\r'));
            self.reported_up_to = line_end + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_until_matches_sequence() {
        let (mut writer, reader) = duplex(64);
        let mut line_reader = LineReader::new(reader);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"hello\n#TOKEN#").await.unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        let result = line_reader
            .read_until(deadline, |buf| buf.ends_with(b"#TOKEN#"), None)
            .await;

        assert!(!result.timed_out);
        assert_eq!(result.buffer, b"hello\n#TOKEN#");
    }

    #[tokio::test]
    async fn test_read_until_times_out_without_discarding_buffer() {
        let (writer, reader) = duplex(64);
        let mut line_reader = LineReader::new(reader);
        // keep writer alive but never write what the predicate wants
        let _writer = writer;

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = line_reader
            .read_until(deadline, |buf| buf.ends_with(b"never"), None)
            .await;

        assert!(result.timed_out);
        assert!(result.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_line_callback_receives_completed_lines_in_order() {
        let (mut writer, reader) = duplex(256);
        let mut line_reader = LineReader::new(reader);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"one\ntwo\nthree-DONE").await.unwrap();
        });

        let mut seen = Vec::new();
        let mut callback = |line: &str| seen.push(line.to_string());
        let deadline = Instant::now() + Duration::from_secs(2);
        let result = line_reader
            .read_until(
                deadline,
                |buf| buf.ends_with(b"-DONE"),
                Some(&mut callback),
            )
            .await;

        assert!(!result.timed_out);
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_into_inner_returns_the_underlying_reader() {
        let (mut writer, reader) = duplex(64);
        let mut line_reader = LineReader::new(reader);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"handshake-done").await.unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        line_reader
            .read_until(deadline, |buf| buf.ends_with(b"done"), None)
            .await;
        let mut reclaimed = line_reader.into_inner();

        // the reclaimed reader is still live: further bytes can be read from it.
        let mut writer2_buf = [0u8; 1];
        let read_result = tokio::time::timeout(
            Duration::from_millis(50),
            reclaimed.read(&mut writer2_buf),
        )
        .await;
        assert!(read_result.is_err() || read_result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_partial_line_at_deadline_not_reported_but_retained() {
        let (mut writer, reader) = duplex(256);
        let mut line_reader = LineReader::new(reader);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"complete\npartial-no-newline").await.unwrap();
            // keep the duplex open so EOF does not race the deadline
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(writer);
        });

        let mut seen = Vec::new();
        let mut callback = |line: &str| seen.push(line.to_string());
        let deadline = Instant::now() + Duration::from_millis(100);
        let result = line_reader
            .read_until(deadline, |_| false, Some(&mut callback))
            .await;

        assert!(result.timed_out);
        assert_eq!(seen, vec!["complete".to_string()]);
        assert!(result.buffer.ends_with(b"partial-no-newline"));
    }
}
