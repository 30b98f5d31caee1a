use tokio::time::Instant;

use super::transport::Transport;
use super::{Result, SerialError};

/// Cap on buffered bytes while waiting for a terminator
const MAX_PARTIAL: usize = 8192;
/// Per-read chunk size
pub(crate) const READ_CHUNK: usize = 512;

/// Splits the transport byte stream into newline-terminated text lines
/// and frames outbound lines the same way. `\n` terminates a line; a
/// trailing `\r` is stripped so CRLF devices work unchanged. Bytes
/// after the last terminator stay buffered for the next read.
pub struct LineFramer {
    partial: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            partial: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Forget buffered bytes. Required after a reconnect, where any
    /// partial line belongs to the previous link.
    pub fn reset(&mut self) {
        self.partial.clear();
    }

    /// Frame `text` with the line terminator and push it in one write
    pub async fn write_line(&self, transport: &mut dyn Transport, text: &str) -> Result<()> {
        let mut frame = String::with_capacity(text.len() + 1);
        frame.push_str(text);
        frame.push('\n');
        transport.write_all(frame.as_bytes()).await
    }

    /// Return the next complete non-blank line, waiting until
    /// `deadline`. `Err(Timeout)` when no full line arrived in time.
    pub async fn read_line(
        &mut self,
        transport: &mut dyn Transport,
        deadline: Instant,
    ) -> Result<String> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SerialError::Timeout);
            }

            let mut buf = [0u8; READ_CHUNK];
            let n = transport.read_chunk(&mut buf, deadline - now).await?;
            self.push_bytes(&buf[..n]);
        }
    }

    /// Drop the stale partial line plus whatever the OS has buffered;
    /// returns the number of bytes thrown away.
    pub async fn discard_pending(&mut self, transport: &mut dyn Transport) -> Result<usize> {
        let stale = self.partial.len();
        self.partial.clear();
        let dropped = transport.discard_input().await?;
        Ok(stale + dropped)
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        if self.partial.len() > MAX_PARTIAL {
            let excess = self.partial.len() - MAX_PARTIAL / 2;
            self.partial.drain(..excess);
            log::warn!(
                "Line buffer exceeded {} bytes without a terminator, trimmed oldest input",
                MAX_PARTIAL
            );
        }
    }

    fn take_line(&mut self) -> Option<String> {
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let text = String::from_utf8_lossy(&line).into_owned();
            // Blank lines are keep-alive noise, not replies
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
        None
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::super::mock::MockTransport;
    use super::super::transport::Transport;
    use super::super::{Result, SerialError};
    use super::LineFramer;
    use tokio::time::Instant;

    #[test]
    fn assembles_lines_across_pushes() {
        let mut framer = LineFramer::new();
        framer.push_bytes(b"TEM");
        assert_eq!(framer.take_line(), None);
        framer.push_bytes(b"P:25.3\nOK");
        assert_eq!(framer.take_line(), Some("TEMP:25.3".to_string()));
        assert_eq!(framer.take_line(), None);
        framer.push_bytes(b"\n");
        assert_eq!(framer.take_line(), Some("OK".to_string()));
    }

    #[test]
    fn strips_trailing_carriage_return() {
        let mut framer = LineFramer::new();
        framer.push_bytes(b"STATUS:READY\r\n");
        assert_eq!(framer.take_line(), Some("STATUS:READY".to_string()));
    }

    #[test]
    fn skips_blank_lines() {
        let mut framer = LineFramer::new();
        framer.push_bytes(b"\n \r\n\nPONG\n");
        assert_eq!(framer.take_line(), Some("PONG".to_string()));
        assert_eq!(framer.take_line(), None);
    }

    #[test]
    fn decodes_invalid_utf8_lossily() {
        let mut framer = LineFramer::new();
        framer.push_bytes(b"OK\xff\xfe!\n");
        let line = framer.take_line().unwrap();
        assert!(line.starts_with("OK"));
        assert!(line.ends_with('!'));
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn bounds_runaway_partial() {
        let mut framer = LineFramer::new();
        framer.push_bytes(&[b'x'; 20000]);
        assert!(framer.partial.len() <= super::MAX_PARTIAL);
        // A terminator still completes whatever survived the trim
        framer.push_bytes(b"\n");
        assert!(framer.take_line().is_some());
    }

    #[test]
    fn reset_drops_partial() {
        let mut framer = LineFramer::new();
        framer.push_bytes(b"half a li");
        framer.reset();
        framer.push_bytes(b"PONG\n");
        assert_eq!(framer.take_line(), Some("PONG".to_string()));
    }

    #[tokio::test]
    async fn read_line_waits_for_chunked_reply() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.open().await.unwrap();

        handle.forge_bytes(b"TEMP:2", Duration::ZERO);
        handle.forge_bytes(b"5.3\n", Duration::from_millis(20));

        let mut framer = LineFramer::new();
        let deadline = Instant::now() + Duration::from_millis(500);
        let line = framer.read_line(&mut mock, deadline).await.unwrap();
        assert_eq!(line, "TEMP:25.3");
    }

    #[tokio::test]
    async fn read_line_times_out_without_terminator() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.open().await.unwrap();

        // Bytes arrive, but never a full line
        handle.forge_bytes(b"TEMP:25", Duration::ZERO);

        let mut framer = LineFramer::new();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(60);
        let result = framer.read_line(&mut mock, deadline).await;
        assert!(matches!(result, Err(SerialError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    /// Records outbound frames byte for byte, terminators included.
    struct FrameSink {
        frames: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl Transport for FrameSink {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }

        fn endpoint(&self) -> &str {
            "sink"
        }

        async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.frames.push(bytes.to_vec());
            Ok(())
        }

        async fn read_chunk(&mut self, _buf: &mut [u8], _wait: Duration) -> Result<usize> {
            Err(SerialError::Timeout)
        }

        async fn discard_input(&mut self) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn write_line_sends_one_terminated_frame() {
        let mut sink = FrameSink { frames: Vec::new() };
        let framer = LineFramer::new();
        framer.write_line(&mut sink, "PING").await.unwrap();
        assert_eq!(sink.frames, vec![b"PING\n".to_vec()]);
    }
}
