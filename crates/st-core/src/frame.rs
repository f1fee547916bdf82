//! Line framing for the project event bus.
//!
//! Input arrives as arbitrary byte chunks; a chunk may end in the middle of
//! a line or in the middle of a UTF-8 sequence. Bytes after the last `\n`
//! stay buffered and are prepended to the next chunk.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};

/// Prefix marking a forwarded record. Other lines (comments, `event:`,
/// blank separators) are dropped.
pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(record) = payload(&self.buf[start..end]) {
                records.push(record);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        records
    }

    /// Flush the trailing partial line once the source has ended.
    pub fn finish(self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        payload(&self.buf)
    }

    /// Bytes currently held back waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let data = line.strip_prefix(DATA_PREFIX.as_bytes())?;
    Some(String::from_utf8_lossy(data).into_owned())
}

struct RecordState<S> {
    source: Pin<Box<S>>,
    reader: Option<FrameReader>,
    ready: VecDeque<String>,
}

/// Adapt a chunk stream into a stream of record payloads.
///
/// Ends when the source ends (after flushing a non-empty partial line) or
/// right after the first source error, which is passed through.
pub fn records<S, B, E>(source: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = RecordState {
        source: Box::pin(source),
        reader: Some(FrameReader::new()),
        ready: VecDeque::new(),
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(record) = st.ready.pop_front() {
                return Some((Ok(record), st));
            }
            if st.reader.is_none() {
                return None;
            }
            match st.source.next().await {
                Some(Ok(chunk)) => {
                    if let Some(reader) = st.reader.as_mut() {
                        let completed = reader.push(chunk.as_ref());
                        st.ready.extend(completed);
                    }
                }
                Some(Err(e)) => {
                    st.reader = None;
                    return Some((Err(e), st));
                }
                None => {
                    if let Some(last) = st.reader.take().and_then(FrameReader::finish) {
                        st.ready.push_back(last);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = concat!(
        ": keep-alive\n",
        "data: {\"type\":\"heartbeat\"}\n",
        "\n",
        "data: {\"type\":\"content\",\"task_id\":1,\"content\":\"héllo 世界\"}\r\n",
        "event: ignored\n",
        "data: {\"type\":\"done\",\"task_id\":1}"
    );

    fn expected() -> Vec<String> {
        vec![
            "{\"type\":\"heartbeat\"}".to_string(),
            "{\"type\":\"content\",\"task_id\":1,\"content\":\"héllo 世界\"}".to_string(),
            "{\"type\":\"done\",\"task_id\":1}".to_string(),
        ]
    }

    fn run_chunked(chunks: &[&[u8]]) -> Vec<String> {
        let mut reader = FrameReader::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(reader.push(chunk));
        }
        out.extend(reader.finish());
        out
    }

    #[test]
    fn unchunked_pass() {
        assert_eq!(run_chunked(&[INPUT.as_bytes()]), expected());
    }

    #[test]
    fn every_two_way_split_matches_unchunked() {
        let bytes = INPUT.as_bytes();
        for cut in 0..=bytes.len() {
            let (a, b) = bytes.split_at(cut);
            assert_eq!(run_chunked(&[a, b]), expected(), "split at byte {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_unchunked() {
        let chunks: Vec<&[u8]> = INPUT.as_bytes().chunks(1).collect();
        assert_eq!(run_chunked(&chunks), expected());
    }

    #[test]
    fn partial_line_is_held_back() {
        let mut reader = FrameReader::new();
        assert!(reader.push(b"data: {\"a\"").is_empty());
        assert_eq!(reader.buffered(), 10);
        assert_eq!(reader.push(b":1}\ndata: x"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(reader.finish(), Some("x".to_string()));
    }

    #[test]
    fn trailing_non_data_line_is_not_flushed() {
        let mut reader = FrameReader::new();
        assert!(reader.push(b"retry: 1000").is_empty());
        assert_eq!(reader.finish(), None);
    }

    #[tokio::test]
    async fn records_stream_flushes_tail() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = INPUT
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let out: Vec<String> = records(stream::iter(chunks))
            .map(|r| r.expect("no transport error"))
            .collect()
            .await;
        assert_eq!(out, expected());
    }

    #[tokio::test]
    async fn records_stream_stops_after_error() {
        let chunks: Vec<Result<&[u8], &str>> = vec![
            Ok(&b"data: one\ndata: tw"[..]),
            Err("reset"),
            Ok(&b"o\ndata: three\n"[..]),
        ];
        let out: Vec<Result<String, &str>> = records(stream::iter(chunks)).collect().await;
        assert_eq!(out, vec![Ok("one".to_string()), Err("reset")]);
    }
}
