use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

/// A single parsed Server-Sent-Events frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental SSE frame parser.
///
/// Feed raw body chunks with [`SseParser::push_bytes`]; completed events come
/// back in arrival order. A `data: [DONE]` line ends the stream: the parser
/// reports done and discards everything after it.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.push_str(chunk);

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }

            self.push_line(&line);
            if self.done {
                self.reset_pending();
                return events;
            }
        }

        events
    }

    /// Flush at end of input. A partial trailing line is processed, and a
    /// partially accumulated event is finalized if it has any content.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(&line);
            if self.done {
                self.reset_pending();
                return events;
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn push_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = field_value(line, "event") {
            self.event = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        } else if let Some(value) = field_value(line, "data") {
            if value == "[DONE]" {
                self.done = true;
                return;
            }
            self.data_lines.push(value.to_string());
        } else if let Some(value) = field_value(line, "id") {
            self.id = Some(value.to_string());
        } else if let Some(value) = field_value(line, "retry") {
            if let Ok(ms) = value.parse::<u64>() {
                self.retry = Some(ms);
            }
        }
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
            id: self.id.take(),
            retry: self.retry.take(),
        });
        self.data_lines.clear();
    }

    fn reset_pending(&mut self) {
        self.buffer.clear();
        self.event = None;
        self.data_lines.clear();
        self.id = None;
        self.retry = None;
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    if rest.is_empty() {
        return Some("");
    }
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_start())
}

/// Async event reader over an upstream HTTP body.
///
/// One-shot: no retries, no reconnection. `Ok(None)` means the stream ended,
/// either via `data: [DONE]` or end of input.
pub struct SseReader<S> {
    body: S,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    eof: bool,
}

impl<S, E> SseReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(body: S) -> Self {
        Self {
            body,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            eof: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, E> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.eof || self.parser.is_done() {
                return Ok(None);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    self.pending.extend(self.parser.push_bytes(&chunk));
                }
                Some(Err(err)) => {
                    self.eof = true;
                    return Err(err);
                }
                None => {
                    self.eof = true;
                    self.pending.extend(self.parser.finish());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn parse_all(input: &str) -> (Vec<SseEvent>, bool) {
        let mut parser = SseParser::new();
        let mut events = parser.push_str(input);
        events.extend(parser.finish());
        (events, parser.is_done())
    }

    #[test]
    fn frames_round_trip_in_order() {
        let input = "event: response.created\ndata: {\"a\":1}\n\nevent: response.completed\ndata: {\"b\":2}\n\n";
        let (events, done) = parse_all(input);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("response.created"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event.as_deref(), Some("response.completed"));
        assert_eq!(events[1].data, "{\"b\":2}");
        assert!(!done);
    }

    #[test]
    fn crlf_lines_and_comments() {
        let input = ": keep-alive\r\nevent: ping\r\ndata: x\r\n\r\n";
        let (events, _) = parse_all(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let input = "data: line1\ndata: line2\n\n";
        let (events, _) = parse_all(input);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn id_and_retry_fields() {
        let input = "id: 42\nretry: 1500\ndata: x\n\n";
        let (events, _) = parse_all(input);
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].retry, Some(1500));
    }

    #[test]
    fn done_terminates_and_discards_rest() {
        let input = "data: a\n\ndata: [DONE]\n\ndata: ignored\n\n";
        let (events, done) = parse_all(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a");
        assert!(done);
    }

    #[test]
    fn partial_event_finalized_at_eof() {
        let mut parser = SseParser::new();
        let events = parser.push_str("event: response.created\ndata: {\"x\":1}");
        assert!(events.is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
    }

    #[test]
    fn empty_input_yields_nothing() {
        let (events, done) = parse_all("");
        assert!(events.is_empty());
        assert!(!done);
    }

    #[tokio::test]
    async fn reader_spans_chunk_boundaries() {
        let chunks: Vec<Result<Bytes, Infallible>> = vec![
            Ok(Bytes::from_static(b"event: respon")),
            Ok(Bytes::from_static(b"se.created\ndata: {}\n")),
            Ok(Bytes::from_static(b"\ndata: [DONE]\n\n")),
        ];
        let mut reader = SseReader::new(stream::iter(chunks));
        let event = reader.next_event().await.unwrap().unwrap();
        assert_eq!(event.event.as_deref(), Some("response.created"));
        assert!(reader.next_event().await.unwrap().is_none());
        assert!(reader.next_event().await.unwrap().is_none());
    }
}
