//! Incremental Server-Sent Events decoder.
//!
//! Bytes are buffered until a full line is available, so chunk boundaries may
//! fall anywhere, including inside a multi-byte UTF-8 sequence. Lines ending
//! in `\n` or `\r\n` are accepted. An event is dispatched on a blank line when
//! at least one `data:` line was seen; multiple `data:` lines are joined with
//! `\n`. Comment lines (`:keepalive`) and unknown fields are ignored. A
//! trailing event without its blank line is discarded when the stream ends.

/// One assembled event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
	pub event: Option<String>,
	pub data: String,
	/// Last event id seen on this connection.
	pub id: Option<String>,
	/// Server-requested reconnection delay in milliseconds.
	pub retry: Option<u64>,
}

/// Push-based decoder; feed it chunks, collect whole events.
#[derive(Debug, Default)]
pub struct SseDecoder {
	buffer: Vec<u8>,
	data: Vec<String>,
	event: Option<String>,
	id: Option<String>,
	retry: Option<u64>,
}

impl SseDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Consumes `chunk` and returns every event it completed.
	pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
		self.buffer.extend_from_slice(chunk);

		let mut events = Vec::new();
		while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
			let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
			line.pop();
			if line.last() == Some(&b'\r') {
				line.pop();
			}
			let line = String::from_utf8_lossy(&line);
			if let Some(event) = self.feed_line(&line) {
				events.push(event);
			}
		}
		events
	}

	/// Ends the connection: drops any partial line or event and resets
	/// per-connection state. Returns `true` if something was discarded.
	pub fn finish(&mut self) -> bool {
		let discarded = !self.buffer.is_empty() || !self.data.is_empty();
		*self = Self::default();
		discarded
	}

	fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
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
		match field {
			"data" => self.data.push(value.to_string()),
			"event" => self.event = Some(value.to_string()),
			"id" => self.id = Some(value.to_string()),
			"retry" => {
				if let Ok(ms) = value.trim().parse() {
					self.retry = Some(ms);
				}
			}
			_ => {}
		}
		None
	}

	fn dispatch(&mut self) -> Option<SseEvent> {
		if self.data.is_empty() {
			self.event = None;
			return None;
		}
		let event = SseEvent {
			event: self.event.take(),
			data: self.data.join("\n"),
			id: self.id.clone(),
			retry: self.retry.take(),
		};
		self.data.clear();
		Some(event)
	}
}
