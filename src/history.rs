use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 100;

/// Lines entered this session. Once full the oldest line is dropped, but
/// line numbers keep counting from the start of the session.
#[derive(Debug)]
pub struct History {
	entries: VecDeque<String>,
	capacity: usize,
	dropped: usize,
}

impl History {
	pub fn new(capacity: usize) -> History {
		History { entries: VecDeque::with_capacity(capacity), capacity: capacity, dropped: 0 }
	}

	pub fn push(&mut self, line: &str) {
		if self.capacity == 0 {
			return;
		}
		if self.entries.len() == self.capacity {
			self.entries.pop_front();
			self.dropped += 1;
		}
		self.entries.push_back(line.to_owned());
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
		let first = self.dropped + 1;
		self.entries.iter().enumerate().map(move |(i, line)| (first + i, line.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl Default for History {
	fn default() -> History {
		History::new(DEFAULT_CAPACITY)
	}
}
