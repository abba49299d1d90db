use std::io::{self, Write};

use crate::control::Terminal;
use crate::history::History;
use crate::job::{self, JobState, JobTable};
use crate::search;

/// Everything the shell remembers between lines.
pub struct State {
	pub search_cache: search::SearchCache,
	pub job_table: JobTable,
	pub history: History,
	pub terminal: Option<Terminal>,
}

impl State {
	pub fn new(max_jobs: usize, history_size: usize) -> State {
		State {
			search_cache: search::SearchCache::new(),
			job_table: JobTable::new(max_jobs),
			history: History::new(history_size),
			terminal: None,
		}
	}

	pub fn with_terminal(mut self, terminal: Option<Terminal>) -> State {
		self.terminal = terminal;
		self
	}

	/// Reaps background jobs and reports the ones that finished or stopped.
	pub fn notify_jobs<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		for id in self.job_table.reap() {
			if let Some(job) = self.job_table.get(id) {
				if job.state() != JobState::Running {
					writeln!(out, "[{}]  {}\t{}", id, job.state(), job.command)?;
				}
			}
		}
		out.flush()
	}
}

impl Default for State {
	fn default() -> State {
		State::new(job::DEFAULT_CAPACITY, crate::history::DEFAULT_CAPACITY)
	}
}
