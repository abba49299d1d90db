use std::io::{self, IsTerminal};
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::job::{Job, JobError, JobId, JobState, JobTable};
use crate::signals;

fn tcgetpgrp(fd: RawFd) -> nix::Result<Pid> {
	Errno::result(unsafe { libc::tcgetpgrp(fd) }).map(Pid::from_raw)
}

fn tcsetpgrp(fd: RawFd, pgid: Pid) -> nix::Result<()> {
	Errno::result(unsafe { libc::tcsetpgrp(fd, pgid.as_raw()) }).map(drop)
}

/// The controlling terminal, owned by the shell's process group between
/// foreground jobs.
#[derive(Debug)]
pub struct Terminal {
	fd: RawFd,
	shell_pgid: Pid,
	original_pgid: Pid,
}

impl Terminal {
	/// Puts the shell in its own process group in the terminal's foreground.
	/// Returns `None` when stdin is not a terminal.
	pub fn acquire() -> Option<Terminal> {
		let fd = libc::STDIN_FILENO;
		if !io::stdin().is_terminal() {
			return None;
		}
		// Wait until we are in the foreground before grabbing the terminal.
		loop {
			let pgrp = unistd::getpgrp();
			match tcgetpgrp(fd) {
				Ok(fg) if fg == pgrp => break,
				Ok(_) => { let _ = signal::killpg(pgrp, Signal::SIGTTIN); },
				Err(e) => {
					warn!(error = %e, "cannot query terminal foreground group");
					return None;
				},
			}
		}
		let original_pgid = unistd::getpgrp();
		if let Err(e) = signals::ignore_stop_signals() {
			warn!(error = %e, "cannot ignore stop signals");
			return None;
		}
		let pid = unistd::getpid();
		if let Err(e) = unistd::setpgid(pid, pid) {
			// a session leader already leads its group
			debug!(error = %e, "setpgid for the shell");
		}
		let shell_pgid = unistd::getpgrp();
		if let Err(e) = tcsetpgrp(fd, shell_pgid) {
			warn!(error = %e, "cannot take the terminal, job control disabled");
			return None;
		}
		debug!(pgid = shell_pgid.as_raw(), "job control enabled");
		Some(Terminal { fd: fd, shell_pgid: shell_pgid, original_pgid: original_pgid })
	}

	pub fn give_to(&self, pgid: Pid) -> nix::Result<()> {
		tcsetpgrp(self.fd, pgid)
	}

	pub fn reclaim(&self) {
		if let Err(e) = tcsetpgrp(self.fd, self.shell_pgid) {
			warn!(error = %e, "cannot reclaim the terminal");
		}
	}

	/// Hands the terminal back to the group that owned it at startup.
	pub fn release(&self) {
		if self.original_pgid != self.shell_pgid {
			let _ = tcsetpgrp(self.fd, self.original_pgid);
		}
	}
}

fn signal_group(job: &Job, sig: Signal) -> Result<(), JobError> {
	debug!(pgid = job.pgid.as_raw(), signal = %sig, "signal job");
	signal::killpg(job.pgid, sig).map_err(|e| JobError::Signal { pid: -job.pgid.as_raw(), source: e })
}

/// Waits for `job` with the terminal handed to its group.
pub fn wait_foreground(job: &mut Job, terminal: Option<&Terminal>) -> Result<JobState, JobError> {
	if let Some(terminal) = terminal {
		if let Err(e) = terminal.give_to(job.pgid) {
			debug!(pgid = job.pgid.as_raw(), error = %e, "cannot give terminal to job");
		}
	}
	let state = job.wait();
	if let Some(terminal) = terminal {
		terminal.reclaim();
	}
	state
}

/// Continues a stopped job or joins a running one, blocking until it is
/// done or stops again.
pub fn fg(table: &mut JobTable, terminal: Option<&Terminal>, raw: i64) -> Result<(JobId, JobState), JobError> {
	let id = table.resolve(raw)?;
	let job = table.get_mut(id).ok_or(JobError::InvalidId(raw))?;
	match job.state() {
		JobState::Done => { return Err(JobError::Finished(id)); },
		JobState::Stopped => {
			if let Some(terminal) = terminal {
				let _ = terminal.give_to(job.pgid);
			}
			if let Err(e) = signal_group(job, Signal::SIGCONT) {
				if let Some(terminal) = terminal {
					terminal.reclaim();
				}
				return Err(e);
			}
			job.set_state(JobState::Running);
		},
		JobState::Running => {},
	}
	let state = wait_foreground(job, terminal)?;
	Ok((id, state))
}

/// Continues a stopped job without waiting for it.
pub fn bg(table: &mut JobTable, raw: i64) -> Result<JobId, JobError> {
	let id = table.resolve(raw)?;
	let job = table.get_mut(id).ok_or(JobError::InvalidId(raw))?;
	match job.state() {
		JobState::Stopped => {},
		JobState::Running => { return Err(JobError::NotStopped(id)); },
		JobState::Done => { return Err(JobError::Finished(id)); },
	}
	signal_group(job, Signal::SIGCONT)?;
	job.set_state(JobState::Running);
	Ok(id)
}

pub fn kill_pid(raw: i64, sig: Signal) -> Result<(), JobError> {
	if raw <= 0 || raw > i32::MAX as i64 {
		return Err(JobError::InvalidPid(raw));
	}
	let pid = Pid::from_raw(raw as i32);
	debug!(pid = raw, signal = %sig, "signal process");
	signal::kill(pid, sig).map_err(|e| JobError::Signal { pid: raw as i32, source: e })
}

/// Signals every process of a job. A stopped job is continued afterwards so
/// the signal takes effect. The job is not waited for.
pub fn kill_job(table: &JobTable, raw: i64, sig: Signal) -> Result<JobId, JobError> {
	let id = table.resolve(raw)?;
	let job = table.get(id).ok_or(JobError::InvalidId(raw))?;
	if job.state() == JobState::Done {
		return Err(JobError::Finished(id));
	}
	signal_group(job, sig)?;
	if job.state() == JobState::Stopped && sig != Signal::SIGCONT && sig != Signal::SIGKILL && sig != Signal::SIGSTOP {
		signal_group(job, Signal::SIGCONT)?;
	}
	Ok(id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::launch;
	use crate::parser;
	use crate::search::SearchCache;
	use std::thread;
	use std::time::{Duration, Instant};

	fn background(table: &mut JobTable, line: &str) -> JobId {
		let pipeline = parser::parse(line).unwrap();
		let launched = launch::launch(&pipeline, &SearchCache::new(), None).unwrap();
		table.register(launched, line).unwrap()
	}

	fn reap_until(table: &mut JobTable, id: JobId, state: JobState) {
		let deadline = Instant::now() + Duration::from_secs(5);
		while table.get(id).unwrap().state() != state {
			assert!(Instant::now() < deadline, "job never reached {}", state);
			thread::sleep(Duration::from_millis(10));
			table.reap();
		}
	}

	#[test]
	fn invalid_ids_signal_nothing() {
		let mut table = JobTable::default();
		assert_eq!(fg(&mut table, None, 1).unwrap_err(), JobError::InvalidId(1));
		let id = background(&mut table, "sleep 0.1");
		assert_eq!(fg(&mut table, None, 0).unwrap_err(), JobError::InvalidId(0));
		assert_eq!(bg(&mut table, -1).unwrap_err(), JobError::InvalidId(-1));
		assert_eq!(bg(&mut table, 2).unwrap_err(), JobError::InvalidId(2));
		assert_eq!(kill_job(&table, 7, Signal::SIGTERM).unwrap_err(), JobError::InvalidId(7));
		assert_eq!(kill_pid(0, Signal::SIGTERM).unwrap_err(), JobError::InvalidPid(0));
		assert_eq!(kill_pid(-5, Signal::SIGTERM).unwrap_err(), JobError::InvalidPid(-5));
		assert_eq!(table.get(id).unwrap().state(), JobState::Running);
		assert_eq!(fg(&mut table, None, 1).unwrap(), (id, JobState::Done));
	}

	#[test]
	fn bg_requires_a_stopped_job() {
		let mut table = JobTable::default();
		let id = background(&mut table, "sleep 0.1");
		assert_eq!(bg(&mut table, 1).unwrap_err(), JobError::NotStopped(id));
		fg(&mut table, None, 1).unwrap();
		assert_eq!(bg(&mut table, 1).unwrap_err(), JobError::Finished(id));
		assert_eq!(fg(&mut table, None, 1).unwrap_err(), JobError::Finished(id));
	}

	#[test]
	fn stop_bg_fg() {
		let mut table = JobTable::default();
		let id = background(&mut table, "sleep 0.3");
		kill_job(&table, 1, Signal::SIGSTOP).unwrap();
		reap_until(&mut table, id, JobState::Stopped);

		let started = Instant::now();
		assert_eq!(bg(&mut table, 1), Ok(id));
		assert!(started.elapsed() < Duration::from_millis(200));
		assert_eq!(table.get(id).unwrap().state(), JobState::Running);

		assert_eq!(fg(&mut table, None, 1).unwrap(), (id, JobState::Done));
		assert_eq!(table.get(id).unwrap().exit_code(), 0);
	}

	#[test]
	fn fg_returns_when_the_job_stops_again() {
		let mut table = JobTable::default();
		let id = background(&mut table, "sleep 5");
		let pid = table.get(id).unwrap().pgid.as_raw() as i64;
		let stopper = thread::spawn(move || {
			thread::sleep(Duration::from_millis(100));
			kill_pid(pid, Signal::SIGSTOP).unwrap();
		});
		assert_eq!(fg(&mut table, None, 1).unwrap(), (id, JobState::Stopped));
		stopper.join().unwrap();

		kill_job(&table, 1, Signal::SIGTERM).unwrap();
		reap_until(&mut table, id, JobState::Done);
		assert_eq!(table.get(id).unwrap().exit_code(), 128 + Signal::SIGTERM as i32);
	}
}
