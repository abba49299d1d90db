use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::launch::LaunchedJob;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum JobState { Running, Stopped, Done }

impl fmt::Display for JobState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match *self {
			JobState::Running => "Running",
			JobState::Stopped => "Stopped",
			JobState::Done => "Done",
		})
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProcessStatus {
	Running,
	Stopped(Signal),
	Exited(i32),
	Signaled(Signal),
	/// Collected by someone else; the exit status is unknown.
	Lost,
}

impl ProcessStatus {
	pub fn state(self) -> JobState {
		match self {
			ProcessStatus::Running => JobState::Running,
			ProcessStatus::Stopped(_) => JobState::Stopped,
			ProcessStatus::Exited(_) | ProcessStatus::Signaled(_) | ProcessStatus::Lost => JobState::Done,
		}
	}

	/// Shell-style exit code: the status for a normal exit, 128 + signal number
	/// for a process killed or stopped by a signal.
	pub fn code(self) -> i32 {
		match self {
			ProcessStatus::Running => 0,
			ProcessStatus::Exited(code) => code,
			ProcessStatus::Stopped(sig) | ProcessStatus::Signaled(sig) => 128 + sig as i32,
			ProcessStatus::Lost => 127,
		}
	}
}

pub(crate) trait WaitStatusExt {
	fn process_status(self) -> Option<ProcessStatus>;
}

impl WaitStatusExt for WaitStatus {
	fn process_status(self) -> Option<ProcessStatus> {
		match self {
			WaitStatus::Exited(_, code) => Some(ProcessStatus::Exited(code)),
			WaitStatus::Signaled(_, sig, _) => Some(ProcessStatus::Signaled(sig)),
			WaitStatus::Stopped(_, sig) => Some(ProcessStatus::Stopped(sig)),
			#[cfg(any(target_os = "linux", target_os = "android"))]
			WaitStatus::PtraceEvent(_, sig, _) => Some(ProcessStatus::Stopped(sig)),
			#[cfg(any(target_os = "linux", target_os = "android"))]
			WaitStatus::PtraceSyscall(_) => Some(ProcessStatus::Stopped(Signal::SIGTRAP)),
			WaitStatus::Continued(_) => Some(ProcessStatus::Running),
			WaitStatus::StillAlive => None,
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Process {
	pub pid: Pid,
	pub status: ProcessStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(usize);

impl JobId {
	pub fn get(self) -> usize {
		self.0
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
	#[error("invalid job id: {0}")]
	InvalidId(i64),
	#[error("invalid process id: {0}")]
	InvalidPid(i64),
	#[error("too many jobs ({0} still running or stopped)")]
	TableFull(usize),
	#[error("job [{0}] is not stopped")]
	NotStopped(JobId),
	#[error("job [{0}] has already finished")]
	Finished(JobId),
	#[error("cannot signal {pid}: {source}")]
	Signal { pid: i32, #[source] source: Errno },
	#[error("wait failed: {0}")]
	Wait(#[source] Errno),
}

/// One launched pipeline. The first process is the group leader and its pid
/// is the group id every job-control signal is sent to.
#[derive(Debug, Clone)]
pub struct Job {
	pub pgid: Pid,
	pub command: String,
	pub processes: Vec<Process>,
	state: JobState,
}

impl Job {
	pub fn new(launched: LaunchedJob, command: &str) -> Job {
		let processes = launched.pids.iter()
			.map(|&pid| Process { pid: pid, status: ProcessStatus::Running })
			.collect();
		Job { pgid: launched.pgid, command: command.to_owned(), processes: processes, state: JobState::Running }
	}

	pub fn state(&self) -> JobState {
		self.state
	}

	fn derived_state(&self) -> JobState {
		self.processes.iter().map(|pr| pr.status.state()).min().unwrap_or(JobState::Done)
	}

	/// Exit code of the job: the status of its last process.
	pub fn exit_code(&self) -> i32 {
		self.processes.last().map_or(0, |pr| pr.status.code())
	}

	/// Moves the job to `state`. Resuming marks stopped processes running
	/// again; the next wait status corrects anything that did not resume.
	pub fn set_state(&mut self, state: JobState) {
		if state == JobState::Running {
			for pr in self.processes.iter_mut().filter(|pr| pr.status.state() == JobState::Stopped) {
				pr.status = ProcessStatus::Running;
			}
		}
		self.state = state;
	}

	/// Records a wait status. Returns whether the job state changed.
	pub(crate) fn apply(&mut self, status: WaitStatus) -> bool {
		let (pid, new_status) = match (status.pid(), status.process_status()) {
			(Some(pid), Some(s)) => (pid, s),
			_ => return false,
		};
		match self.processes.iter_mut().find(|pr| pr.pid == pid) {
			Some(pr) => pr.status = new_status,
			None => return false,
		}
		let before = self.state;
		self.state = self.derived_state();
		if before != self.state {
			debug!(pgid = self.pgid.as_raw(), from = %before, to = %self.state, "job state changed");
		}
		before != self.state
	}

	fn mark_lost(&mut self) {
		for pr in self.processes.iter_mut().filter(|pr| pr.status.state() != JobState::Done) {
			pr.status = ProcessStatus::Lost;
		}
		self.state = self.derived_state();
	}

	fn group(&self) -> Pid {
		Pid::from_raw(-self.pgid.as_raw())
	}

	/// Blocks until every process of the job has terminated or the job stopped.
	pub(crate) fn wait(&mut self) -> Result<JobState, JobError> {
		while self.state == JobState::Running {
			match wait::waitpid(self.group(), Some(WaitPidFlag::WUNTRACED)) {
				Ok(status) => { self.apply(status); },
				Err(Errno::EINTR) => {},
				Err(Errno::ECHILD) => {
					warn!(pgid = self.pgid.as_raw(), "job processes vanished while waiting");
					self.mark_lost();
				},
				Err(e) => { return Err(JobError::Wait(e)); },
			}
		}
		Ok(self.state)
	}

	/// Collects every pending status change without blocking.
	pub(crate) fn poll(&mut self) -> bool {
		let before = self.state;
		let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
		while self.state != JobState::Done {
			match wait::waitpid(self.group(), Some(flags)) {
				Ok(WaitStatus::StillAlive) => break,
				Ok(status) => { self.apply(status); },
				Err(Errno::EINTR) => {},
				Err(Errno::ECHILD) => {
					self.mark_lost();
					break;
				},
				Err(e) => {
					warn!(pgid = self.pgid.as_raw(), error = %e, "cannot poll job");
					break;
				},
			}
		}
		before != self.state
	}
}

/// Every job launched by the shell, indexed by 1-based id. Ids are never
/// reused; finished jobs stay in the table as `Done`.
#[derive(Debug)]
pub struct JobTable {
	jobs: Vec<Job>,
	capacity: usize,
}

impl JobTable {
	pub fn new(capacity: usize) -> JobTable {
		JobTable { jobs: vec![], capacity: capacity }
	}

	pub fn len(&self) -> usize {
		self.jobs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.jobs.is_empty()
	}

	pub fn live_count(&self) -> usize {
		self.jobs.iter().filter(|job| job.state != JobState::Done).count()
	}

	/// Fails when another live job would exceed the configured capacity.
	pub fn check_room(&self) -> Result<(), JobError> {
		let live = self.live_count();
		if live >= self.capacity {
			return Err(JobError::TableFull(live));
		}
		Ok(())
	}

	pub fn insert(&mut self, job: Job) -> Result<JobId, JobError> {
		self.check_room()?;
		self.jobs.push(job);
		let id = JobId(self.jobs.len());
		debug!(job = id.0, pgid = self.jobs[id.0 - 1].pgid.as_raw(), "job registered");
		Ok(id)
	}

	pub fn register(&mut self, launched: LaunchedJob, command: &str) -> Result<JobId, JobError> {
		self.insert(Job::new(launched, command))
	}

	/// Validates a user-supplied job id.
	pub fn resolve(&self, raw: i64) -> Result<JobId, JobError> {
		if raw <= 0 || raw as u64 > self.jobs.len() as u64 {
			return Err(JobError::InvalidId(raw));
		}
		Ok(JobId(raw as usize))
	}

	pub fn get(&self, id: JobId) -> Option<&Job> {
		self.jobs.get(id.0.wrapping_sub(1))
	}

	pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
		self.jobs.get_mut(id.0.wrapping_sub(1))
	}

	pub fn set_state(&mut self, id: JobId, state: JobState) -> Result<(), JobError> {
		let job = self.get_mut(id).ok_or(JobError::InvalidId(id.0 as i64))?;
		job.set_state(state);
		Ok(())
	}

	pub fn iter(&self) -> impl Iterator<Item = (JobId, &Job)> {
		self.jobs.iter().enumerate().map(|(i, job)| (JobId(i + 1), job))
	}

	/// Collects finished and stopped children of every live job without
	/// blocking, returning the jobs whose state changed.
	pub fn reap(&mut self) -> Vec<JobId> {
		let mut changed = vec![];
		for (i, job) in self.jobs.iter_mut().enumerate() {
			if job.state == JobState::Done {
				continue;
			}
			if job.poll() {
				debug!(job = i + 1, state = %job.state, "reaped");
				changed.push(JobId(i + 1));
			}
		}
		changed
	}
}

impl Default for JobTable {
	fn default() -> JobTable {
		JobTable::new(DEFAULT_CAPACITY)
	}
}
