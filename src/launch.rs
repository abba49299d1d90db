use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::sys::wait;
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::control::Terminal;
use crate::search::SearchCache;
use crate::signals;
use crate::types::{OutputMode, OutputTarget, Pipeline, Stage};

#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("cannot create pipe: {0}")]
	Pipe(#[source] Errno),
	#[error("cannot fork: {0}")]
	Fork(#[source] Errno),
	#[error("{}: {source}", path.display())]
	Redirect { path: PathBuf, #[source] source: io::Error },
	#[error("command not found: {0}")]
	CommandNotFound(String),
	#[error("argument contains a NUL byte: {0:?}")]
	NulByte(String),
}

/// The processes of a freshly spawned pipeline, in stage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedJob {
	pub pgid: Pid,
	pub pids: Vec<Pid>,
	pub is_background: bool,
}

/// Everything a child needs, built before forking so the child only makes
/// system calls between `fork` and `exec`.
struct PreparedStage {
	path: CString,
	argv: Vec<CString>,
	stdin: Option<File>,
	stdout: Option<File>,
}

fn cstring(s: Vec<u8>) -> Result<CString, LaunchError> {
	CString::new(s).map_err(|e| LaunchError::NulByte(String::from_utf8_lossy(&e.into_vec()).into_owned()))
}

fn open_input(path: &Path) -> Result<File, LaunchError> {
	File::open(path).map_err(|e| LaunchError::Redirect { path: path.to_owned(), source: e })
}

fn open_output(target: &OutputTarget) -> Result<File, LaunchError> {
	let mut oopt = OpenOptions::new();
	let _ = match target.mode {
		OutputMode::Truncate => oopt.write(true).create(true).truncate(true),
		OutputMode::Append => oopt.append(true).create(true),
	};
	oopt.mode(0o644).open(&target.path).map_err(|e| LaunchError::Redirect { path: target.path.clone(), source: e })
}

fn prepare(stage: &Stage, search: &SearchCache) -> Result<PreparedStage, LaunchError> {
	let path = search.lookup(stage.program())
		.ok_or_else(|| LaunchError::CommandNotFound(stage.program().to_owned()))?;
	let path = cstring(path.into_os_string().into_vec())?;
	let argv = stage.args.iter()
		.map(|arg| cstring(arg.clone().into_bytes()))
		.collect::<Result<Vec<CString>, LaunchError>>()?;
	let stdin = stage.input.as_deref().map(open_input).transpose()?;
	let stdout = stage.output.as_ref().map(open_output).transpose()?;
	Ok(PreparedStage { path: path, argv: argv, stdin: stdin, stdout: stdout })
}

fn write_stderr(bytes: &[u8]) {
	unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr() as *const libc::c_void, bytes.len()); }
}

fn child_fail(program: &[u8], what: &[u8], err: Errno, code: i32) -> ! {
	for part in [b"jobsh: ".as_slice(), program, what, err.desc().as_bytes(), b"\n".as_slice()] {
		write_stderr(part);
	}
	unsafe { libc::_exit(code) }
}

fn wire_stage(stage: &PreparedStage, index: usize, pipes: &[(OwnedFd, OwnedFd)]) -> nix::Result<()> {
	if index > 0 {
		unistd::dup2(pipes[index - 1].0.as_raw_fd(), libc::STDIN_FILENO)?;
	}
	if index < pipes.len() {
		unistd::dup2(pipes[index].1.as_raw_fd(), libc::STDOUT_FILENO)?;
	}
	if let Some(ref file) = stage.stdin {
		unistd::dup2(file.as_raw_fd(), libc::STDIN_FILENO)?;
		unistd::close(file.as_raw_fd())?;
	}
	if let Some(ref file) = stage.stdout {
		unistd::dup2(file.as_raw_fd(), libc::STDOUT_FILENO)?;
		unistd::close(file.as_raw_fd())?;
	}
	for &(ref read, ref write) in pipes {
		unistd::close(read.as_raw_fd())?;
		unistd::close(write.as_raw_fd())?;
	}
	Ok(())
}

fn exec_stage(stage: &PreparedStage, index: usize, pipes: &[(OwnedFd, OwnedFd)],
              leader: Option<Pid>, terminal: Option<&Terminal>) -> ! {
	let pgid = leader.unwrap_or_else(unistd::getpid);
	let _ = unistd::setpgid(Pid::from_raw(0), pgid);
	if let Some(terminal) = terminal {
		let _ = terminal.give_to(pgid);
	}
	signals::restore_defaults();

	let program = stage.argv[0].as_bytes();
	if let Err(e) = wire_stage(stage, index, pipes) {
		child_fail(program, b": cannot set up redirection: ", e, 126);
	}
	let e = match unistd::execv(&stage.path, &stage.argv) {
		Ok(never) => match never {},
		Err(e) => e,
	};
	let code = if e == Errno::ENOENT { 127 } else { 126 };
	child_fail(program, b": ", e, code)
}

/// Kills and reaps the processes of a half-launched pipeline.
fn abort_launch(pids: &[Pid]) {
	for &pid in pids {
		if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
			warn!(pid = pid.as_raw(), error = %e, "cannot kill partially launched stage");
		}
	}
	for &pid in pids {
		loop {
			match wait::waitpid(pid, None) {
				Err(Errno::EINTR) => continue,
				_ => break,
			}
		}
	}
}

/// Spawns every stage of `pipeline` in its own process group. `terminal` is
/// handed to a foreground pipeline when job control is active.
pub fn launch(pipeline: &Pipeline, search: &SearchCache, terminal: Option<&Terminal>) -> Result<LaunchedJob, LaunchError> {
	let stages = &pipeline.stages;
	assert!(!stages.is_empty());

	let prepared = stages.iter()
		.map(|stage| prepare(stage, search))
		.collect::<Result<Vec<PreparedStage>, LaunchError>>()?;

	let mut pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(stages.len() - 1);
	for _ in 1..stages.len() {
		pipes.push(unistd::pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?);
	}

	let terminal = if pipeline.is_background { None } else { terminal };
	let mut pids: Vec<Pid> = Vec::with_capacity(stages.len());
	for (i, stage) in prepared.iter().enumerate() {
		let leader = pids.first().copied();
		match unsafe { unistd::fork() } {
			Ok(ForkResult::Parent { child }) => {
				let pgid = leader.unwrap_or(child);
				// The child may already have exec'd, in which case its own call won.
				if let Err(e) = unistd::setpgid(child, pgid) {
					debug!(pid = child.as_raw(), error = %e, "setpgid from parent");
				}
				debug!(pid = child.as_raw(), pgid = pgid.as_raw(), stage = i, program = stages[i].program(), "spawned");
				pids.push(child);
			},
			Ok(ForkResult::Child) => exec_stage(stage, i, &pipes, leader, terminal),
			Err(e) => {
				drop(pipes);
				abort_launch(&pids);
				return Err(LaunchError::Fork(e));
			},
		}
	}
	drop(pipes);

	Ok(LaunchedJob { pgid: pids[0], pids: pids, is_background: pipeline.is_background })
}
