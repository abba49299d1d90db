use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use nix::sys::signal::{self, SigHandler, Signal};
use signal_hook::consts::signal::SIGINT;
use signal_hook::iterator::{Handle, Signals};
use tracing::debug;

const STOP_SIGNALS: [Signal; 3] = [Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

const CHILD_DEFAULTS: [Signal; 6] = [
	Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP,
	Signal::SIGTTIN, Signal::SIGTTOU, Signal::SIGCHLD,
];

/// Keeps the shell itself from being stopped by the terminal.
pub fn ignore_stop_signals() -> nix::Result<()> {
	for &sig in &STOP_SIGNALS {
		unsafe { signal::signal(sig, SigHandler::SigIgn) }?;
	}
	Ok(())
}

/// Runs in a forked child before exec: ignored dispositions survive exec.
pub fn restore_defaults() {
	for &sig in &CHILD_DEFAULTS {
		let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
	}
}

/// Catches SIGINT aimed at the shell and answers with a notice instead of
/// dying. The prompt is re-printed when the main loop is waiting for input.
pub struct InterruptWatcher {
	handle: Handle,
	thread: thread::JoinHandle<()>,
}

impl InterruptWatcher {
	pub fn start(prompt: Option<String>, at_prompt: Arc<AtomicBool>) -> io::Result<InterruptWatcher> {
		let mut signals = Signals::new([SIGINT])?;
		let handle = signals.handle();
		let thread = thread::spawn(move || {
			for sig in signals.forever() {
				debug!(signal = sig, "interrupt");
				let mut stdout = io::stdout().lock();
				let _ = stdout.write_all(b"\nCaught SIGINT (Ctrl+C). Use 'exit' to quit.\n");
				if let Some(ref prompt) = prompt {
					if at_prompt.load(Ordering::SeqCst) {
						let _ = stdout.write_all(prompt.as_bytes());
					}
				}
				let _ = stdout.flush();
			}
		});
		Ok(InterruptWatcher { handle: handle, thread: thread })
	}

	pub fn stop(self) {
		self.handle.close();
		let _ = self.thread.join();
	}
}
