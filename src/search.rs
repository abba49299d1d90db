use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use tracing::debug;

/// Program name to executable path, first match in `PATH` order wins.
pub struct SearchCache {
	imp: HashMap<OsString, PathBuf>
}

const PATH_KEY: &str = "PATH";

fn is_executable(path: &Path) -> bool {
	match fs::metadata(path) {
		Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
		Err(_) => false,
	}
}

fn search_path(name: &OsStr) -> Option<PathBuf> {
	let paths = env::var_os(PATH_KEY)?;
	env::split_paths(&paths)
		.map(|dir| dir.join(name))
		.find(|candidate| is_executable(candidate))
}

impl SearchCache {
	pub fn new() -> SearchCache {
		let mut this = SearchCache { imp: HashMap::new() };
		this.rehash();
		this
	}

	fn add_entry(&mut self, entry: io::Result<fs::DirEntry>) -> io::Result<()> {
		let e = entry?;
		let path = e.path();
		if is_executable(&path) {
			self.imp.entry(e.file_name()).or_insert(path);
		}
		Ok(())
	}

	pub fn rehash(&mut self) {
		self.imp.clear();
		if let Some(paths) = env::var_os(PATH_KEY) {
			for path in env::split_paths(&paths) {
				if let Ok(entries) = fs::read_dir(path) {
					for entry in entries {
						let _ = self.add_entry(entry);
					}
				}
			}
		}
		debug!(programs = self.len(), "rehashed PATH");
	}

	/// Resolves a program name. Names containing a slash are taken as paths
	/// relative to the current directory; anything else not in the cache is
	/// searched for again, so programs installed after the last rehash are found.
	pub fn lookup(&self, name: &str) -> Option<PathBuf> {
		if name.is_empty() {
			return None;
		}
		if name.contains('/') {
			let path = PathBuf::from(name);
			return if path.exists() { Some(path) } else { None };
		}
		let name = OsStr::new(name);
		self.imp.get(name).cloned().or_else(|| search_path(name))
	}

	pub fn len(&self) -> usize {
		self.imp.len()
	}

	pub fn is_empty(&self) -> bool {
		self.imp.is_empty()
	}
}

impl Default for SearchCache {
	fn default() -> SearchCache {
		SearchCache::new()
	}
}
