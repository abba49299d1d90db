use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Token<'a> {
	Word(&'a str),
	Pipe,
	RedirectIn,
	RedirectOut,
	RedirectAppend,
	Background,
}

impl<'a> Token<'a> {
	pub fn symbol(&self) -> &'a str {
		match *self {
			Token::Word(w) => w,
			Token::Pipe => "|",
			Token::RedirectIn => "<",
			Token::RedirectOut => ">",
			Token::RedirectAppend => ">>",
			Token::Background => "&",
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OutputMode { Truncate, Append }

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OutputTarget {
	pub path: PathBuf,
	pub mode: OutputMode,
}

/// One program invocation of a pipeline. `args` is never empty.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stage {
	pub args: Vec<String>,
	pub input: Option<PathBuf>,
	pub output: Option<OutputTarget>,
}

impl Stage {
	pub fn program(&self) -> &str {
		&self.args[0]
	}

	pub fn is_redirected(&self) -> bool {
		self.input.is_some() || self.output.is_some()
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
	pub is_background: bool,
}
