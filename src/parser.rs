use std::path::PathBuf;

use thiserror::Error;

use crate::types::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("missing file name after '{0}'")]
	DanglingRedirection(&'static str),
	#[error("empty command")]
	EmptyStage,
	#[error("'{0}' is only allowed on the {1} command of a pipeline")]
	MisplacedRedirection(&'static str, &'static str),
	#[error("more than one '{0}' redirection for one command")]
	DuplicateRedirection(&'static str),
	#[error("'&' must be the last word of the line")]
	MisplacedBackground,
}

type ParseResult<T> = Result<T, ParseError>;

fn is_whitespace(c: char) -> bool {
	match c {
		' ' | '\t' | '\n' | '\r' => true,
		_ => false,
	}
}

/// Splits `line` into tokens. Operators are only recognized as standalone
/// words: `a|b` is a single word, `a | b` is a pipe.
pub fn tokenize(line: &str) -> Vec<Token<'_>> {
	line.split(is_whitespace)
		.filter(|word| !word.is_empty())
		.map(|word| match word {
			"|" => Token::Pipe,
			"<" => Token::RedirectIn,
			">" => Token::RedirectOut,
			">>" => Token::RedirectAppend,
			"&" => Token::Background,
			_ => Token::Word(word),
		})
		.collect()
}

struct Parser<'t, 'a> {
	tokens: &'t [Token<'a>],
	i: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
	fn next(&mut self) -> Option<Token<'a>> {
		let token = self.tokens.get(self.i).copied();
		if token.is_some() {
			self.i += 1;
		}
		token
	}

	fn redirect_target(&mut self, op: &'static str) -> ParseResult<PathBuf> {
		match self.next() {
			Some(Token::Word(target)) => Ok(PathBuf::from(target)),
			_ => Err(ParseError::DanglingRedirection(op)),
		}
	}

	fn parse_stage(&mut self) -> ParseResult<Stage> {
		let mut args: Vec<String> = vec![];
		let mut input: Option<PathBuf> = None;
		let mut output: Option<OutputTarget> = None;

		while let Some(token) = self.next() {
			match token {
				Token::Word(w) => args.push(w.to_owned()),
				Token::RedirectIn => {
					let path = self.redirect_target("<")?;
					if input.is_some() {
						return Err(ParseError::DuplicateRedirection("<"));
					}
					input = Some(path);
				},
				Token::RedirectOut | Token::RedirectAppend => {
					let (op, mode) = if token == Token::RedirectOut {
						(">", OutputMode::Truncate)
					} else {
						(">>", OutputMode::Append)
					};
					let path = self.redirect_target(op)?;
					if output.is_some() {
						return Err(ParseError::DuplicateRedirection(">"));
					}
					output = Some(OutputTarget { path: path, mode: mode });
				},
				Token::Background => { return Err(ParseError::MisplacedBackground); },
				Token::Pipe => { unreachable!("groups are split on pipes before parsing"); },
			}
		}

		if args.is_empty() {
			return Err(ParseError::EmptyStage);
		}
		Ok(Stage { args: args, input: input, output: output })
	}
}

/// Groups `tokens` into the stages of one pipeline.
pub fn build(tokens: &[Token<'_>]) -> ParseResult<Pipeline> {
	let (tokens, is_background) = match tokens.split_last() {
		Some((Token::Background, rest)) => (rest, true),
		_ => (tokens, false),
	};

	let groups: Vec<&[Token<'_>]> = tokens.split(|t| *t == Token::Pipe).collect();
	let last = groups.len() - 1;
	let mut stages: Vec<Stage> = Vec::with_capacity(groups.len());
	for (i, group) in groups.into_iter().enumerate() {
		let stage = Parser { tokens: group, i: 0 }.parse_stage()?;
		if i != 0 && stage.input.is_some() {
			return Err(ParseError::MisplacedRedirection("<", "first"));
		}
		if i != last && stage.output.is_some() {
			return Err(ParseError::MisplacedRedirection(">", "last"));
		}
		stages.push(stage);
	}
	Ok(Pipeline { stages: stages, is_background: is_background })
}

pub fn parse(line: &str) -> ParseResult<Pipeline> {
	build(&tokenize(line))
}
