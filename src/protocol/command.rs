//! Command grammar
//!
//! A line of operator input is parsed with small composable rules. Each
//! rule looks at the input from a cursor, pushes the token it recognized
//! and returns the cursor past the match (including surrounding whitespace).

use std::fmt;
use thiserror::Error;

/// Parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Expected command 'F', 'B', 'L', 'R', or 'Q'.")]
    Op,

    #[error("Expected number literal.")]
    Num,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Movement directions understood by a drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

/// A single operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Move one step in a direction
    Move(Direction),
    /// Ask the drones for their current positions
    BroadcastRequest,
}

impl Command {
    /// All commands, in the order they are advertised to the operator
    pub const ALL: [Command; 5] = [
        Command::Move(Direction::Forward),
        Command::Move(Direction::Backward),
        Command::Move(Direction::Right),
        Command::Move(Direction::Left),
        Command::BroadcastRequest,
    ];

    /// The ASCII symbol used both in the grammar and on the wire
    pub fn symbol(&self) -> u8 {
        match self {
            Command::Move(Direction::Forward) => b'F',
            Command::Move(Direction::Backward) => b'B',
            Command::Move(Direction::Left) => b'L',
            Command::Move(Direction::Right) => b'R',
            Command::BroadcastRequest => b'Q',
        }
    }

    /// Look a command up by its symbol
    pub fn from_symbol(symbol: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.symbol() == symbol)
    }

    /// Short description used in the help banner
    pub fn label(&self) -> &'static str {
        match self {
            Command::Move(Direction::Forward) => "forward",
            Command::Move(Direction::Backward) => "backward",
            Command::Move(Direction::Left) => "leftward",
            Command::Move(Direction::Right) => "rightward",
            Command::BroadcastRequest => "broadcast location",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol() as char)
    }
}

/// Tokens produced by the grammar rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Op(Command),
    Num(u32),
}

/// A grammar rule: consumes from `cursor`, appends tokens, returns the new cursor
pub type Rule = fn(&str, usize, &mut Vec<Token>) -> ParseResult<usize>;

fn skip_whitespace(s: &str, i: usize) -> usize {
    let rest = &s[i..];
    i + (rest.len() - rest.trim_start().len())
}

/// Match one command symbol
pub fn op_rule(s: &str, i: usize, tokens: &mut Vec<Token>) -> ParseResult<usize> {
    let start = skip_whitespace(s, i);
    let command = s[start..]
        .bytes()
        .next()
        .and_then(Command::from_symbol)
        .ok_or(ParseError::Op)?;

    tokens.push(Token::Op(command));
    Ok(skip_whitespace(s, start + 1))
}

/// Match an unsigned decimal literal
pub fn num_rule(s: &str, i: usize, tokens: &mut Vec<Token>) -> ParseResult<usize> {
    let start = skip_whitespace(s, i);
    let digits = s[start..].bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(ParseError::Num);
    }

    let end = start + digits;
    let value = s[start..end].parse().map_err(|_| ParseError::Num)?;
    tokens.push(Token::Num(value));
    Ok(skip_whitespace(s, end))
}

/// Run `first`, then `second` from where `first` stopped
pub fn seq(
    first: Rule,
    second: Rule,
) -> impl Fn(&str, usize, &mut Vec<Token>) -> ParseResult<usize> {
    move |s: &str, i: usize, tokens: &mut Vec<Token>| {
        let i = first(s, i, tokens)?;
        second(s, i, tokens)
    }
}

/// Parse one line of operator input into a command
///
/// Only the leading symbol is significant; whatever follows it is ignored.
pub fn parse(text: &str) -> ParseResult<Command> {
    let mut tokens = Vec::with_capacity(1);
    op_rule(text, 0, &mut tokens)?;

    match tokens.first() {
        Some(Token::Op(command)) => Ok(*command),
        _ => Err(ParseError::Op),
    }
}
