use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// A parsed `name(arg, key=value)` line.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("not a call expression")]
    NotACall,
    #[error("{message} at offset {offset}")]
    Syntax { offset: usize, message: String },
}

/// Recognises call lines and turns their argument lists into JSON values.
///
/// Only literals are accepted: integers, finite floats, quoted strings,
/// booleans, `null`/`None`, bare words (taken as strings) and `[...]` lists.
#[derive(Debug, Clone)]
pub struct CallParser {
    pattern: Regex,
}

impl CallParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"^(\w+)\((.*)\)$")?,
        })
    }

    pub fn parse(&self, line: &str) -> Result<CallExpr, CallError> {
        let captures = self.pattern.captures(line.trim()).ok_or(CallError::NotACall)?;
        let name = captures.get(1).map_or("", |m| m.as_str()).to_string();
        let body = captures.get(2).map_or("", |m| m.as_str());
        let (args, kwargs) = ArgScanner::new(body).arguments()?;
        Ok(CallExpr { name, args, kwargs })
    }
}

struct ArgScanner {
    chars: Vec<char>,
    pos: usize,
}

impl ArgScanner {
    fn new(body: &str) -> Self {
        Self {
            chars: body.chars().collect(),
            pos: 0,
        }
    }

    fn arguments(mut self) -> Result<(Vec<Value>, Map<String, Value>), CallError> {
        let mut args = Vec::new();
        let mut kwargs = Map::new();
        self.skip_whitespace();
        if self.at_end() {
            return Ok((args, kwargs));
        }

        loop {
            self.skip_whitespace();
            if let Some(key) = self.keyword()? {
                let value = self.value()?;
                if kwargs.insert(key.clone(), value).is_some() {
                    return Err(self.error(format!("keyword argument repeated: {key}")));
                }
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.value()?);
            }

            self.skip_whitespace();
            match self.bump() {
                None => break,
                Some(',') => {}
                Some(other) => return Err(self.error(format!("unexpected '{other}'"))),
            }
        }
        Ok((args, kwargs))
    }

    /// Consumes `ident =` when present, leaving the value to be parsed.
    fn keyword(&mut self) -> Result<Option<String>, CallError> {
        let start = self.pos;
        if !self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Ok(None);
        }
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos].iter().collect();
        self.skip_whitespace();
        if self.peek() == Some('=') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            self.skip_whitespace();
            if self.at_end() || self.peek() == Some(',') {
                return Err(self.error(format!("missing value for {key}")));
            }
            return Ok(Some(key));
        }
        self.pos = start;
        Ok(None)
    }

    fn value(&mut self) -> Result<Value, CallError> {
        self.skip_whitespace();
        match self.peek() {
            None | Some(',') | Some(']') => Err(self.error("empty argument")),
            Some('[') => self.list(),
            Some(quote @ ('"' | '\'')) => self.string(quote),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => Ok(self.word()),
            Some(other) => Err(self.error(format!("unexpected '{other}'"))),
        }
    }

    fn list(&mut self) -> Result<Value, CallError> {
        self.pos += 1;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Value::Array(items));
        }
        loop {
            items.push(self.value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => {}
                Some(']') => return Ok(Value::Array(items)),
                Some(other) => return Err(self.error(format!("unexpected '{other}' in list"))),
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<Value, CallError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(Value::String(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value, CallError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        let is_float = text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
        match text.parse::<f64>() {
            Ok(float) if is_float => Number::from_f64(float)
                .map(Value::Number)
                .ok_or_else(|| self.error_at(start, format!("number out of range: {text}"))),
            _ => Err(self.error_at(start, format!("invalid number: {text}"))),
        }
    }

    fn word(&mut self) -> Value {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "true" | "True" => Value::Bool(true),
            "false" | "False" => Value::Bool(false),
            "null" | "None" => Value::Null,
            _ => Value::String(word),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn error(&self, message: impl Into<String>) -> CallError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> CallError {
        CallError::Syntax {
            offset,
            message: message.into(),
        }
    }
}
