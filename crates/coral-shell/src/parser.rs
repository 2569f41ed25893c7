//! Lexer and parser for the guest command language.
//!
//! The grammar is a small POSIX subset: simple commands with single- and
//! double-quoted words, pipelines (`|`), and/or lists (`&&`, `||`), `;`
//! sequencing, and `<` / `>` / `>>` redirections. There is no variable
//! expansion, globbing, or job control.

use thiserror::Error;

/// Errors produced while tokenizing or parsing a script.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A quoted word was never closed.
    #[error("unterminated quote")]
    UnterminatedQuote,
    /// An operator appeared where a command was expected.
    #[error("unexpected token near `{0}`")]
    Unexpected(String),
    /// A redirection operator was not followed by a target word.
    #[error("missing redirection target")]
    MissingRedirTarget,
}

/// A single lexed token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    And,
    Or,
    Pipe,
    Semi,
    RedirIn,
    RedirOut,
    RedirAppend,
}

/// Kind of a redirection attached to a simple command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirKind {
    /// `< target` — read stdin from a file.
    In,
    /// `> target` — write stdout to a file, truncating.
    Out,
    /// `>> target` — append stdout to a file.
    Append,
}

/// A redirection with its target path (unresolved, as written).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// What the redirection does.
    pub kind: RedirKind,
    /// Target path as written in the script.
    pub target: String,
}

/// A simple command: argv words plus redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    /// Command name and arguments, in order.
    pub args: Vec<String>,
    /// Redirections, in the order they were written.
    pub redirs: Vec<Redirect>,
}

/// A pipeline of one or more simple commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Commands in pipeline order.
    pub commands: Vec<SimpleCommand>,
}

/// Connector between pipelines in an and/or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `&&` — run only if the previous pipeline succeeded.
    And,
    /// `||` — run only if the previous pipeline failed.
    Or,
}

/// An and/or list: the unit separated by `;` at the top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndOrList {
    /// First pipeline, always run.
    pub first: Pipeline,
    /// Subsequent pipelines with their connectors.
    pub rest: Vec<(Connector, Pipeline)>,
}

/// Parse a script into a sequence of and/or lists.
///
/// An empty or all-whitespace script parses to an empty sequence.
pub fn parse(input: &str) -> Result<Vec<AndOrList>, ParseError> {
    let tokens = lex(input)?;
    let mut lists = Vec::new();

    for group in split_on(&tokens, &Token::Semi) {
        if group.is_empty() {
            continue;
        }
        lists.push(parse_and_or(group)?);
    }

    Ok(lists)
}

fn lex(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut word = String::new();
    let mut in_word = false;

    macro_rules! flush_word {
        () => {
            if in_word {
                tokens.push(Token::Word(std::mem::take(&mut word)));
                in_word = false;
            }
        };
    }

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' | '\r' => flush_word!(),
            '\'' | '"' => {
                // Quoted span: contents are literal (no expansion either way).
                let quote = c;
                in_word = true;
                let mut closed = false;
                for q in chars.by_ref() {
                    if q == quote {
                        closed = true;
                        break;
                    }
                    word.push(q);
                }
                if !closed {
                    return Err(ParseError::UnterminatedQuote);
                }
            }
            '&' => {
                flush_word!();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::And);
                } else {
                    return Err(ParseError::Unexpected("&".to_string()));
                }
            }
            '|' => {
                flush_word!();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::Or);
                } else {
                    tokens.push(Token::Pipe);
                }
            }
            ';' => {
                flush_word!();
                tokens.push(Token::Semi);
            }
            '>' => {
                flush_word!();
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::RedirAppend);
                } else {
                    tokens.push(Token::RedirOut);
                }
            }
            '<' => {
                flush_word!();
                tokens.push(Token::RedirIn);
            }
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }
    flush_word!();

    Ok(tokens)
}

fn split_on<'a>(tokens: &'a [Token], sep: &Token) -> Vec<&'a [Token]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        if t == sep {
            groups.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    groups.push(&tokens[start..]);
    groups
}

fn parse_and_or(tokens: &[Token]) -> Result<AndOrList, ParseError> {
    let mut segments: Vec<(Option<Connector>, Vec<Token>)> = vec![(None, Vec::new())];

    for t in tokens {
        match t {
            Token::And => segments.push((Some(Connector::And), Vec::new())),
            Token::Or => segments.push((Some(Connector::Or), Vec::new())),
            other => {
                if let Some(last) = segments.last_mut() {
                    last.1.push(other.clone());
                }
            }
        }
    }

    let mut first = None;
    let mut rest = Vec::new();

    for (conn, seg) in segments {
        let pipeline = parse_pipeline(&seg)?;
        match conn {
            None => first = Some(pipeline),
            Some(c) => rest.push((c, pipeline)),
        }
    }

    match first {
        Some(first) => Ok(AndOrList { first, rest }),
        None => Err(ParseError::Unexpected("&&".to_string())),
    }
}

fn parse_pipeline(tokens: &[Token]) -> Result<Pipeline, ParseError> {
    let mut commands = Vec::new();

    for seg in split_on(tokens, &Token::Pipe) {
        commands.push(parse_simple(seg)?);
    }

    // A pipeline with an empty stage means a dangling `|`, `&&`, or `||`.
    if commands.iter().any(|c| c.args.is_empty() && c.redirs.is_empty()) {
        return Err(ParseError::Unexpected("|".to_string()));
    }

    Ok(Pipeline { commands })
}

fn parse_simple(tokens: &[Token]) -> Result<SimpleCommand, ParseError> {
    let mut args = Vec::new();
    let mut redirs = Vec::new();
    let mut iter = tokens.iter();

    while let Some(t) = iter.next() {
        let kind = match t {
            Token::Word(w) => {
                args.push(w.clone());
                continue;
            }
            Token::RedirIn => RedirKind::In,
            Token::RedirOut => RedirKind::Out,
            Token::RedirAppend => RedirKind::Append,
            other => return Err(ParseError::Unexpected(format!("{other:?}"))),
        };
        match iter.next() {
            Some(Token::Word(target)) => redirs.push(Redirect {
                kind,
                target: target.clone(),
            }),
            _ => return Err(ParseError::MissingRedirTarget),
        }
    }

    Ok(SimpleCommand { args, redirs })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse("").unwrap(), vec![]);
        assert_eq!(parse("  \n ; ; ").unwrap(), vec![]);
    }

    #[test]
    fn test_parse_simple_command() {
        let lists = parse("echo hello world").unwrap();
        assert_eq!(lists.len(), 1);
        let cmd = &lists[0].first.commands[0];
        assert_eq!(cmd.args, vec!["echo", "hello", "world"]);
        assert!(cmd.redirs.is_empty());
    }

    #[test]
    fn test_parse_quotes() {
        let lists = parse(r#"echo 'single word' "double word""#).unwrap();
        let cmd = &lists[0].first.commands[0];
        assert_eq!(cmd.args, vec!["echo", "single word", "double word"]);
    }

    #[test]
    fn test_parse_adjacent_quotes_join() {
        let lists = parse(r#"echo a'b c'd"#).unwrap();
        let cmd = &lists[0].first.commands[0];
        assert_eq!(cmd.args, vec!["echo", "ab cd"]);
    }

    #[test]
    fn test_parse_pipeline() {
        let lists = parse("cat /a | grep x | wc -l").unwrap();
        assert_eq!(lists[0].first.commands.len(), 3);
        assert_eq!(lists[0].first.commands[1].args, vec!["grep", "x"]);
    }

    #[test]
    fn test_parse_and_or() {
        let lists = parse("true && echo yes || echo no").unwrap();
        let list = &lists[0];
        assert_eq!(list.first.commands[0].args, vec!["true"]);
        assert_eq!(list.rest.len(), 2);
        assert_eq!(list.rest[0].0, Connector::And);
        assert_eq!(list.rest[1].0, Connector::Or);
    }

    #[test]
    fn test_parse_sequence() {
        let lists = parse("echo a; echo b").unwrap();
        assert_eq!(lists.len(), 2);
    }

    #[test]
    fn test_parse_redirections() {
        let lists = parse("cat /foo/a.txt >> /bar/d.txt").unwrap();
        let cmd = &lists[0].first.commands[0];
        assert_eq!(cmd.args, vec!["cat", "/foo/a.txt"]);
        assert_eq!(
            cmd.redirs,
            vec![Redirect {
                kind: RedirKind::Append,
                target: "/bar/d.txt".to_string()
            }]
        );
    }

    #[test]
    fn test_parse_redir_in_and_out() {
        let lists = parse("grep x < /in.txt > /out.txt").unwrap();
        let cmd = &lists[0].first.commands[0];
        assert_eq!(cmd.redirs.len(), 2);
        assert_eq!(cmd.redirs[0].kind, RedirKind::In);
        assert_eq!(cmd.redirs[1].kind, RedirKind::Out);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("echo 'oops").unwrap_err(), ParseError::UnterminatedQuote);
        assert_eq!(parse("echo > ").unwrap_err(), ParseError::MissingRedirTarget);
        assert!(matches!(parse("echo a & b"), Err(ParseError::Unexpected(_))));
        assert!(matches!(parse("| grep x"), Err(ParseError::Unexpected(_))));
    }
}
