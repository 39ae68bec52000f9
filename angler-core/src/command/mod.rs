use thiserror::Error;

/// Prefix that addresses every agent listening in chat.
pub const GLOBAL_PREFIX: &str = "!all";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lower-cased first token.
    pub keyword: String,
    /// Remaining tokens in order, case preserved, quotes stripped.
    pub args: Vec<String>,
    /// Who issued the command (chat sender, or the agent itself for console input).
    pub issuer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("command is empty")]
    Empty,
    #[error("unterminated quote starting at byte {0}")]
    UnterminatedQuote(usize),
}

/// Tokenize `line` into a [`Command`] issued by `issuer`.
///
/// Tokens are split on whitespace, except inside double-quoted spans which
/// may contain spaces. Quote characters never appear in the output.
pub fn parse_command(line: &str, issuer: &str) -> Result<Command, ParseError> {
    let mut tokens = tokenize(line)?.into_iter();
    let keyword = tokens.next().ok_or(ParseError::Empty)?.to_lowercase();

    Ok(Command {
        keyword,
        args: tokens.collect(),
        issuer: issuer.to_string(),
    })
}

fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote_start: Option<usize> = None;

    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => {
                quote_start = match quote_start {
                    Some(_) => None,
                    None => Some(idx),
                };
                in_token = true;
            }
            c if c.is_whitespace() && quote_start.is_none() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(start) = quote_start {
        return Err(ParseError::UnterminatedQuote(start));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Strip the command prefix from a chat message.
///
/// Returns `None` when the message is not addressed to this agent (neither
/// `own_prefix` nor [`GLOBAL_PREFIX`]) or was sent by the agent itself.
pub fn strip_chat_prefix<'a>(
    message: &'a str,
    sender: &str,
    own_name: &str,
    own_prefix: &str,
) -> Option<&'a str> {
    if sender == own_name {
        return None;
    }
    let message = message.trim();
    message
        .strip_prefix(GLOBAL_PREFIX)
        .or_else(|| message.strip_prefix(own_prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_is_lowercased_args_keep_case() {
        let cmd = parse_command("GoTo Alice", "Bob").unwrap();
        assert_eq!(cmd.keyword, "goto");
        assert_eq!(cmd.args, vec!["Alice".to_string()]);
        assert_eq!(cmd.issuer, "Bob");
    }

    #[test]
    fn test_quoted_span_is_one_token() {
        let cmd = parse_command(r#"follow "Mr Fish"  now"#, "Bob").unwrap();
        assert_eq!(cmd.keyword, "follow");
        assert_eq!(cmd.args, vec!["Mr Fish".to_string(), "now".to_string()]);
    }

    #[test]
    fn test_coordinates_in_order() {
        let cmd = parse_command("  goto 10 64 -5 ", "Bob").unwrap();
        assert_eq!(cmd.args, vec!["10", "64", "-5"]);
    }

    #[test]
    fn test_empty_line_fails() {
        assert_eq!(parse_command("   ", "Bob"), Err(ParseError::Empty));
        assert_eq!(parse_command("", "Bob"), Err(ParseError::Empty));
    }

    #[test]
    fn test_unterminated_quote_fails() {
        assert_eq!(
            parse_command(r#"goto "Alice"#, "Bob"),
            Err(ParseError::UnterminatedQuote(5))
        );
    }

    #[test]
    fn test_empty_quotes_yield_empty_arg() {
        let cmd = parse_command(r#"goto """#, "Bob").unwrap();
        assert_eq!(cmd.args, vec![String::new()]);
    }

    #[test]
    fn test_strip_chat_prefix() {
        assert_eq!(strip_chat_prefix("!f start", "Alice", "Fisher", "!f"), Some(" start"));
        assert_eq!(strip_chat_prefix("!all stop", "Alice", "Fisher", "!f"), Some(" stop"));
        assert_eq!(strip_chat_prefix("hello", "Alice", "Fisher", "!f"), None);
        assert_eq!(strip_chat_prefix("!f start", "Fisher", "Fisher", "!f"), None);
    }
}
