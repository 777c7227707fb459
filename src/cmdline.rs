//! Shell-like tokenization for [`Spell::from_string`].
//!
//! The rules are deliberately smaller than any real shell's: whitespace
//! separates tokens, a backslash escapes the following character literally
//! (everywhere, including inside quotes), and single or double quotes
//! suppress splitting until the matching quote. Quote characters are
//! stripped, do not nest, and carry the same meaning. There is no variable
//! expansion, globbing, or comment handling.
//!
//! [`Spell::from_string`]: crate::Spell::from_string

/// Splits a command line into tokens.
///
/// Lenient at the edges: an unclosed quote runs to the end of the input and
/// a trailing lone backslash is dropped.
pub(crate) fn split(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    in_token = true;
                    current.push(escaped);
                }
            }
            q @ ('\'' | '"') if quote == Some(q) => quote = None,
            q @ ('\'' | '"') if quote.is_none() => {
                in_token = true;
                quote = Some(q);
            }
            c if quote.is_none() && c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::split;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(split("echo a b"), ["echo", "a", "b"]);
        assert_eq!(split("echo \t  a\t b "), ["echo", "a", "b"]);
    }

    #[test]
    fn quotes_preserve_internal_whitespace() {
        assert_eq!(split("echo 'Hello World'"), ["echo", "Hello World"]);
        assert_eq!(split("echo \"Hello World\""), ["echo", "Hello World"]);
    }

    #[test]
    fn quotes_join_adjacent_fragments() {
        assert_eq!(split("echo a'b c'd"), ["echo", "ab cd"]);
    }

    #[test]
    fn quote_characters_are_stripped() {
        assert_eq!(split("echo H'ell'o World"), ["echo", "Hello", "World"]);
    }

    #[test]
    fn quotes_do_not_nest() {
        assert_eq!(split(r#"echo '"Hello World"'"#), ["echo", "\"Hello World\""]);
        assert_eq!(split(r#"echo "it's""#), ["echo", "it's"]);
    }

    #[test]
    fn backslash_escapes_the_next_character() {
        assert_eq!(split(r"echo a\ b"), ["echo", "a b"]);
        assert_eq!(split(r#"echo \"x\""#), ["echo", "\"x\""]);
    }

    #[test]
    fn backslash_escapes_inside_quotes() {
        assert_eq!(split(r#"echo '\'Hello World\''"#), ["echo", "'Hello World'"]);
    }

    #[test]
    fn multibyte_input_splits_per_character() {
        assert_eq!(split("echo 안녕'하세'요"), ["echo", "안녕하세요"]);
    }

    #[test]
    fn empty_and_blank_input_yield_no_tokens() {
        assert!(split("").is_empty());
        assert!(split("   \t ").is_empty());
    }

    #[test]
    fn empty_quotes_yield_an_empty_token() {
        assert_eq!(split("x '' y"), ["x", "", "y"]);
    }

    #[test]
    fn unclosed_quote_runs_to_the_end() {
        assert_eq!(split("echo 'abc"), ["echo", "abc"]);
    }

    #[test]
    fn trailing_lone_backslash_is_dropped() {
        assert_eq!(split("echo \\"), ["echo"]);
    }
}
