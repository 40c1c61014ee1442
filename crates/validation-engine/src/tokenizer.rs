//! REL 分词器
//!
//! 按空白和语法边界切分源码。引号包裹的片段整体作为一个 token（保留引号），
//! 运算符字符总是单独成 token，多字符运算符由翻译器逐个拼回。

use crate::error::{Result, RuleError};
use crate::operators::is_numeric_literal;

/// 默认的字符串字面量引号
pub const DEFAULT_QUOTE: char = '\'';

/// 单独成 token 的字符
const SPLIT_CHARS: &[char] = &['(', ')', ',', '!', '-', '=', '+', '>', '<'];

#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    quote: char,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE)
    }
}

impl Tokenizer {
    pub fn new(quote: char) -> Self {
        Self { quote }
    }

    pub fn tokenize(&self, source: &str) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c == self.quote {
                flush(&mut current, &mut tokens);
                let mut literal = String::from(c);
                let mut closed = false;
                while let Some(next) = chars.next() {
                    if next == '\\' {
                        if let Some(&escaped) = chars.peek() {
                            if escaped == self.quote || escaped == '\\' {
                                literal.push(next);
                                literal.push(escaped);
                                chars.next();
                                continue;
                            }
                        }
                        literal.push(next);
                    } else if next == self.quote {
                        literal.push(next);
                        closed = true;
                        break;
                    } else {
                        literal.push(next);
                    }
                }
                if !closed {
                    return Err(RuleError::Syntax(format!(
                        "字符串字面量未闭合: {}",
                        literal
                    )));
                }
                tokens.push(literal);
            } else if (c == '-' || c == '+') && is_exponent_prefix(&current) {
                current.push(c);
            } else if c.is_whitespace() {
                flush(&mut current, &mut tokens);
            } else if SPLIT_CHARS.contains(&c) {
                flush(&mut current, &mut tokens);
                tokens.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        flush(&mut current, &mut tokens);

        Ok(tokens)
    }
}

/// `1.5e` 之后的正负号属于指数部分
fn is_exponent_prefix(current: &str) -> bool {
    current
        .strip_suffix(['e', 'E'])
        .is_some_and(is_numeric_literal)
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<String> {
        Tokenizer::default().tokenize(source).unwrap()
    }

    #[test]
    fn test_operators_split_into_single_chars() {
        assert_eq!(tokens("age>=2"), vec!["age", ">", "=", "2"]);
        assert_eq!(tokens("a<>b"), vec!["a", "<", ">", "b"]);
        assert_eq!(tokens("a == -1"), vec!["a", "=", "=", "-", "1"]);
    }

    #[test]
    fn test_exponent_sign_stays_in_literal() {
        assert_eq!(tokens("a > 1.5e-3"), vec!["a", ">", "1.5e-3"]);
        assert_eq!(tokens("a<2E+4"), vec!["a", "<", "2E+4"]);
        assert_eq!(tokens("size-1"), vec!["size", "-", "1"]);
        assert_eq!(tokens("rate - 1"), vec!["rate", "-", "1"]);
    }

    #[test]
    fn test_brackets_and_functions() {
        assert_eq!(
            tokens("isEmpty(name) or !(owner.id == null)"),
            vec![
                "isEmpty", "(", "name", ")", "or", "!", "(", "owner.id", "=", "=", "null", ")"
            ]
        );
    }

    #[test]
    fn test_quoted_literal_is_atomic() {
        assert_eq!(
            tokens("name == 'a (b) == c'"),
            vec!["name", "=", "=", "'a (b) == c'"]
        );
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        assert_eq!(tokens(r"name == 'it\'s'"), vec!["name", "=", "=", r"'it\'s'"]);
    }

    #[test]
    fn test_configurable_quote() {
        let tokenizer = Tokenizer::new('"');
        assert_eq!(
            tokenizer.tokenize(r#"title == "x y""#).unwrap(),
            vec!["title", "=", "=", "\"x y\""]
        );
    }

    #[test]
    fn test_unterminated_literal() {
        let err = Tokenizer::default().tokenize("name == 'abc").unwrap_err();
        assert!(matches!(err, RuleError::Syntax(_)));
    }
}
