//! 规则词法分析
//!
//! 分两步：`scan` 只依据字符切分出单词、字符串字面量、操作符和括号，
//! 与上下文无关；`tokenize` 再结合上下文把单词归类为布尔字面量或变量。

use crate::context::AudienceContext;
use crate::error::{ParseError, ParseErrorKind};
use crate::models::{ContextField, Literal, Paren, Token, TokenKind, Variable};
use crate::operators::Operator;
use audience_shared::config::MissingFieldPolicy;

/// 可以开始一个操作符或括号的字符
const OPERATOR_CHARS: &[char] = &['(', ')', '&', '|', '=', '!', '~'];

/// 与上下文无关的词素
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexeme {
    /// 未加引号的单词，待归类
    Word(String),
    /// 单引号字符串，已去除转义
    Quoted(String),
    Operator(Operator),
    Paren(Paren),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    pub lexeme: Lexeme,
    pub column: usize,
}

/// 切分规则串
pub fn scan(input: &str) -> Result<Vec<RawToken>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_start = 0;
    let mut string_start: Option<usize> = None;
    let mut escaping = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let column = i + 1;

        if escaping {
            if ch != '\'' {
                return Err(ParseError::new(ParseErrorKind::InvalidEscapeSequence, column));
            }
            if current.is_empty() && string_start.is_none() {
                current_start = column;
            }
            current.push(ch);
            escaping = false;
            i += 1;
            continue;
        }

        if ch == '\\' {
            escaping = true;
            i += 1;
            continue;
        }

        if ch == '\'' {
            match string_start {
                Some(start) => {
                    tokens.push(RawToken {
                        lexeme: Lexeme::Quoted(std::mem::take(&mut current)),
                        column: start,
                    });
                    string_start = None;
                }
                None if current.is_empty() => string_start = Some(column),
                None => {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedSingleQuote, column));
                }
            }
            i += 1;
            continue;
        }

        if string_start.is_some() {
            current.push(ch);
            i += 1;
            continue;
        }

        if ch.is_whitespace() {
            flush_word(&mut tokens, &mut current, current_start);
            i += 1;
            continue;
        }

        if OPERATOR_CHARS.contains(&ch) {
            flush_word(&mut tokens, &mut current, current_start);

            match ch {
                '(' => tokens.push(RawToken {
                    lexeme: Lexeme::Paren(Paren::Open),
                    column,
                }),
                ')' => tokens.push(RawToken {
                    lexeme: Lexeme::Paren(Paren::Close),
                    column,
                }),
                _ => {
                    let symbol: String = chars[i..chars.len().min(i + 2)].iter().collect();
                    let op = Operator::from_symbol(&symbol).ok_or_else(|| {
                        ParseError::new(ParseErrorKind::UnknownOperator(ch.to_string()), column)
                    })?;
                    tokens.push(RawToken {
                        lexeme: Lexeme::Operator(op),
                        column,
                    });
                    i += 1;
                }
            }
            i += 1;
            continue;
        }

        if current.is_empty() {
            current_start = column;
        }
        current.push(ch);
        i += 1;
    }

    if let Some(start) = string_start {
        return Err(ParseError::new(ParseErrorKind::UnterminatedStringLiteral, start));
    }
    if escaping {
        return Err(ParseError::new(
            ParseErrorKind::InvalidEscapeSequence,
            chars.len(),
        ));
    }

    flush_word(&mut tokens, &mut current, current_start);
    Ok(tokens)
}

fn flush_word(tokens: &mut Vec<RawToken>, current: &mut String, start: usize) {
    if !current.is_empty() {
        tokens.push(RawToken {
            lexeme: Lexeme::Word(std::mem::take(current)),
            column: start,
        });
    }
}

/// 把规则串转换为词法单元序列
pub fn tokenize(
    input: &str,
    context: &AudienceContext,
    policy: MissingFieldPolicy,
) -> Result<Vec<Token>, ParseError> {
    scan(input)?
        .into_iter()
        .map(|raw| {
            let kind = match raw.lexeme {
                Lexeme::Word(word) => categorize(&word, context, policy)
                    .map_err(|kind| ParseError::new(kind, raw.column))?,
                Lexeme::Quoted(text) => TokenKind::Literal(Literal::Text(text)),
                Lexeme::Operator(op) => TokenKind::Operator(op),
                Lexeme::Paren(paren) => TokenKind::Paren(paren),
            };
            Ok(Token::new(kind, raw.column))
        })
        .collect()
}

/// 单词归类：布尔字面量、固定字段或 `对象.字段路径`
pub fn categorize(
    word: &str,
    context: &AudienceContext,
    policy: MissingFieldPolicy,
) -> Result<TokenKind, ParseErrorKind> {
    if word.eq_ignore_ascii_case("true") {
        return Ok(TokenKind::Literal(Literal::Bool(true)));
    }
    if word.eq_ignore_ascii_case("false") {
        return Ok(TokenKind::Literal(Literal::Bool(false)));
    }

    if let Some(field) = ContextField::from_name(word) {
        return Ok(TokenKind::Variable(Variable::Field(field)));
    }

    if let Some((object, field)) = word.split_once('.') {
        if let Some(fields) = context.record(object) {
            let known = fields.contains_key(field);
            if !field.is_empty() && (known || policy == MissingFieldPolicy::DefaultEmpty) {
                return Ok(TokenKind::Variable(Variable::Record {
                    object: object.to_string(),
                    field: field.to_string(),
                }));
            }
        }
    }

    Err(ParseErrorKind::UnknownVariable(word.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexemes(input: &str) -> Vec<Lexeme> {
        scan(input).unwrap().into_iter().map(|t| t.lexeme).collect()
    }

    fn scan_err(input: &str) -> ParseError {
        scan(input).unwrap_err()
    }

    fn sample_context() -> AudienceContext {
        AudienceContext::builder()
            .field("Account", "Name", "Acme")
            .field("Account", "Owner.Title", "VP")
            .build()
    }

    #[test]
    fn test_scan_simple_comparison() {
        assert_eq!(
            lexemes("Profile == 'System Administrator'"),
            vec![
                Lexeme::Word("Profile".to_string()),
                Lexeme::Operator(Operator::Eq),
                Lexeme::Quoted("System Administrator".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_without_whitespace() {
        assert_eq!(
            lexemes("(Role=='Boss')||Location~='ada'"),
            vec![
                Lexeme::Paren(Paren::Open),
                Lexeme::Word("Role".to_string()),
                Lexeme::Operator(Operator::Eq),
                Lexeme::Quoted("Boss".to_string()),
                Lexeme::Paren(Paren::Close),
                Lexeme::Operator(Operator::Or),
                Lexeme::Word("Location".to_string()),
                Lexeme::Operator(Operator::EndsWith),
                Lexeme::Quoted("ada".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_all_operators() {
        assert_eq!(
            lexemes("a == b != c =~ d ~= e && f || g"),
            vec![
                Lexeme::Word("a".to_string()),
                Lexeme::Operator(Operator::Eq),
                Lexeme::Word("b".to_string()),
                Lexeme::Operator(Operator::Neq),
                Lexeme::Word("c".to_string()),
                Lexeme::Operator(Operator::StartsWith),
                Lexeme::Word("d".to_string()),
                Lexeme::Operator(Operator::EndsWith),
                Lexeme::Word("e".to_string()),
                Lexeme::Operator(Operator::And),
                Lexeme::Word("f".to_string()),
                Lexeme::Operator(Operator::Or),
                Lexeme::Word("g".to_string()),
            ]
        );
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        assert_eq!(
            lexemes(r"Profile == 'O\'Brien'"),
            vec![
                Lexeme::Word("Profile".to_string()),
                Lexeme::Operator(Operator::Eq),
                Lexeme::Quoted("O'Brien".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_literal_and_inner_whitespace() {
        assert_eq!(
            lexemes("Role == ''  &&  Profile == '  two  spaces '"),
            vec![
                Lexeme::Word("Role".to_string()),
                Lexeme::Operator(Operator::Eq),
                Lexeme::Quoted(String::new()),
                Lexeme::Operator(Operator::And),
                Lexeme::Word("Profile".to_string()),
                Lexeme::Operator(Operator::Eq),
                Lexeme::Quoted("  two  spaces ".to_string()),
            ]
        );
    }

    #[test]
    fn test_columns_are_one_based() {
        let tokens = scan("Role == 'x'").unwrap();
        let columns: Vec<usize> = tokens.iter().map(|t| t.column).collect();
        assert_eq!(columns, vec![1, 6, 9]);
    }

    #[test]
    fn test_unterminated_string_literal() {
        let err = scan_err("Profile == 'Unterminated string literal");
        assert_eq!(err.kind, ParseErrorKind::UnterminatedStringLiteral);
        assert_eq!(err.column, 12);
    }

    #[test]
    fn test_invalid_escape_sequence() {
        let err = scan_err(r"Permission == 'Test\x'");
        assert_eq!(err.kind, ParseErrorKind::InvalidEscapeSequence);
        assert_eq!(err.column, 21);

        let err = scan_err(r"Permission == 'Test'\");
        assert_eq!(err.kind, ParseErrorKind::InvalidEscapeSequence);
    }

    #[test]
    fn test_unexpected_single_quote() {
        let err = scan_err("Profile == abc'def'");
        assert_eq!(err.kind, ParseErrorKind::UnexpectedSingleQuote);
        assert_eq!(err.column, 15);
    }

    #[test]
    fn test_triple_equals_is_unknown_operator() {
        let err = scan_err("Profile === 'Test'");
        assert_eq!(err.kind, ParseErrorKind::UnknownOperator("=".to_string()));
        assert_eq!(err.column, 11);
    }

    #[test]
    fn test_single_operator_chars_are_rejected() {
        for input in ["a & b", "a | b", "a = 'b'", "a ! b", "a ~ b"] {
            let err = scan_err(input);
            assert!(
                matches!(err.kind, ParseErrorKind::UnknownOperator(_)),
                "{} should fail with UnknownOperator",
                input
            );
        }
    }

    #[test]
    fn test_trailing_operator_char() {
        let err = scan_err("Profile == 'x' &");
        assert_eq!(err.kind, ParseErrorKind::UnknownOperator("&".to_string()));
        assert_eq!(err.column, 16);
    }

    #[test]
    fn test_categorize_booleans_any_case() {
        let ctx = AudienceContext::default();
        for (word, expected) in [("true", true), ("FALSE", false), ("True", true)] {
            assert_eq!(
                categorize(word, &ctx, MissingFieldPolicy::DefaultEmpty),
                Ok(TokenKind::Literal(Literal::Bool(expected)))
            );
        }
    }

    #[test]
    fn test_categorize_context_fields() {
        let ctx = AudienceContext::default();
        assert_eq!(
            categorize("Location", &ctx, MissingFieldPolicy::Strict),
            Ok(TokenKind::Variable(Variable::Field(ContextField::Location)))
        );
        assert_eq!(
            categorize("Audience", &ctx, MissingFieldPolicy::Strict),
            Ok(TokenKind::Variable(Variable::Field(ContextField::Audience)))
        );
    }

    #[test]
    fn test_categorize_record_field_with_dotted_path() {
        let ctx = sample_context();
        assert_eq!(
            categorize("Account.Owner.Title", &ctx, MissingFieldPolicy::Strict),
            Ok(TokenKind::Variable(Variable::Record {
                object: "Account".to_string(),
                field: "Owner.Title".to_string(),
            }))
        );
    }

    #[test]
    fn test_categorize_missing_field_depends_on_policy() {
        let ctx = sample_context();
        assert!(categorize("Account.Industry", &ctx, MissingFieldPolicy::DefaultEmpty).is_ok());
        assert_eq!(
            categorize("Account.Industry", &ctx, MissingFieldPolicy::Strict),
            Err(ParseErrorKind::UnknownVariable("Account.Industry".to_string()))
        );
    }

    #[test]
    fn test_categorize_unknown_variable() {
        let ctx = sample_context();
        for word in ["Foo", "Contact.Email", "Account.", "profile"] {
            assert_eq!(
                categorize(word, &ctx, MissingFieldPolicy::DefaultEmpty),
                Err(ParseErrorKind::UnknownVariable(word.to_string()))
            );
        }
    }

    #[test]
    fn test_tokenize_reports_unknown_variable_column() {
        let ctx = sample_context();
        let err = tokenize("Role == 'x' && Foo == 'X'", &ctx, MissingFieldPolicy::DefaultEmpty)
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownVariable("Foo".to_string()));
        assert_eq!(err.column, 16);
    }

    #[test]
    fn test_quoted_text_is_never_a_variable() {
        let ctx = AudienceContext::default();
        let tokens = tokenize("'Foo' == 'true'", &ctx, MissingFieldPolicy::Strict).unwrap();
        assert_eq!(
            tokens[0].kind,
            TokenKind::Literal(Literal::Text("Foo".to_string()))
        );
        assert_eq!(
            tokens[2].kind,
            TokenKind::Literal(Literal::Text("true".to_string()))
        );
    }
}
