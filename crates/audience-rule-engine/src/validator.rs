//! 词法单元结构校验
//!
//! 在转换为后缀表达式之前检查括号配对以及操作数与操作符是否交替出现。

use crate::error::{ParseError, ParseErrorKind};
use crate::models::{Paren, Token, TokenKind};

/// 校验词法单元序列
pub fn validate(tokens: &[Token]) -> Result<(), ParseError> {
    let Some(last) = tokens.last() else {
        return Err(ParseError::new(ParseErrorKind::EmptyExpression, 1));
    };

    // 未闭合左括号的列号
    let mut open_parens: Vec<usize> = Vec::new();
    let mut expect_operator = false;

    for token in tokens {
        let fail = |kind| Err(ParseError::new(kind, token.column));

        match &token.kind {
            TokenKind::Paren(Paren::Open) => {
                if expect_operator {
                    return fail(ParseErrorKind::ExpectedOperator);
                }
                open_parens.push(token.column);
            }
            TokenKind::Paren(Paren::Close) => {
                if open_parens.pop().is_none() {
                    return fail(ParseErrorKind::UnmatchedClosingParenthesis);
                }
                if !expect_operator {
                    return fail(ParseErrorKind::ExpectedOperand);
                }
            }
            TokenKind::Literal(_) | TokenKind::Variable(_) => {
                if expect_operator {
                    return fail(ParseErrorKind::ExpectedOperator);
                }
            }
            TokenKind::Operator(_) => {
                if !expect_operator {
                    return fail(ParseErrorKind::UnexpectedOperator);
                }
            }
        }

        expect_operator = token.is_operand() || token.kind == TokenKind::Paren(Paren::Close);
    }

    if let Some(column) = open_parens.pop() {
        return Err(ParseError::new(ParseErrorKind::UnclosedParenthesis, column));
    }

    if !expect_operator {
        // 以操作符结尾
        return Err(ParseError::new(ParseErrorKind::ExpectedOperand, last.column));
    }

    Ok(())
}
