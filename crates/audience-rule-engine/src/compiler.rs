//! 规则编译器
//!
//! 将规则串经词法分析、结构校验后按操作符优先级（调度场算法）转换为后缀表达式。
//! 编译结果只在一次求值内有效，不做缓存。

use crate::context::AudienceContext;
use crate::error::ParseError;
use crate::lexer;
use crate::models::{Paren, Token, TokenKind};
use crate::validator;
use audience_shared::config::MissingFieldPolicy;
use std::collections::BTreeSet;

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 后缀表达式（不含括号）
    pub rpn: Vec<Token>,
    /// 规则中引用的所有变量名
    pub referenced_variables: BTreeSet<String>,
}

/// 规则编译器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCompiler {
    missing_field_policy: MissingFieldPolicy,
}

impl RuleCompiler {
    pub fn new(missing_field_policy: MissingFieldPolicy) -> Self {
        Self {
            missing_field_policy,
        }
    }

    /// 编译规则串
    pub fn compile(
        &self,
        rule: &str,
        context: &AudienceContext,
    ) -> Result<CompiledRule, ParseError> {
        let tokens = lexer::tokenize(rule, context, self.missing_field_policy)?;
        validator::validate(&tokens)?;

        let referenced_variables = tokens
            .iter()
            .filter_map(|token| match &token.kind {
                TokenKind::Variable(var) => Some(var.name()),
                _ => None,
            })
            .collect();

        Ok(CompiledRule {
            rpn: to_postfix(tokens),
            referenced_variables,
        })
    }
}

/// 中缀转后缀
///
/// 栈顶操作符优先级不低于当前操作符时先出栈（左结合）。输入须已通过校验。
pub fn to_postfix(tokens: Vec<Token>) -> Vec<Token> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::Literal(_) | TokenKind::Variable(_) => output.push(token),
            TokenKind::Operator(op) => {
                while let Some(top) = stack.last() {
                    match top.kind {
                        TokenKind::Operator(top_op) if top_op.precedence() >= op.precedence() => {
                            if let Some(popped) = stack.pop() {
                                output.push(popped);
                            }
                        }
                        _ => break,
                    }
                }
                stack.push(token);
            }
            TokenKind::Paren(Paren::Open) => stack.push(token),
            TokenKind::Paren(Paren::Close) => {
                while let Some(top) = stack.pop() {
                    if top.kind == TokenKind::Paren(Paren::Open) {
                        break;
                    }
                    output.push(top);
                }
            }
        }
    }

    // 剩余的只会是操作符
    output.extend(
        stack
            .into_iter()
            .rev()
            .filter(|top| matches!(top.kind, TokenKind::Operator(_))),
    );

    output
}
