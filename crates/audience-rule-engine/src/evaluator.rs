//! 后缀表达式求值器
//!
//! 显式操作数栈：字面量与变量入栈，遇到操作符弹出两个操作数计算后把布尔结果
//! 作为字面量压回。比较操作总是把变量一侧归一到左边，与它在原表达式中的位置无关。

use crate::context::{AudienceContext, FieldValue};
use crate::error::{ParseError, ParseErrorKind};
use crate::executor::RuleExecutor;
use crate::models::{ContextField, Literal, Token, TokenKind, Variable};
use crate::operators::Operator;
use std::collections::BTreeSet;
use tracing::debug;

/// 一次求值（含递归引用）共享的状态
#[derive(Debug, Default)]
pub(crate) struct EvaluationScope {
    /// 正在求值的受众链，用于识别循环引用
    chain: Vec<String>,
    depth: usize,
    trace: Option<Vec<String>>,
}

impl EvaluationScope {
    pub(crate) fn new(root_audience: &str, trace_enabled: bool) -> Self {
        Self {
            chain: if root_audience.is_empty() {
                Vec::new()
            } else {
                vec![root_audience.to_string()]
            },
            depth: 0,
            trace: trace_enabled.then(Vec::new),
        }
    }

    pub(crate) fn take_trace(&mut self) -> Vec<String> {
        self.trace.take().unwrap_or_default()
    }
}

/// 操作数取值
#[derive(Debug, Clone, Copy)]
enum Value<'s> {
    Text(&'s str),
    Bool(bool),
    Set(&'s BTreeSet<String>),
}

impl Value<'_> {
    /// 大小写无关的 "true"/"false" 字符串转为布尔值
    fn coerce_bool(self) -> Self {
        match self {
            Value::Text(text) => parse_bool(text).map_or(self, Value::Bool),
            other => other,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Bool(true) => Some("true"),
            Value::Bool(false) => Some("false"),
            Value::Set(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::Text(text) => format!("'{}'", text),
            Value::Bool(b) => b.to_string(),
            Value::Set(items) => {
                let joined: Vec<&str> = items.iter().map(String::as_str).collect();
                format!("{{{}}}", joined.join(", "))
            }
        }
    }
}

impl<'s> From<&'s FieldValue> for Value<'s> {
    fn from(value: &'s FieldValue) -> Self {
        match value {
            FieldValue::Text(text) => Value::Text(text),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Set(items) => Value::Set(items),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// 栈中的操作数
#[derive(Debug, Clone, Copy)]
enum Operand<'s> {
    Literal(Value<'s>),
    Variable {
        variable: &'s Variable,
        value: Value<'s>,
    },
    /// `Audience` 伪变量，与比较操作符配对后才解析为对另一受众的求值
    AudienceRef,
    /// 映射类字段（AudiencesByName、Data），不能参与任何运算
    Opaque(ContextField),
}

impl<'s> Operand<'s> {
    fn is_variable(&self) -> bool {
        !matches!(self, Operand::Literal(_))
    }

    fn value(&self) -> Option<Value<'s>> {
        match self {
            Operand::Literal(value) | Operand::Variable { value, .. } => Some(*value),
            Operand::AudienceRef | Operand::Opaque(_) => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self.value()? {
            Value::Bool(b) => Some(b),
            Value::Text(text) => parse_bool(text),
            Value::Set(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Operand::Literal(value) => value.describe(),
            Operand::Variable { variable, value } => {
                format!("{}={}", variable.name(), value.describe())
            }
            Operand::AudienceRef => ContextField::Audience.name().to_string(),
            Operand::Opaque(field) => field.name().to_string(),
        }
    }
}

/// 把变量一侧归一到左边；`Audience` 伪变量优先
fn normalize<'s>(left: Operand<'s>, right: Operand<'s>) -> (Operand<'s>, Operand<'s>) {
    match (&left, &right) {
        (Operand::AudienceRef, _) => (left, right),
        (_, Operand::AudienceRef) => (right, left),
        (_, r) if r.is_variable() => (right, left),
        _ => (left, right),
    }
}

/// 比较两个已解析的值，组合不受支持时返回 None
fn compare_values(op: Operator, variable: Value<'_>, literal: Value<'_>) -> Option<bool> {
    match (variable, literal) {
        (Value::Set(items), Value::Text(text)) => match op {
            Operator::Eq => Some(items.contains(text)),
            Operator::Neq => Some(!items.contains(text)),
            Operator::StartsWith => Some(
                items
                    .iter()
                    .any(|item| !item.is_empty() && item.starts_with(text)),
            ),
            Operator::EndsWith => Some(
                items
                    .iter()
                    .any(|item| !item.is_empty() && item.ends_with(text)),
            ),
            Operator::And | Operator::Or => None,
        },
        (Value::Text(text), Value::Set(items)) => match op {
            Operator::Eq => Some(items.contains(text)),
            Operator::Neq => Some(!items.contains(text)),
            _ => None,
        },
        (Value::Set(_), _) | (_, Value::Set(_)) => None,
        (a, b) => {
            let (a, b) = (a.coerce_bool(), b.coerce_bool());
            match op {
                Operator::Eq | Operator::Neq => {
                    // 类型不同的标量永不相等
                    let equal = match (a, b) {
                        (Value::Bool(x), Value::Bool(y)) => x == y,
                        (Value::Text(x), Value::Text(y)) => x == y,
                        _ => false,
                    };
                    Some(equal == (op == Operator::Eq))
                }
                // 前缀/后缀按转换后的文本形式比较
                Operator::StartsWith => Some(a.as_text()?.starts_with(b.as_text()?)),
                Operator::EndsWith => Some(a.as_text()?.ends_with(b.as_text()?)),
                Operator::And | Operator::Or => None,
            }
        }
    }
}

/// 后缀表达式求值器
pub(crate) struct RpnEvaluator<'s> {
    executor: &'s RuleExecutor,
    context: &'s AudienceContext,
    scope: &'s mut EvaluationScope,
}

impl<'s> RpnEvaluator<'s> {
    pub(crate) fn new(
        executor: &'s RuleExecutor,
        context: &'s AudienceContext,
        scope: &'s mut EvaluationScope,
    ) -> Self {
        Self {
            executor,
            context,
            scope,
        }
    }

    /// 求值，栈中最终必须只剩一个布尔值
    pub(crate) fn run(&mut self, rpn: &'s [Token]) -> Result<bool, ParseError> {
        let mut stack: Vec<Operand<'s>> = Vec::with_capacity(rpn.len());

        for token in rpn {
            match &token.kind {
                TokenKind::Literal(Literal::Text(text)) => {
                    stack.push(Operand::Literal(Value::Text(text)));
                }
                TokenKind::Literal(Literal::Bool(b)) => {
                    stack.push(Operand::Literal(Value::Bool(*b)));
                }
                TokenKind::Variable(variable) => stack.push(self.resolve(variable)),
                TokenKind::Operator(op) => {
                    let missing = || {
                        ParseError::new(ParseErrorKind::MissingOperand(op.to_string()), token.column)
                    };
                    let right = stack.pop().ok_or_else(missing)?;
                    let left = stack.pop().ok_or_else(missing)?;
                    let result = self.apply(*op, left, right, token.column)?;
                    stack.push(Operand::Literal(Value::Bool(result)));
                }
                // 编译后的序列不含括号
                TokenKind::Paren(_) => {}
            }
        }

        let last_column = rpn.last().map_or(1, |token| token.column);
        let result = match stack.as_slice() {
            [] => return Err(ParseError::new(ParseErrorKind::EmptyExpression, 1)),
            [only] => only,
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::ExpectedOperator,
                    last_column,
                ));
            }
        };

        result.as_bool().ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::NonBooleanResult(result.describe()),
                last_column,
            )
        })
    }

    fn resolve(&self, variable: &'s Variable) -> Operand<'s> {
        let context = self.context;
        let value = match variable {
            Variable::Field(field) => match field {
                ContextField::Profile => Value::Text(context.profile()),
                ContextField::Role => Value::Text(context.role()),
                ContextField::Domain => Value::Text(context.domain()),
                ContextField::Permission => Value::Set(context.permission()),
                ContextField::Location => Value::Set(context.location()),
                ContextField::Audience => return Operand::AudienceRef,
                ContextField::AudiencesByName | ContextField::Data => {
                    return Operand::Opaque(*field);
                }
            },
            // 宽松策略下缺失字段按空字符串处理
            Variable::Record { object, field } => context
                .field(object, field)
                .map_or(Value::Text(""), Value::from),
        };

        Operand::Variable { variable, value }
    }

    fn apply(
        &mut self,
        op: Operator,
        left: Operand<'s>,
        right: Operand<'s>,
        column: usize,
    ) -> Result<bool, ParseError> {
        let unsupported = || {
            ParseError::new(
                ParseErrorKind::UnsupportedComparison {
                    operator: op.to_string(),
                    left: left.describe(),
                    right: right.describe(),
                },
                column,
            )
        };

        let (variable, literal) = normalize(left, right);

        let result = match op {
            Operator::And | Operator::Or => {
                let a = variable.as_bool().ok_or_else(unsupported)?;
                let b = literal.as_bool().ok_or_else(unsupported)?;
                if op == Operator::And { a && b } else { a || b }
            }
            Operator::Eq | Operator::Neq | Operator::StartsWith | Operator::EndsWith => {
                match (variable, literal) {
                    (Operand::AudienceRef, other) => {
                        let Some(Value::Text(name)) = other.value() else {
                            return Err(unsupported());
                        };
                        // 任一比较操作符都直接取被引用受众的求值结果
                        self.evaluate_reference(name, column)?
                    }
                    (Operand::Opaque(_), _) | (_, Operand::Opaque(_)) => {
                        return Err(unsupported());
                    }
                    _ => {
                        let (Some(a), Some(b)) = (variable.value(), literal.value()) else {
                            return Err(unsupported());
                        };
                        compare_values(op, a, b).ok_or_else(unsupported)?
                    }
                }
            }
        };

        if let Some(trace) = self.scope.trace.as_mut() {
            trace.push(format!(
                "{} {} {} => {}",
                left.describe(),
                op,
                right.describe(),
                result
            ));
        }

        Ok(result)
    }

    /// `Audience == 'X'`：在同一上下文中对受众 X 的规则求值
    fn evaluate_reference(&mut self, name: &str, column: usize) -> Result<bool, ParseError> {
        if self.scope.chain.iter().any(|entry| entry == name) {
            return Err(ParseError::new(
                ParseErrorKind::CyclicAudienceReference(name.to_string()),
                column,
            ));
        }

        let limit = self.executor.max_reference_depth();
        if self.scope.depth >= limit {
            return Err(ParseError::new(
                ParseErrorKind::ReferenceDepthExceeded(limit),
                column,
            ));
        }

        let rule = self.context.rule(name).ok_or_else(|| {
            ParseError::new(ParseErrorKind::UnknownAudience(name.to_string()), column)
        })?;

        debug!(audience_id = %name, rule = %rule, "评估引用的受众");

        self.scope.chain.push(name.to_string());
        self.scope.depth += 1;
        let result = self
            .executor
            .evaluate_scoped(rule, self.context, &mut *self.scope);
        self.scope.depth -= 1;
        self.scope.chain.pop();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_membership() {
        let perms = set(&["Edit orders", "View orders"]);
        let v = Value::Set(&perms);

        assert_eq!(compare_values(Operator::Eq, v, Value::Text("Edit orders")), Some(true));
        assert_eq!(compare_values(Operator::Eq, v, Value::Text("edit orders")), Some(false));
        assert_eq!(compare_values(Operator::Neq, v, Value::Text("Delete orders")), Some(true));
    }

    #[test]
    fn test_set_prefix_and_suffix_match_any_element() {
        let locations = set(&["Canada", "USA", "Austria", ""]);
        let v = Value::Set(&locations);

        assert_eq!(compare_values(Operator::StartsWith, v, Value::Text("Aus")), Some(true));
        assert_eq!(compare_values(Operator::StartsWith, v, Value::Text("aus")), Some(false));
        assert_eq!(compare_values(Operator::EndsWith, v, Value::Text("tria")), Some(true));
        assert_eq!(compare_values(Operator::EndsWith, v, Value::Text("tria1")), Some(false));
    }

    #[test]
    fn test_scalar_comparisons() {
        let v = Value::Text("System Administrator");
        assert_eq!(compare_values(Operator::StartsWith, v, Value::Text("System")), Some(true));
        assert_eq!(compare_values(Operator::EndsWith, v, Value::Text("admin")), Some(false));
        assert_eq!(compare_values(Operator::Neq, v, Value::Text("Guest")), Some(true));
    }

    #[test]
    fn test_boolean_strings_are_coerced() {
        assert_eq!(compare_values(Operator::Eq, Value::Bool(true), Value::Text("TRUE")), Some(true));
        assert_eq!(compare_values(Operator::Eq, Value::Text("false"), Value::Text("False")), Some(true));
        assert_eq!(compare_values(Operator::Eq, Value::Bool(true), Value::Text("yes")), Some(false));
        assert_eq!(compare_values(Operator::Neq, Value::Bool(true), Value::Text("yes")), Some(true));
    }

    #[test]
    fn test_prefix_and_suffix_use_text_form_of_booleans() {
        let v = Value::Text("trueblood");
        assert_eq!(compare_values(Operator::StartsWith, v, Value::Text("true")), Some(true));
        assert_eq!(compare_values(Operator::EndsWith, v, Value::Text("TRUE")), Some(false));
        assert_eq!(compare_values(Operator::EndsWith, Value::Text("isfalse"), Value::Bool(false)), Some(true));
        assert_eq!(compare_values(Operator::StartsWith, Value::Bool(true), Value::Text("tr")), Some(true));
        assert_eq!(compare_values(Operator::StartsWith, Value::Bool(true), Value::Text("True")), Some(true));
        assert_eq!(compare_values(Operator::Eq, v, Value::Text("true")), Some(false));
    }

    #[test]
    fn test_unsupported_combinations() {
        let perms = set(&["a"]);
        assert_eq!(compare_values(Operator::Eq, Value::Set(&perms), Value::Set(&perms)), None);
        assert_eq!(compare_values(Operator::Eq, Value::Set(&perms), Value::Bool(true)), None);
        assert_eq!(compare_values(Operator::And, Value::Text("a"), Value::Text("a")), None);
    }

    #[test]
    fn test_normalize_puts_variable_first() {
        let perms = set(&["a"]);
        let variable = Variable::Field(ContextField::Permission);
        let var = Operand::Variable {
            variable: &variable,
            value: Value::Set(&perms),
        };
        let lit = Operand::Literal(Value::Text("a"));

        let (first, second) = normalize(lit, var);
        assert!(first.is_variable());
        assert!(!second.is_variable());

        let (first, _) = normalize(var, Operand::AudienceRef);
        assert!(matches!(first, Operand::AudienceRef));
    }
}
