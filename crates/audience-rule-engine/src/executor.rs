//! 规则执行器
//!
//! 编译并求值受众规则，`Audience == 'X'` 形式的引用在同一上下文中递归求值。
//! 可选记录每一步比较的评估追踪。

use crate::compiler::RuleCompiler;
use crate::context::AudienceContext;
use crate::error::{AudienceError, ParseError, Result};
use crate::evaluator::{EvaluationScope, RpnEvaluator};
use audience_shared::config::EngineConfig;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// 单个受众的评估结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub audience_id: String,
    pub matched: bool,
    /// 每步比较的记录，格式 `<左> <操作符> <右> => <结果>`
    pub evaluation_trace: Vec<String>,
    pub referenced_variables: BTreeSet<String>,
}

/// 规则执行器
#[derive(Debug, Clone)]
pub struct RuleExecutor {
    compiler: RuleCompiler,
    max_reference_depth: usize,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self::from_config(&EngineConfig::default())
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            compiler: RuleCompiler::new(config.missing_field_policy),
            max_reference_depth: config.max_reference_depth,
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn max_reference_depth(&self) -> usize {
        self.max_reference_depth
    }

    /// 对规则串求值
    ///
    /// 上下文中的当前受众视为引用链的起点，规则引用它自身时报告循环引用。
    pub fn evaluate(
        &self,
        rule: &str,
        context: &AudienceContext,
    ) -> std::result::Result<bool, ParseError> {
        let mut scope = EvaluationScope::new(context.audience(), false);
        self.evaluate_scoped(rule, context, &mut scope)
    }

    /// 按受众 ID 查找规则并求值
    pub fn execute(&self, audience_id: &str, context: &AudienceContext) -> Result<EvaluationResult> {
        let rule = context
            .rule(audience_id)
            .ok_or_else(|| AudienceError::RuleNotFound(audience_id.to_string()))?;

        if rule.trim().is_empty() {
            return Err(AudienceError::EmptyRule(audience_id.to_string()));
        }

        let compiled = self.compiler.compile(rule, context)?;
        let mut scope = EvaluationScope::new(audience_id, self.trace_enabled);
        let matched = RpnEvaluator::new(self, context, &mut scope).run(&compiled.rpn)?;

        debug!(audience_id = %audience_id, matched, "受众规则评估完成");

        Ok(EvaluationResult {
            audience_id: audience_id.to_string(),
            matched,
            evaluation_trace: scope.take_trace(),
            referenced_variables: compiled.referenced_variables,
        })
    }

    pub(crate) fn evaluate_scoped(
        &self,
        rule: &str,
        context: &AudienceContext,
        scope: &mut EvaluationScope,
    ) -> std::result::Result<bool, ParseError> {
        let compiled = self.compiler.compile(rule, context)?;
        RpnEvaluator::new(self, context, scope).run(&compiled.rpn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;
    use audience_shared::config::MissingFieldPolicy;

    fn ctx() -> AudienceContext {
        AudienceContext::builder()
            .profile("System Administrator")
            .role("CEO")
            .permissions(["View orders", "Edit orders"])
            .locations(["Canada", "Ontario", "Toronto"])
            .field("Account", "Name", "Acme")
            .field("Account", "IsActive", true)
            .rule("AmericaLoc", "Location == 'Canada' || Location == 'USA'")
            .rule("Admins", "Profile =~ 'System' && Audience == 'AmericaLoc'")
            .rule("Outsiders", "Location == 'Mars'")
            .rule("Blank", "  ")
            .build()
    }

    #[test]
    fn test_evaluate_basic_rules() {
        let executor = RuleExecutor::new();
        let ctx = ctx();

        assert!(executor.evaluate("Profile == 'System Administrator'", &ctx).unwrap());
        assert!(executor.evaluate("Role != 'Intern'", &ctx).unwrap());
        assert!(executor.evaluate("Permission == 'Edit orders'", &ctx).unwrap());
        assert!(!executor.evaluate("Permission == 'Delete orders'", &ctx).unwrap());
        assert!(executor.evaluate("Account.Name ~= 'me' && Account.IsActive == true", &ctx).unwrap());
        assert!(executor.evaluate("Account.IsActive == 'TRUE'", &ctx).unwrap());
    }

    #[test]
    fn test_operand_order_does_not_matter() {
        let executor = RuleExecutor::new();
        let ctx = ctx();

        for (a, b) in [
            ("Profile == 'CEO'", "'CEO' == Profile"),
            ("Location == 'Canada'", "'Canada' == Location"),
            ("Role =~ 'CE'", "'CE' =~ Role"),
        ] {
            assert_eq!(
                executor.evaluate(a, &ctx).unwrap(),
                executor.evaluate(b, &ctx).unwrap(),
                "{} vs {}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_audience_reference_is_evaluated_recursively() {
        let executor = RuleExecutor::new();
        let ctx = ctx();

        assert!(executor.evaluate("Audience == 'AmericaLoc'", &ctx).unwrap());
        assert!(executor.evaluate("'Admins' == Audience", &ctx).unwrap());
    }

    #[test]
    fn test_every_comparison_operator_yields_referenced_result() {
        let executor = RuleExecutor::new();
        let ctx = ctx();

        for op in ["==", "!=", "=~", "~="] {
            assert!(
                executor.evaluate(&format!("Audience {} 'AmericaLoc'", op), &ctx).unwrap(),
                "{}",
                op
            );
        }
        assert!(!executor.evaluate("Audience =~ 'Outsiders'", &ctx).unwrap());
        assert_eq!(
            executor.evaluate("Audience ~= 'Ghost'", &ctx).unwrap_err().kind,
            ParseErrorKind::UnknownAudience("Ghost".to_string())
        );
    }

    #[test]
    fn test_unknown_audience_reference() {
        let err = RuleExecutor::new()
            .evaluate("Audience == 'Ghost'", &ctx())
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownAudience("Ghost".to_string()));
    }

    #[test]
    fn test_cyclic_reference_is_detected() {
        let ctx = AudienceContext::builder()
            .rule("A", "Audience == 'B'")
            .rule("B", "Profile == 'x' || Audience == 'A'")
            .build();

        let err = RuleExecutor::new().execute("A", &ctx).unwrap_err();
        assert!(matches!(
            err,
            AudienceError::Parse(ParseError {
                kind: ParseErrorKind::CyclicAudienceReference(ref name),
                ..
            }) if name == "A"
        ));
    }

    #[test]
    fn test_reference_depth_limit() {
        let config = EngineConfig {
            max_reference_depth: 1,
            ..EngineConfig::default()
        };
        let ctx = AudienceContext::builder()
            .rule("A", "Audience == 'B'")
            .rule("B", "Audience == 'C'")
            .rule("C", "true")
            .build();

        let err = RuleExecutor::from_config(&config).execute("A", &ctx).unwrap_err();
        assert!(matches!(
            err,
            AudienceError::Parse(ParseError {
                kind: ParseErrorKind::ReferenceDepthExceeded(1),
                ..
            })
        ));
        assert!(RuleExecutor::new().execute("A", &ctx).unwrap().matched);
    }

    #[test]
    fn test_execute_missing_and_empty_rules() {
        let executor = RuleExecutor::new();
        let ctx = ctx();

        assert!(matches!(
            executor.execute("Nope", &ctx),
            Err(AudienceError::RuleNotFound(id)) if id == "Nope"
        ));
        assert!(matches!(
            executor.execute("Blank", &ctx),
            Err(AudienceError::EmptyRule(id)) if id == "Blank"
        ));
    }

    #[test]
    fn test_execute_with_trace() {
        let result = RuleExecutor::new()
            .with_trace()
            .execute("Admins", &ctx())
            .unwrap();

        assert!(result.matched);
        assert_eq!(result.audience_id, "Admins");
        assert!(result.referenced_variables.contains("Profile"));
        assert!(result.referenced_variables.contains("Audience"));
        assert!(
            result
                .evaluation_trace
                .iter()
                .any(|line| line == "Profile='System Administrator' =~ 'System' => true")
        );
        assert!(
            result
                .evaluation_trace
                .iter()
                .any(|line| line.starts_with("Location={Canada, Ontario, Toronto} == 'Canada'"))
        );
        assert_eq!(result.evaluation_trace.last().unwrap(), "true && true => true");
    }

    #[test]
    fn test_prefix_match_against_boolean_literal() {
        let executor = RuleExecutor::new();
        let ctx = AudienceContext::builder().profile("trueblood").build();

        assert!(executor.evaluate("Profile =~ 'true'", &ctx).unwrap());
        assert!(!executor.evaluate("Profile ~= 'false'", &ctx).unwrap());
        assert!(!executor.evaluate("Profile == 'true'", &ctx).unwrap());
    }

    #[test]
    fn test_trace_disabled_by_default() {
        let result = RuleExecutor::new().execute("Admins", &ctx()).unwrap();
        assert!(result.evaluation_trace.is_empty());
    }

    #[test]
    fn test_strict_policy_rejects_missing_fields() {
        let config = EngineConfig {
            missing_field_policy: MissingFieldPolicy::Strict,
            ..EngineConfig::default()
        };
        let ctx = ctx();

        let err = RuleExecutor::from_config(&config)
            .evaluate("Account.Owner == ''", &ctx)
            .unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnknownVariable("Account.Owner".to_string())
        );
        assert!(RuleExecutor::new().evaluate("Account.Owner == ''", &ctx).unwrap());
    }

    #[test]
    fn test_non_boolean_and_unsupported() {
        let executor = RuleExecutor::new();
        let ctx = ctx();

        assert!(matches!(
            executor.evaluate("'abc'", &ctx).unwrap_err().kind,
            ParseErrorKind::NonBooleanResult(_)
        ));
        assert!(matches!(
            executor.evaluate("Profile && true", &ctx).unwrap_err().kind,
            ParseErrorKind::UnsupportedComparison { .. }
        ));
        assert!(matches!(
            executor.evaluate("Data == 'x'", &ctx).unwrap_err().kind,
            ParseErrorKind::UnsupportedComparison { .. }
        ));
    }
}
