//! 受众规则引擎
//!
//! 受众是定义在访客属性上的具名布尔规则，页面据此决定显示哪些组件。提供：
//! - 规则表达式的词法分析、结构校验和按优先级转换为后缀表达式
//! - 基于只读上下文快照的栈式求值，支持 `Audience == 'X'` 引用其他受众
//! - 按优先级确定页面受众并缓存每个受众的结果
//! - 组件注册表与结构化受众条件到规则串的转换

pub mod compiler;
pub mod context;
pub mod criteria;
pub mod error;
mod evaluator;
pub mod executor;
pub mod lexer;
pub mod models;
pub mod operators;
pub mod payload;
pub mod registry;
pub mod resolver;
pub mod validator;

pub use compiler::{CompiledRule, RuleCompiler};
pub use context::{AudienceContext, ContextBuilder, FieldValue, RecordFields};
pub use criteria::{AudienceDefinition, ConvertedAudience, FormulaFilterType};
pub use error::{AudienceError, ParseError, ParseErrorKind, Result};
pub use executor::{EvaluationResult, RuleExecutor};
pub use models::{ContextField, Literal, Token, TokenKind, Variable};
pub use operators::Operator;
pub use payload::{AudiencePriority, ServerPayload, build_context};
pub use registry::{ComponentRegistration, ComponentRegistry, LoadMode};
pub use resolver::{AudienceEvaluator, AudienceResolver};

use audience_shared::config::EngineConfig;

/// 使用默认配置对规则求值
pub fn evaluate(rule: &str, context: &AudienceContext) -> std::result::Result<bool, ParseError> {
    RuleExecutor::new().evaluate(rule, context)
}

/// 使用默认配置确定页面受众
pub fn resolve_page_audience(
    priorities: &[AudiencePriority],
    context: &AudienceContext,
) -> Option<String> {
    AudienceResolver::new(context, &EngineConfig::default())
        .resolve_page_audience(priorities)
        .map(str::to_owned)
}

/// 使用默认配置判断组件是否可见
pub fn is_component_visible(
    page_audience: Option<&str>,
    component_page_audience: Option<&str>,
    component_audience: Option<&str>,
    context: &AudienceContext,
) -> bool {
    AudienceResolver::new(context, &EngineConfig::default()).is_component_visible(
        page_audience,
        component_page_audience,
        component_audience,
    )
}
