//! 受众解析器
//!
//! 按优先级扫描受众列表确定页面受众（首个命中者胜出），并对组件受众做可见性判断。
//! 每个受众的结果在同一上下文快照内只求值一次。解析器借用上下文，
//! 上下文更换后旧的解析器连同缓存一起失效。

use crate::context::AudienceContext;
use crate::error::ParseError;
use crate::evaluator::EvaluationScope;
use crate::executor::RuleExecutor;
use crate::payload::AudiencePriority;
use audience_shared::config::EngineConfig;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// 受众规则求值接口
#[cfg_attr(test, mockall::automock)]
pub trait AudienceEvaluator {
    fn evaluate_audience(
        &self,
        audience_id: &str,
        rule: &str,
        context: &AudienceContext,
    ) -> Result<bool, ParseError>;
}

impl AudienceEvaluator for RuleExecutor {
    fn evaluate_audience(
        &self,
        audience_id: &str,
        rule: &str,
        context: &AudienceContext,
    ) -> Result<bool, ParseError> {
        let mut scope = EvaluationScope::new(audience_id, false);
        self.evaluate_scoped(rule, context, &mut scope)
    }
}

/// 缓存的受众检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudienceCheck {
    pub result: bool,
}

pub struct AudienceResolver<'c, E = RuleExecutor> {
    context: &'c AudienceContext,
    evaluator: E,
    config: EngineConfig,
    memo: HashMap<String, AudienceCheck>,
    matched: Option<String>,
    evaluations: usize,
}

impl<'c> AudienceResolver<'c> {
    pub fn new(context: &'c AudienceContext, config: &EngineConfig) -> Self {
        Self::with_evaluator(context, config, RuleExecutor::from_config(config))
    }
}

impl<'c, E: AudienceEvaluator> AudienceResolver<'c, E> {
    pub fn with_evaluator(context: &'c AudienceContext, config: &EngineConfig, evaluator: E) -> Self {
        Self {
            context,
            evaluator,
            config: config.clone(),
            memo: HashMap::new(),
            matched: None,
            evaluations: 0,
        }
    }

    pub fn context(&self) -> &'c AudienceContext {
        self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 扫描优先级列表，返回首个规则成立的受众
    ///
    /// 单个受众规则缺失、为空或求值失败只记警告并视为不匹配，不影响其余受众。
    #[instrument(skip_all, fields(candidates = priorities.len()))]
    pub fn resolve_page_audience(&mut self, priorities: &[AudiencePriority]) -> Option<&str> {
        self.matched = None;

        let mut ordered: Vec<&AudiencePriority> = priorities.iter().collect();
        ordered.sort_by_key(|entry| entry.priority);

        for entry in ordered {
            if self.check(&entry.audience_id) {
                info!(
                    audience_id = %entry.audience_id,
                    priority = entry.priority,
                    "匹配到页面受众"
                );
                self.matched = Some(entry.audience_id.clone());
                break;
            }
        }

        if self.matched.is_none() {
            debug!("没有满足条件的页面受众");
        }

        self.matched.as_deref()
    }

    pub fn matched_audience(&self) -> Option<&str> {
        self.matched.as_deref()
    }

    /// 组件受众是否满足；空值或“不限”标记总是满足
    pub fn is_audience_satisfied(&mut self, audience_id: Option<&str>) -> bool {
        if self.config.is_unrestricted(audience_id) {
            return true;
        }
        match audience_id {
            Some(id) => self.check(id),
            None => true,
        }
    }

    /// 页面受众未确定、与组件声明的页面受众相同，或组件不限页面受众时满足
    pub fn is_page_audience_satisfied(
        &self,
        page_audience: Option<&str>,
        component_page_audience: Option<&str>,
    ) -> bool {
        match page_audience.filter(|page| !page.is_empty()) {
            None => true,
            Some(page) => {
                component_page_audience == Some(page)
                    || self.config.is_unrestricted(component_page_audience)
            }
        }
    }

    /// 组件是否可见，预览模式下总是可见
    pub fn is_component_visible(
        &mut self,
        page_audience: Option<&str>,
        component_page_audience: Option<&str>,
        component_audience: Option<&str>,
    ) -> bool {
        if self.config.builder_mode {
            return true;
        }
        self.is_page_audience_satisfied(page_audience, component_page_audience)
            && self.is_audience_satisfied(component_audience)
    }

    /// 实际调用求值器的次数（命中缓存不计）
    pub fn evaluation_count(&self) -> usize {
        self.evaluations
    }

    fn check(&mut self, audience_id: &str) -> bool {
        if let Some(cached) = self.memo.get(audience_id) {
            debug!(audience_id = %audience_id, result = cached.result, "命中受众缓存");
            return cached.result;
        }

        let context = self.context;
        let result = match context.rule(audience_id) {
            None => {
                warn!(audience_id = %audience_id, "受众规则不存在，视为不匹配");
                false
            }
            Some(rule) if rule.trim().is_empty() => {
                warn!(audience_id = %audience_id, "受众规则为空，视为不匹配");
                false
            }
            Some(rule) => {
                self.evaluations += 1;
                match self.evaluator.evaluate_audience(audience_id, rule, context) {
                    Ok(matched) => {
                        debug!(audience_id = %audience_id, matched, "受众规则求值完成");
                        matched
                    }
                    Err(err) => {
                        warn!(
                            audience_id = %audience_id,
                            rule = %rule,
                            error = %err,
                            "受众规则求值失败，视为不匹配"
                        );
                        false
                    }
                }
            }
        };

        self.memo
            .insert(audience_id.to_string(), AudienceCheck { result });
        result
    }
}
