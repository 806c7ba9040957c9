//! 评估上下文
//!
//! 一次导航对应一个只读快照：标量字段、集合字段、关联记录字段表和受众规则表。
//! 构建完成后不再修改，规则求值只读访问。

use crate::lexer::{self, Lexeme};
use audience_shared::config::MissingFieldPolicy;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// 上下文中的取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Set(BTreeSet<String>),
}

impl FieldValue {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Set(items) => {
                let joined: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(", "))
            }
        }
    }
}

/// 单个对象的字段表：点号分隔的字段路径 -> 取值
pub type RecordFields = HashMap<String, FieldValue>;

/// 评估上下文（只读快照）
#[derive(Debug, Clone, Default)]
pub struct AudienceContext {
    profile: String,
    role: String,
    domain: String,
    audience: String,
    permission: BTreeSet<String>,
    location: BTreeSet<String>,
    audiences_by_name: HashMap<String, String>,
    data: HashMap<String, RecordFields>,
}

impl AudienceContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// 当前正在评估的受众 ID，用于识别自引用
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn permission(&self) -> &BTreeSet<String> {
        &self.permission
    }

    pub fn location(&self) -> &BTreeSet<String> {
        &self.location
    }

    pub fn audiences_by_name(&self) -> &HashMap<String, String> {
        &self.audiences_by_name
    }

    /// 获取受众规则
    pub fn rule(&self, audience_id: &str) -> Option<&str> {
        self.audiences_by_name.get(audience_id).map(String::as_str)
    }

    pub fn data(&self) -> &HashMap<String, RecordFields> {
        &self.data
    }

    pub fn record(&self, object: &str) -> Option<&RecordFields> {
        self.data.get(object)
    }

    /// 获取关联记录字段值
    pub fn field(&self, object: &str, field: &str) -> Option<&FieldValue> {
        self.data.get(object)?.get(field)
    }
}

/// 上下文构建器
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    context: AudienceContext,
    missing_field_policy: MissingFieldPolicy,
}

impl ContextBuilder {
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.context.profile = profile.into();
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.context.role = role.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.context.domain = domain.into();
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.context.audience = audience.into();
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.context.permission.insert(permission.into());
        self
    }

    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context
            .permission
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.context.location.insert(location.into());
        self
    }

    pub fn locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context
            .location
            .extend(locations.into_iter().map(Into::into));
        self
    }

    /// 注册受众规则，同名规则后者覆盖前者
    pub fn rule(mut self, audience_id: impl Into<String>, rule: impl Into<String>) -> Self {
        self.context
            .audiences_by_name
            .insert(audience_id.into(), rule.into());
        self
    }

    /// 声明一个关联对象（即使暂时没有字段）
    pub fn record(mut self, object: impl Into<String>) -> Self {
        self.context.data.entry(object.into()).or_default();
        self
    }

    pub fn field(
        mut self,
        object: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.context
            .data
            .entry(object.into())
            .or_default()
            .insert(field.into(), value.into());
        self
    }

    /// 合并一组已展开的字段
    pub fn fields(mut self, object: impl Into<String>, fields: RecordFields) -> Self {
        self.context
            .data
            .entry(object.into())
            .or_default()
            .extend(fields);
        self
    }

    pub fn missing_field_policy(mut self, policy: MissingFieldPolicy) -> Self {
        self.missing_field_policy = policy;
        self
    }

    /// 完成构建
    ///
    /// 宽松策略下，规则中引用的、对象存在但字段缺失的 `对象.字段` 会预先补为空字符串，
    /// 保证词法分析阶段不需要修改上下文。
    pub fn build(mut self) -> AudienceContext {
        if self.missing_field_policy == MissingFieldPolicy::DefaultEmpty {
            seed_referenced_fields(&mut self.context);
        }
        self.context
    }
}

/// 为规则中引用但缺失的记录字段补默认空值
fn seed_referenced_fields(context: &mut AudienceContext) {
    let AudienceContext {
        audiences_by_name,
        data,
        ..
    } = context;

    for (audience_id, rule) in audiences_by_name.iter() {
        // 语法错误留到求值时报告
        let Ok(lexemes) = lexer::scan(rule) else {
            continue;
        };

        for lexeme in lexemes {
            let Lexeme::Word(word) = lexeme.lexeme else {
                continue;
            };
            let Some((object, field)) = word.split_once('.') else {
                continue;
            };
            if field.is_empty() {
                continue;
            }
            if let Some(fields) = data.get_mut(object) {
                if !fields.contains_key(field) {
                    debug!(
                        audience_id = %audience_id,
                        object = %object,
                        field = %field,
                        "记录字段缺失，补为空字符串"
                    );
                    fields.insert(field.to_string(), FieldValue::empty());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_sets() {
        let ctx = AudienceContext::builder()
            .profile("System Administrator")
            .permissions(["View orders", "Edit orders"])
            .location("Canada")
            .location("Canada")
            .build();

        assert_eq!(ctx.profile(), "System Administrator");
        assert_eq!(ctx.permission().len(), 2);
        assert_eq!(ctx.location().len(), 1);
    }

    #[test]
    fn test_seeds_missing_referenced_fields() {
        let ctx = AudienceContext::builder()
            .field("Account", "Name", "Acme")
            .rule("Tech", "Account.Industry == 'Technology' && Account.Name =~ 'Ac'")
            .rule("Other", "Contact.Email ~= '@acme.com'")
            .build();

        assert_eq!(ctx.field("Account", "Industry"), Some(&FieldValue::empty()));
        assert_eq!(ctx.field("Account", "Name"), Some(&FieldValue::from("Acme")));
        // 对象本身不存在时不补
        assert!(ctx.record("Contact").is_none());
    }

    #[test]
    fn test_strict_policy_does_not_seed() {
        let ctx = AudienceContext::builder()
            .record("Account")
            .rule("Tech", "Account.Industry == 'Technology'")
            .missing_field_policy(MissingFieldPolicy::Strict)
            .build();

        assert!(ctx.field("Account", "Industry").is_none());
    }

    #[test]
    fn test_seeding_ignores_quoted_text_and_bad_rules() {
        let ctx = AudienceContext::builder()
            .record("Account")
            .rule("Quoted", "Profile == 'Account.Secret'")
            .rule("Broken", "Account.Name == 'unterminated")
            .build();

        assert!(ctx.record("Account").unwrap().is_empty());
    }

    #[test]
    fn test_field_value_display() {
        let set: BTreeSet<String> = ["b", "a"].into_iter().map(String::from).collect();
        assert_eq!(FieldValue::Set(set).to_string(), "{a, b}");
        assert_eq!(FieldValue::from(true).to_string(), "true");
        assert_eq!(FieldValue::from("x").to_string(), "'x'");
    }
}
