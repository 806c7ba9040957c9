//! 服务端载荷
//!
//! 每次导航由调用方拉取一次原始 JSON 载荷，在这里展开为评估上下文和按优先级排序的受众列表。

use crate::context::{AudienceContext, FieldValue, RecordFields};
use crate::error::Result;
use audience_shared::config::MissingFieldPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

/// 原始载荷
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPayload {
    pub context: PayloadContext,
    pub rules: Vec<AudienceRuleEntry>,
    pub rules_with_priority: Vec<AudiencePriority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PayloadContext {
    pub profile: Option<String>,
    pub role: Option<String>,
    pub permissions: Vec<String>,
    pub location: Option<PayloadLocation>,
    /// 对象类型 -> 记录列表
    #[serde(rename = "dataBySObjectType")]
    pub data_by_object_type: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadLocation {
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceRuleEntry {
    pub audience_id: String,
    #[serde(default)]
    pub audience_rule: Option<String>,
}

/// 优先级列表项，数字越小越先扫描
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudiencePriority {
    pub audience_id: String,
    #[serde(rename = "audienceRulePriority", default)]
    pub priority: i64,
}

impl AudiencePriority {
    pub fn new(audience_id: impl Into<String>, priority: i64) -> Self {
        Self {
            audience_id: audience_id.into(),
            priority,
        }
    }
}

impl ServerPayload {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// 按优先级升序排列（稳定排序，相同优先级保持输入顺序）
    pub fn priorities(&self) -> Vec<AudiencePriority> {
        let mut ordered = self.rules_with_priority.clone();
        ordered.sort_by_key(|entry| entry.priority);
        ordered
    }
}

/// 由载荷构建评估上下文
#[instrument(skip_all, fields(rules = payload.rules.len()))]
pub fn build_context(payload: &ServerPayload, policy: MissingFieldPolicy) -> AudienceContext {
    let raw = &payload.context;

    let locations = raw
        .location
        .iter()
        .flat_map(|loc| [&loc.country, &loc.state, &loc.city])
        .flatten()
        .filter(|value| !value.is_empty())
        .cloned();

    let mut builder = AudienceContext::builder()
        .profile(raw.profile.clone().unwrap_or_default())
        .role(raw.role.clone().unwrap_or_default())
        .permissions(raw.permissions.iter().cloned())
        .locations(locations)
        .missing_field_policy(policy);

    for (object, records) in &raw.data_by_object_type {
        builder = builder.record(object.clone());
        for record in records {
            let mut fields = RecordFields::new();
            match record {
                Value::Object(_) => flatten_record("", record, &mut fields),
                other => debug!(object = %object, record = %other, "忽略非对象记录"),
            }
            builder = builder.fields(object.clone(), fields);
        }
    }

    for entry in &payload.rules {
        builder = builder.rule(
            entry.audience_id.clone(),
            entry.audience_rule.clone().unwrap_or_default(),
        );
    }

    builder.build()
}

/// 把嵌套记录展开为 `a.b.c` 形式的字段路径
pub fn flatten_record(prefix: &str, value: &Value, out: &mut RecordFields) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_record(&path, nested, out);
            }
        }
        Value::Array(items) => {
            let set: BTreeSet<String> = items.iter().map(scalar_text).collect();
            out.insert(prefix.to_string(), FieldValue::Set(set));
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), FieldValue::Bool(*b));
        }
        other => {
            out.insert(prefix.to_string(), FieldValue::Text(scalar_text(other)));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
