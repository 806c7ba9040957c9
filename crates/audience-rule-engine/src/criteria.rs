//! 受众条件转换
//!
//! 把结构化的受众定义（条件列表 + 组合方式）转换为规则串，
//! 同时收集条件中引用的对象字段，供上下文构建时补齐缺失字段。

use crate::error::{AudienceError, Result};
use crate::operators::Operator;
use crate::payload::AudienceRuleEntry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// 自定义公式中的占位符和逻辑词
static FORMULA_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(AND|OR|[0-9]+)\b").expect("invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormulaFilterType {
    AllCriteriaMatch,
    AnyCriterionMatches,
    CustomLogicMatches,
}

/// 结构化受众定义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceDefinition {
    pub name: String,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    /// 自定义公式，如 `(1 AND 2) OR 3`
    #[serde(default)]
    pub formula: Option<String>,
    pub formula_filter_type: FormulaFilterType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub criteria_number: u32,
    #[serde(default)]
    pub criterion_value: CriterionValue,
    /// Equal / NotEqual / StartsWith / EndsWith
    pub operator: String,
    /// Audience / FieldBased / Permission / Profile
    #[serde(rename = "type")]
    pub criterion_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CriterionValue {
    pub entity_field: String,
    pub entity_type: String,
    pub field_value: String,
    pub permission_name: String,
    pub permission_type: String,
    pub audience_developer_name: String,
    pub profile: String,
}

/// 转换结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedAudience {
    pub name: String,
    pub rule: String,
    /// 对象 -> 字段路径（不含对象前缀）
    pub referenced_fields: BTreeMap<String, BTreeSet<String>>,
}

impl ConvertedAudience {
    pub fn into_rule_entry(self) -> AudienceRuleEntry {
        AudienceRuleEntry {
            audience_id: self.name,
            audience_rule: Some(self.rule),
        }
    }
}

impl Criterion {
    fn comparison(&self) -> Result<Operator> {
        match self.operator.as_str() {
            "Equal" => Ok(Operator::Eq),
            "NotEqual" => Ok(Operator::Neq),
            "StartsWith" => Ok(Operator::StartsWith),
            "EndsWith" => Ok(Operator::EndsWith),
            other => Err(AudienceError::InvalidCriterion(format!(
                "未知的条件操作符 {} (条件 {})",
                other, self.criteria_number
            ))),
        }
    }

    /// 转换为单个比较表达式
    fn to_condition(&self, referenced: &mut BTreeMap<String, BTreeSet<String>>) -> Result<String> {
        let op = self.comparison()?;
        let value = &self.criterion_value;

        let (variable, literal) = match self.criterion_type.as_str() {
            "Audience" => ("Audience".to_string(), &value.audience_developer_name),
            "FieldBased" => {
                let entity = &value.entity_type;
                let field = value.entity_field.trim_start_matches('$');
                let prefix = format!("{}.", entity);
                let path = field.strip_prefix(&prefix).unwrap_or(field);
                if entity.is_empty() || path.is_empty() {
                    return Err(AudienceError::InvalidCriterion(format!(
                        "条件 {} 缺少对象或字段",
                        self.criteria_number
                    )));
                }
                referenced
                    .entry(entity.clone())
                    .or_default()
                    .insert(path.to_string());
                (format!("{}{}", prefix, path), &value.field_value)
            }
            "Permission" => {
                if value.permission_type != "Custom" {
                    return Err(AudienceError::InvalidCriterion(format!(
                        "不支持的权限类型 {} (条件 {})",
                        value.permission_type, self.criteria_number
                    )));
                }
                ("Permission".to_string(), &value.permission_name)
            }
            "Profile" => ("Profile".to_string(), &value.profile),
            other => {
                return Err(AudienceError::InvalidCriterion(format!(
                    "未知的条件类型 {} (条件 {})",
                    other, self.criteria_number
                )));
            }
        };

        Ok(format!("{} {} '{}'", variable, op, escape_literal(literal, self.criteria_number)?))
    }
}

/// 字面量中的单引号转义为 `\'`；规则语法不支持其他转义，含反斜杠的取值无法表示
fn escape_literal(value: &str, criteria_number: u32) -> Result<String> {
    if value.contains('\\') {
        return Err(AudienceError::InvalidCriterion(format!(
            "条件 {} 的取值包含反斜杠",
            criteria_number
        )));
    }
    Ok(value.replace('\'', "\\'"))
}

/// 转换受众定义
pub fn convert(definition: &AudienceDefinition) -> Result<ConvertedAudience> {
    let mut criteria: Vec<&Criterion> = definition.criteria.iter().collect();
    criteria.sort_by_key(|criterion| criterion.criteria_number);

    let mut referenced_fields = BTreeMap::new();
    let mut conditions = BTreeMap::new();
    for criterion in criteria {
        let condition = criterion.to_condition(&mut referenced_fields)?;
        conditions.insert(criterion.criteria_number, condition);
    }

    let rule = match definition.formula_filter_type {
        FormulaFilterType::AllCriteriaMatch => join_conditions(&conditions, Operator::And),
        FormulaFilterType::AnyCriterionMatches => join_conditions(&conditions, Operator::Or),
        FormulaFilterType::CustomLogicMatches => {
            let formula = definition.formula.as_deref().unwrap_or_default();
            substitute_formula(formula, &conditions)?
        }
    };

    if rule.trim().is_empty() {
        return Err(AudienceError::EmptyRule(definition.name.clone()));
    }

    Ok(ConvertedAudience {
        name: definition.name.clone(),
        rule,
        referenced_fields,
    })
}

/// 批量转换，并合并所有引用的对象字段
pub fn convert_all(
    definitions: &[AudienceDefinition],
) -> Result<(Vec<ConvertedAudience>, BTreeMap<String, BTreeSet<String>>)> {
    let converted = definitions.iter().map(convert).collect::<Result<Vec<_>>>()?;

    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for audience in &converted {
        for (object, fields) in &audience.referenced_fields {
            merged
                .entry(object.clone())
                .or_default()
                .extend(fields.iter().cloned());
        }
    }

    Ok((converted, merged))
}

fn join_conditions(conditions: &BTreeMap<u32, String>, op: Operator) -> String {
    let parts: Vec<&str> = conditions.values().map(String::as_str).collect();
    parts.join(format!(" {} ", op).as_str())
}

/// 替换自定义公式中的编号占位符，AND/OR 转换为 &&/||
fn substitute_formula(formula: &str, conditions: &BTreeMap<u32, String>) -> Result<String> {
    let mut rule = String::with_capacity(formula.len() * 8);
    let mut last = 0;

    for found in FORMULA_TOKEN.find_iter(formula) {
        rule.push_str(&formula[last..found.start()]);
        match found.as_str() {
            "AND" => rule.push_str(Operator::And.symbol()),
            "OR" => rule.push_str(Operator::Or.symbol()),
            number => {
                let condition = number
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| conditions.get(&n))
                    .ok_or_else(|| {
                        AudienceError::InvalidCriterion(format!(
                            "公式中的占位符 {} 没有对应的条件",
                            number
                        ))
                    })?;
                rule.push_str(condition);
            }
        }
        last = found.end();
    }
    rule.push_str(&formula[last..]);

    Ok(rule)
}
