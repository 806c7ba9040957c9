//! 组件注册表
//!
//! 记录页面上声明了受众限制的组件，按 ID、页面受众、组件受众和加载方式建立索引，
//! 并结合解析器给出需要显示的组件。显示/隐藏动作本身由调用方完成。

use crate::resolver::{AudienceEvaluator, AudienceResolver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// 预览选择器中“全部页面受众”的取值
pub const ALL_PAGE_AUDIENCES: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// 注册时立即检查
    OnLoad,
    /// 进入可视区域时检查
    OnVisible,
}

/// 组件注册信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRegistration {
    pub cmp_id: String,
    #[serde(default)]
    pub page_audience: Option<String>,
    #[serde(default)]
    pub comp_audience: Option<String>,
    pub load_mode: LoadMode,
    #[serde(default)]
    pub loading_order: i64,
}

impl ComponentRegistration {
    pub fn new(cmp_id: impl Into<String>, load_mode: LoadMode) -> Self {
        Self {
            cmp_id: cmp_id.into(),
            page_audience: None,
            comp_audience: None,
            load_mode,
            loading_order: 0,
        }
    }

    pub fn with_page_audience(mut self, page_audience: impl Into<String>) -> Self {
        self.page_audience = Some(page_audience.into());
        self
    }

    pub fn with_comp_audience(mut self, comp_audience: impl Into<String>) -> Self {
        self.comp_audience = Some(comp_audience.into());
        self
    }

    pub fn with_loading_order(mut self, loading_order: i64) -> Self {
        self.loading_order = loading_order;
        self
    }
}

/// 组件注册表
#[derive(Debug)]
pub struct ComponentRegistry {
    registry_id: Uuid,
    by_id: HashMap<String, ComponentRegistration>,
    /// 注册顺序
    order: Vec<String>,
    by_page_audience: HashMap<String, Vec<String>>,
    by_comp_audience: HashMap<String, Vec<String>>,
    /// 各加载方式下的组件，按 loading_order 排序
    by_load_mode: HashMap<LoadMode, Vec<String>>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            registry_id: Uuid::new_v4(),
            by_id: HashMap::new(),
            order: Vec::new(),
            by_page_audience: HashMap::new(),
            by_comp_audience: HashMap::new(),
            by_load_mode: HashMap::new(),
        }
    }

    pub fn registry_id(&self) -> Uuid {
        self.registry_id
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, cmp_id: &str) -> Option<&ComponentRegistration> {
        self.by_id.get(cmp_id)
    }

    /// 注册组件，同 ID 的旧注册信息会被替换
    pub fn register(&mut self, registration: ComponentRegistration) {
        self.remove(&registration.cmp_id);

        let cmp_id = registration.cmp_id.clone();
        debug!(
            registry_id = %self.registry_id,
            cmp_id = %cmp_id,
            load_mode = ?registration.load_mode,
            "注册组件"
        );

        if let Some(page_audience) = registration.page_audience.as_ref().filter(|a| !a.is_empty()) {
            self.by_page_audience
                .entry(page_audience.clone())
                .or_default()
                .push(cmp_id.clone());
        }

        if let Some(comp_audience) = registration.comp_audience.as_ref().filter(|a| !a.is_empty()) {
            self.by_comp_audience
                .entry(comp_audience.clone())
                .or_default()
                .push(cmp_id.clone());
        }

        let load_mode = registration.load_mode;
        self.order.push(cmp_id.clone());
        self.by_id.insert(cmp_id.clone(), registration);

        let by_id = &self.by_id;
        let ids = self.by_load_mode.entry(load_mode).or_default();
        ids.push(cmp_id);
        ids.sort_by_key(|id| by_id.get(id).map_or(0, |reg| reg.loading_order));
    }

    /// 从所有索引中移除组件
    pub fn remove(&mut self, cmp_id: &str) -> Option<ComponentRegistration> {
        let registration = self.by_id.remove(cmp_id)?;

        self.order.retain(|id| id != cmp_id);
        if let Some(page_audience) = registration.page_audience.as_deref() {
            remove_from_index(&mut self.by_page_audience, page_audience, cmp_id);
        }
        if let Some(comp_audience) = registration.comp_audience.as_deref() {
            remove_from_index(&mut self.by_comp_audience, comp_audience, cmp_id);
        }
        if let Some(ids) = self.by_load_mode.get_mut(&registration.load_mode) {
            ids.retain(|id| id != cmp_id);
        }

        debug!(registry_id = %self.registry_id, cmp_id = %cmp_id, "移除组件");
        Some(registration)
    }

    /// 已注册组件使用的页面受众（排序后），供预览选择器使用
    pub fn page_audiences(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_page_audience.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 某个页面受众下的组件，`*` 返回全部
    pub fn components_for_page_audience(&self, page_audience: &str) -> Vec<&ComponentRegistration> {
        if page_audience == ALL_PAGE_AUDIENCES {
            return self.lookup(&self.order);
        }
        self.by_page_audience
            .get(page_audience)
            .map(|ids| self.lookup(ids))
            .unwrap_or_default()
    }

    pub fn components_with_audience(&self, comp_audience: &str) -> Vec<&ComponentRegistration> {
        self.by_comp_audience
            .get(comp_audience)
            .map(|ids| self.lookup(ids))
            .unwrap_or_default()
    }

    /// 某种加载方式下的组件，按 loading_order 排序
    pub fn components_by_load_mode(&self, load_mode: LoadMode) -> Vec<&ComponentRegistration> {
        self.by_load_mode
            .get(&load_mode)
            .map(|ids| self.lookup(ids))
            .unwrap_or_default()
    }

    /// 按输入顺序返回页面受众与组件受众检查都通过的组件 ID，未注册的 ID 被忽略
    pub fn visible_components<E: AudienceEvaluator>(
        &self,
        cmp_ids: &[&str],
        resolver: &mut AudienceResolver<'_, E>,
        page_audience: Option<&str>,
    ) -> Vec<String> {
        cmp_ids
            .iter()
            .filter_map(|cmp_id| {
                let Some(registration) = self.by_id.get(*cmp_id) else {
                    debug!(cmp_id = %cmp_id, "组件未注册，忽略");
                    return None;
                };
                let visible = resolver.is_component_visible(
                    page_audience,
                    registration.page_audience.as_deref(),
                    registration.comp_audience.as_deref(),
                );
                debug!(cmp_id = %cmp_id, visible, "组件受众检查");
                visible.then(|| registration.cmp_id.clone())
            })
            .collect()
    }

    /// 所有已注册组件中应当显示的部分
    pub fn visible_registered_components<E: AudienceEvaluator>(
        &self,
        resolver: &mut AudienceResolver<'_, E>,
    ) -> Vec<String> {
        let ids: Vec<&str> = self.order.iter().map(String::as_str).collect();
        self.show_candidates(&ids, resolver)
    }

    /// 注册组件；加载方式为 onload 时返回需要立即显示的组件 ID
    ///
    /// 解析器应已完成页面受众扫描。
    pub fn on_register<E: AudienceEvaluator>(
        &mut self,
        registration: ComponentRegistration,
        resolver: &mut AudienceResolver<'_, E>,
    ) -> Vec<String> {
        self.register_and_show(registration, LoadMode::OnLoad, resolver)
    }

    /// 组件进入可视区域；加载方式为 onvisible 时返回需要显示的组件 ID
    pub fn on_visible<E: AudienceEvaluator>(
        &mut self,
        registration: ComponentRegistration,
        resolver: &mut AudienceResolver<'_, E>,
    ) -> Vec<String> {
        self.register_and_show(registration, LoadMode::OnVisible, resolver)
    }

    fn register_and_show<E: AudienceEvaluator>(
        &mut self,
        registration: ComponentRegistration,
        trigger: LoadMode,
        resolver: &mut AudienceResolver<'_, E>,
    ) -> Vec<String> {
        let cmp_id = registration.cmp_id.clone();
        let load_mode = registration.load_mode;
        self.register(registration);

        if load_mode != trigger {
            return Vec::new();
        }
        self.show_candidates(&[cmp_id.as_str()], resolver)
    }

    /// 预览模式全部显示；否则未匹配到页面受众时不显示任何组件
    fn show_candidates<E: AudienceEvaluator>(
        &self,
        cmp_ids: &[&str],
        resolver: &mut AudienceResolver<'_, E>,
    ) -> Vec<String> {
        if resolver.config().builder_mode {
            return cmp_ids
                .iter()
                .filter(|id| self.by_id.contains_key(**id))
                .map(|id| id.to_string())
                .collect();
        }

        let Some(page_audience) = resolver.matched_audience().map(str::to_owned) else {
            debug!(registry_id = %self.registry_id, "未匹配到页面受众，不显示组件");
            return Vec::new();
        };

        self.visible_components(cmp_ids, resolver, Some(&page_audience))
    }

    fn lookup(&self, ids: &[String]) -> Vec<&ComponentRegistration> {
        ids.iter().filter_map(|id| self.by_id.get(id)).collect()
    }
}

fn remove_from_index(index: &mut HashMap<String, Vec<String>>, key: &str, cmp_id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|id| id != cmp_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
