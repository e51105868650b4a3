use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::value::Value;

/// Matcher capability。core は評価と失敗メッセージの取得のみを行い、
/// 具体的な matcher は外部 (front-end) が実装する。
#[cfg_attr(test, mockall::automock)]
pub trait Matching: Send + Sync {
    fn evaluate(&self) -> bool;

    fn failure_message_for_should(&self) -> String;

    fn failure_message_for_should_not(&self) -> String;

    /// 存在 (非 null) 判定しかしない matcher かどうか
    fn is_existence_only(&self) -> bool {
        false
    }

    fn evaluates_multiple_times(&self) -> bool {
        false
    }

    /// 非同期検証で複数回評価されることの通知
    fn set_evaluates_multiple_times(&mut self, _evaluates: bool) {}

    /// shouldNot 側の期待で評価されることの通知
    fn set_negative_expectation(&mut self, _negative: bool) {}
}

pub type MatcherFactory = Arc<dyn Fn(Value) -> Box<dyn Matching> + Send + Sync>;

/// Matcher 名 → factory の登録表。front-end が登録し、core は解決済みの
/// capability だけに依存する (名前引きは core では行わない)。
#[derive(Default)]
pub struct MatcherRegistry {
    factories: DashMap<String, MatcherFactory>,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// 同名の factory は置き換えられる
    pub fn register(&self, name: impl Into<String>, factory: MatcherFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            debug!(matcher = %name, "matcher factory replaced");
        }
    }

    pub fn create(&self, name: &str, subject: Value) -> Option<Box<dyn Matching>> {
        let factory = self.factories.get(name)?;
        Some((factory.value())(subject))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
