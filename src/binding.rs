use std::{collections::HashMap, fmt, sync::Arc};

use crate::value::Value;

pub type BindingProducer = Arc<dyn Fn() -> Value + Send + Sync>;

/// 遅延評価される名前付き束縛の宣言。宣言時には producer は呼ばれない。
#[derive(Clone)]
pub struct BindingDecl {
    pub name: String,
    pub producer: BindingProducer,
}

impl BindingDecl {
    pub fn new(name: impl Into<String>, producer: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            producer: Arc::new(producer),
        }
    }
}

impl fmt::Debug for BindingDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingDecl")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// example 1 回分の束縛スコープ。root→leaf でマージ済みの producer 表と、
/// その example の間だけ生きるメモを持つ。
pub(crate) struct BindingScope {
    producers: HashMap<String, BindingProducer>,
    memo: HashMap<String, Value>,
}

impl BindingScope {
    pub(crate) fn new(producers: HashMap<String, BindingProducer>) -> Self {
        Self {
            producers,
            memo: HashMap::new(),
        }
    }

    /// 初回アクセス時に producer を評価し、以後はメモ化された値を返す。
    /// 未宣言の名前は `None`。
    pub(crate) fn resolve(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.memo.get(name) {
            return Some(value.clone());
        }
        let producer = self.producers.get(name)?.clone();
        let value = producer();
        self.memo.insert(name.to_string(), value.clone());
        Some(value)
    }

    /// 解決結果を直接メモに書く (未宣言名の失敗を一度だけ報告するために使う)
    pub(crate) fn memoize(&mut self, name: &str, value: Value) {
        self.memo.insert(name.to_string(), value);
    }

    pub(crate) fn is_memoized(&self, name: &str) -> bool {
        self.memo.contains_key(name)
    }
}
