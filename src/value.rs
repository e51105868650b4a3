use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

// 値の型
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Duration(Duration),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// `Null` は対象が存在しないことを表す
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Duration(d) => write!(f, "{:?}", d),
            Value::List(_) | Value::Map(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Duration(value)
    }
}

/// 将来変化する値を閉包で包んだもの。評価のたびに読み直される。
#[derive(Clone)]
pub struct FutureValue {
    producer: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl FutureValue {
    pub fn new(producer: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// 現時点の値を読む
    pub fn current(&self) -> Value {
        (self.producer)()
    }
}

impl fmt::Debug for FutureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureValue").finish_non_exhaustive()
    }
}

/// 存在検証の対象。attach 時点の固定値か、評価時に読み直す将来値のどちらか。
#[derive(Debug, Clone)]
pub enum Subject {
    Value(Value),
    Future(FutureValue),
}

impl Subject {
    pub fn current(&self) -> Value {
        match self {
            Subject::Value(value) => value.clone(),
            Subject::Future(future) => future.current(),
        }
    }
}

impl From<Value> for Subject {
    fn from(value: Value) -> Self {
        Subject::Value(value)
    }
}

impl From<FutureValue> for Subject {
    fn from(future: FutureValue) -> Self {
        Subject::Future(future)
    }
}
