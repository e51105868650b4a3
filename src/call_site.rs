use std::fmt;

use serde::{Deserialize, Serialize};

/// 宣言や失敗に付与される呼び出し位置 (ファイル名と行番号)。値として比較される。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Captures the current source location as a [`CallSite`].
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::call_site::CallSite::new(file!(), line!())
    };
}
