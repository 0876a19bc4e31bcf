pub mod tls;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// # Summary
/// 不透明的结构化记录，承载推送报文与 REST 快照中的业务负载。
///
/// # Invariants
/// - 内部始终是 JSON 对象，客户端不解释其中的交易语义。
/// - 相等性为 JSON 对象的逐字段结构相等。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// # Summary
    /// 读取字符串类型的字段。
    ///
    /// # Logic
    /// 1. 查找指定键。
    /// 2. 仅当值为 JSON 字符串时返回，其余类型（数字、null 等）一律视为缺失。
    ///
    /// # Arguments
    /// * `key`: 字段名。
    ///
    /// # Returns
    /// 字段存在且为字符串时返回其引用，否则返回 None。
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// 读取任意字段的原始值。
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 取回底层的 JSON 对象。
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    /// # Summary
    /// 从任意 JSON 值构造记录。
    ///
    /// # Logic
    /// 1. 若值为 JSON 对象则直接包装。
    /// 2. 否则原样返回该值作为错误，由调用方决定如何报告。
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}
