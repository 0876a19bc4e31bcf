use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;

/// 信号、持仓事件及单策略历史的统一容量上限。
pub const HISTORY_CAP: usize = 100;

/// # Summary
/// 固定容量、最新在前的历史日志。
///
/// # Invariants
/// - 长度永远不超过 `capacity`。
/// - 下标 0 始终是最近插入的元素，顺序为插入顺序的逆序。
/// - 序列化形式为最新在前的数组；反序列化按 `HISTORY_CAP` 截断。
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedHistory<T> {
    // 内部存储容器，队首为最新
    items: VecDeque<T>,
    // 最大容量
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// # Summary
    /// 创建一个新的历史日志。
    ///
    /// # Logic
    /// 预分配指定大小的内存；容量为 0 时按 1 处理，避免日志永远为空。
    ///
    /// # Arguments
    /// * `capacity`: 固定容量上限。
    ///
    /// # Returns
    /// 初始化后的 BoundedHistory 实例。
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// # Summary
    /// 在队首插入最新元素。
    ///
    /// # Logic
    /// 1. push_front 插入。
    /// 2. 超出容量时从队尾丢弃最旧的元素。
    ///
    /// # Arguments
    /// * `item`: 待插入的元素。
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    /// # Summary
    /// 由一组已按最新在前排序的元素构造日志。
    ///
    /// # Logic
    /// 仅保留前 `capacity` 个元素，多余的旧数据被截断。
    pub fn from_newest_first<I>(items: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let capacity = capacity.max(1);
        Self {
            items: items.into_iter().take(capacity).collect(),
            capacity,
        }
    }

    /// 最近插入的元素。
    pub fn latest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 按最新在前的顺序遍历。
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// 按最新在前的顺序导出为 Vec。
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for BoundedHistory<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for BoundedHistory<T> {
    /// 容量不取自输入，超出上限的旧元素被丢弃。
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(Self::from_newest_first(items, HISTORY_CAP))
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(HISTORY_CAP)
    }
}
