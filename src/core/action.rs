//! 传输动作：按名称注册的策略

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, PoisonError, RwLock};

/// 目标已存在时的处理方式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferAction {
    name: Cow<'static, str>,
}

static REGISTRY: LazyLock<RwLock<HashMap<String, TransferAction>>> = LazyLock::new(|| {
    let registry = TransferAction::CANONICAL
        .iter()
        .map(|a| (a.name().to_string(), a.clone()))
        .collect();
    RwLock::new(registry)
});

impl TransferAction {
    /// 覆盖
    pub const OVERWRITE: TransferAction = TransferAction::constant("overwrite");
    /// 从已有长度续传
    pub const RESUME: TransferAction = TransferAction::constant("resume");
    /// 以带时间戳的新名称写入
    pub const RENAME: TransferAction = TransferAction::constant("rename");
    /// 先将已有文件改名再写入
    pub const RENAME_EXISTING: TransferAction = TransferAction::constant("renameexisting");
    pub const SKIP: TransferAction = TransferAction::constant("skip");
    /// 询问用户
    pub const CALLBACK: TransferAction = TransferAction::constant("callback");
    /// 按大小、修改时间、校验和逐个决定
    pub const COMPARISON: TransferAction = TransferAction::constant("comparison");
    pub const CANCEL: TransferAction = TransferAction::constant("cancel");

    pub const CANONICAL: [TransferAction; 8] = [
        Self::OVERWRITE,
        Self::RESUME,
        Self::RENAME,
        Self::RENAME_EXISTING,
        Self::SKIP,
        Self::CALLBACK,
        Self::COMPARISON,
        Self::CANCEL,
    ];

    const fn constant(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
        }
    }

    /// 注册自定义动作，同名时返回已注册的实例
    pub fn register(name: &str) -> TransferAction {
        let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        registry
            .entry(name.to_string())
            .or_insert_with(|| TransferAction {
                name: Cow::Owned(name.to_string()),
            })
            .clone()
    }

    pub fn for_name(name: &str) -> Option<TransferAction> {
        REGISTRY
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for TransferAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for TransferAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        TransferAction::for_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("未知的传输动作: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_name_round_trips_canonical() {
        for action in TransferAction::CANONICAL {
            assert_eq!(TransferAction::for_name(action.name()), Some(action.clone()));
        }
        assert_eq!(TransferAction::RENAME_EXISTING.name(), "renameexisting");
        assert_eq!(TransferAction::for_name("unknown"), None);
    }

    #[test]
    fn test_register_custom_action() {
        let mirror = TransferAction::register("mirror");
        assert_eq!(TransferAction::for_name("mirror"), Some(mirror.clone()));
        assert_eq!(TransferAction::register("mirror"), mirror);
    }

    #[test]
    fn test_serde_uses_name() {
        let json = serde_json::to_string(&TransferAction::RESUME).unwrap();
        assert_eq!(json, "\"resume\"");
        let action: TransferAction = serde_json::from_str("\"skip\"").unwrap();
        assert_eq!(action, TransferAction::SKIP);
    }
}
