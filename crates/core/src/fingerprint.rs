//! 资源与设置指纹
//!
//! 指纹用于结果缓存的键以及重新验证判断。记录先被规范化为紧凑JSON：
//! 对象的键递归排序，数组保持原有顺序（数组顺序在医疗记录中有语义），
//! 数字沿用 serde_json 的规范格式；随后对规范化文本计算 SHA-256。
//!
//! 注意 `1` 与 `1.0` 会得到不同的指纹，这只会造成缓存未命中，不会造成误命中。

use sha2::{Digest, Sha256};

use crate::models::ValidationSettings;

/// 递归排序对象键，生成规范化的JSON值
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// 规范化后的紧凑JSON文本
pub fn canonical_json(value: &serde_json::Value) -> String {
    canonicalize(value).to_string()
}

/// 记录内容哈希
pub fn content_hash(resource: &serde_json::Value) -> String {
    sha256_hex(canonical_json(resource).as_bytes())
}

/// 设置哈希
pub fn settings_hash(settings: &ValidationSettings) -> String {
    match serde_json::to_value(settings) {
        Ok(value) => content_hash(&value),
        // ValidationSettings 只包含可序列化的字段
        Err(_) => sha256_hex(format!("{settings:?}").as_bytes()),
    }
}

/// 结果缓存键：资源类型、资源ID、内容哈希与设置哈希的组合
pub fn cache_key(
    resource_type: &str,
    resource_id: Option<&str>,
    content_hash: &str,
    settings_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        resource_type,
        resource_id.unwrap_or(""),
        content_hash,
        settings_hash,
    ] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// 读取记录的 `id` 字段
pub fn resource_id(resource: &serde_json::Value) -> Option<String> {
    resource
        .get("id")
        .and_then(|id| id.as_str())
        .map(|id| id.to_string())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
