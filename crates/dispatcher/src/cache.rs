//! 验证结果缓存
//!
//! 以指纹为键的内存缓存：读取时惰性淘汰过期条目，写入时容量已满则淘汰最旧条目。
//! 设置变更时只能整体清空，不支持选择性修改。

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use validator_core::{CacheConfig, ValidationResult};

/// 顺序记录数低于该值时不压缩
const ORDER_COMPACT_MIN: usize = 64;

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub clears: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    result: ValidationResult,
    created_at: Instant,
    sequence: u64,
}

struct CacheState {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    /// 插入顺序，可能包含已被覆盖或删除的旧键
    order: VecDeque<(String, u64)>,
    next_sequence: u64,
    stats: CacheStats,
}

/// 结果缓存
pub struct ResultCache {
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                config,
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_sequence: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// 查找未过期的条目，过期条目在此时被移除
    pub async fn get(&self, key: &str) -> Option<ValidationResult> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.config.enabled {
            return None;
        }

        let ttl = state.config.ttl();
        let expired = match state.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() <= ttl => {
                let result = entry.result.clone();
                state.stats.hits += 1;
                counter!("validator_cache_hits_total").increment(1);
                return Some(result);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!("缓存条目已过期: {}", key);
            state.entries.remove(key);
            state.stats.expirations += 1;
            state.compact_order();
        }
        state.stats.misses += 1;
        counter!("validator_cache_misses_total").increment(1);
        None
    }

    /// 写入条目，容量已满时先淘汰最旧条目
    pub async fn insert(&self, key: String, result: ValidationResult) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.config.enabled {
            return;
        }

        if !state.entries.contains_key(&key) {
            while state.entries.len() >= state.config.max_entries {
                if !state.evict_oldest() {
                    break;
                }
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.order.push_back((key.clone(), sequence));
        state.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: Instant::now(),
                sequence,
            },
        );
        state.stats.inserts += 1;
        state.compact_order();
        gauge!("validator_cache_entries").set(state.entries.len() as f64);
    }

    /// 清空全部条目，返回被清除的数量
    pub async fn clear(&self) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let cleared = state.entries.len();
        state.entries.clear();
        state.order.clear();
        state.stats.clears += 1;
        gauge!("validator_cache_entries").set(0.0);
        cleared
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        }
    }

    /// 替换缓存配置，条目数超出新上限时立即淘汰；关闭缓存会清空全部条目
    pub async fn update_config(&self, config: CacheConfig) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !config.enabled {
            state.entries.clear();
            state.order.clear();
        }
        state.config = config;
        while state.entries.len() > state.config.max_entries {
            if !state.evict_oldest() {
                break;
            }
        }
    }
}

impl CacheState {
    /// 旧记录超过存活条目数时，只保留仍对应当前条目的顺序记录
    fn compact_order(&mut self) {
        let limit = self.entries.len().saturating_mul(2).max(ORDER_COMPACT_MIN);
        if self.order.len() <= limit {
            return;
        }
        let entries = &self.entries;
        self.order.retain(|(key, sequence)| {
            entries
                .get(key)
                .map(|entry| entry.sequence == *sequence)
                .unwrap_or(false)
        });
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((key, sequence)) = self.order.pop_front() {
            // 跳过已被覆盖写入的旧记录
            let current = self
                .entries
                .get(&key)
                .map(|entry| entry.sequence == sequence)
                .unwrap_or(false);
            if current {
                self.entries.remove(&key);
                self.stats.evictions += 1;
                counter!("validator_cache_evictions_total").increment(1);
                return true;
            }
        }
        false
    }
}
