// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 静态资源字节的内存缓存。以文件路径为键，按修改时间校验有效性。

use std::num::NonZeroUsize;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    etag: String,
    modified_time: SystemTime,
}

pub struct FileCache {
    cache: LruCache<String, CacheEntry>,
}

impl FileCache {
    // 根据容量构造，容量为0时按1处理
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    // 放入
    pub fn push(&mut self, filename: &str, bytes: Bytes, etag: String, modified_time: SystemTime) {
        let entry = CacheEntry {
            content: bytes,
            etag,
            modified_time,
        };
        self.cache.put(filename.to_string(), entry);
    }

    // 检查文件大小是否适合缓存
    pub fn should_cache(file_size: u64, threshold: u64) -> bool {
        file_size <= threshold
    }

    // 查询有效缓存，返回内容与 ETag
    pub fn find(&mut self, filename: &str, current_modified_time: SystemTime) -> Option<(Bytes, String)> {
        match self.cache.get(filename) {
            Some(entry) if entry.modified_time == current_modified_time => {
                Some((entry.content.clone(), entry.etag.clone()))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
