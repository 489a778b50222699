// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 页面缓存存储
//!
//! 以磁盘目录持久化完整的页面响应，进程重启后依然可以命中。
//!
//! 每个缓存键对应一个 `<key>.entry` 文件：第一行是 JSON 元数据（ETag、创建时间、大小、内容类型），
//! 其后紧跟原始正文。写入总是先落到同目录下的临时文件再原子地 `rename` 到位，
//! 因此并发读者只会看到完整的旧条目或完整的新条目。读取时会校验大小与 ETag，
//! 任何不一致都视为未命中。

use std::{
    fs::{self, File},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use log::{debug, error, warn};
use serde_derive::{Deserialize, Serialize};

use crate::{
    exception::Exception,
    key::CacheKey,
    param::PAGE_CACHE_TTL,
    util::{format_file_size, sha256_hex},
};

const ENTRY_SUFFIX: &str = ".entry";
const TMP_SUFFIX: &str = ".tmp";

/// 早于该时间的临时文件被视为崩溃残留，可以在清空时一并删除
const TMP_STALE_AFTER: Duration = Duration::from_secs(60);

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 一条持久化的页面响应
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    body: Bytes,
    etag: String,
    created_at: SystemTime,
    size: u64,
    content_type: Option<String>,
}

impl CachedEntry {
    fn new(body: Bytes, content_type: Option<&str>, created_at: SystemTime) -> Self {
        Self {
            etag: etag_of(&body),
            size: body.len() as u64,
            body,
            created_at,
            content_type: content_type.map(str::to_string),
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// 渲染时给出的 `Content-Type`，未给出时为 `None`
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// 条目在 `now` 时刻是否仍然新鲜。创建时间晚于 `now`（时钟回拨）时视为新鲜。
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        match now.duration_since(self.created_at) {
            Ok(age) => age < PAGE_CACHE_TTL,
            Err(_) => true,
        }
    }
}

/// 正文的 ETag：SHA-256 摘要
pub fn etag_of(body: &[u8]) -> String {
    sha256_hex(body)
}

#[derive(Serialize, Deserialize, Debug)]
struct EntryMeta {
    etag: String,
    created_at_ms: u64,
    size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

/// 基于文件系统的页面缓存存储，可在多个线程乃至多个进程之间共享。
#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    /// 打开（必要时创建）缓存目录
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Exception> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            error!("无法创建页面缓存目录{}：{}", dir.display(), e);
            Exception::CacheWriteFailed
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}{}", key, ENTRY_SUFFIX))
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{}.{}.{}{}", key, process::id(), seq, TMP_SUFFIX))
    }

    /// 查询新鲜条目。不存在、已过期或无法读取都返回 `None`。
    pub fn get(&self, key: &CacheKey) -> Option<CachedEntry> {
        self.get_at(key, SystemTime::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: SystemTime) -> Option<CachedEntry> {
        match self.read(key) {
            Ok(Some(entry)) if entry.is_fresh_at(now) => Some(entry),
            Ok(Some(_)) => {
                debug!("缓存条目{}已过期", key);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("读取缓存条目{}失败（{}），按未命中处理", key, e);
                None
            }
        }
    }

    /// 读取条目本身，不判断新鲜度
    pub fn read(&self, key: &CacheKey) -> Result<Option<CachedEntry>, Exception> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                error!("无法读取缓存文件{}：{}", path.display(), e);
                return Err(Exception::CacheReadFailed);
            }
        };

        let split = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(Exception::CacheCorrupted)?;
        let meta: EntryMeta = serde_json::from_slice(&raw[..split]).map_err(|e| {
            error!("缓存文件{}的元数据无法解析：{}", path.display(), e);
            Exception::CacheCorrupted
        })?;
        let body = Bytes::copy_from_slice(&raw[split + 1..]);

        if body.len() as u64 != meta.size || etag_of(&body) != meta.etag {
            error!("缓存文件{}的正文与元数据不一致", path.display());
            return Err(Exception::CacheCorrupted);
        }

        Ok(Some(CachedEntry {
            body,
            etag: meta.etag,
            created_at: UNIX_EPOCH + Duration::from_millis(meta.created_at_ms),
            size: meta.size,
            content_type: meta.content_type,
        }))
    }

    /// 写入条目，无条件覆盖旧条目
    pub fn put(&self, key: &CacheKey, body: Bytes) -> Result<CachedEntry, Exception> {
        self.put_at(key, body, SystemTime::now())
    }

    pub fn put_at(
        &self,
        key: &CacheKey,
        body: Bytes,
        created_at: SystemTime,
    ) -> Result<CachedEntry, Exception> {
        self.put_page_at(key, body, None, created_at)
    }

    /// 写入条目并记录内容类型，命中时按原类型返回
    pub fn put_page_at(
        &self,
        key: &CacheKey,
        body: Bytes,
        content_type: Option<&str>,
        created_at: SystemTime,
    ) -> Result<CachedEntry, Exception> {
        let entry = CachedEntry::new(body, content_type, created_at);
        let created_at_ms = created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let meta = EntryMeta {
            etag: entry.etag.clone(),
            created_at_ms,
            size: entry.size,
            content_type: entry.content_type.clone(),
        };
        let header = serde_json::to_vec(&meta).map_err(|e| {
            error!("无法序列化缓存元数据：{}", e);
            Exception::CacheWriteFailed
        })?;

        let tmp = self.tmp_path(key);
        let target = self.entry_path(key);
        let written = write_entry(&tmp, &header, &entry.body).and_then(|_| fs::rename(&tmp, &target));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            error!("无法写入缓存文件{}：{}", target.display(), e);
            return Err(Exception::CacheWriteFailed);
        }

        debug!(
            "缓存条目{}已写入，大小{}",
            key,
            format_file_size(entry.size)
        );
        Ok(entry)
    }

    /// 删除全部条目，返回删除的条目数
    pub fn purge_all(&self) -> Result<usize, Exception> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                error!("无法遍历页面缓存目录{}：{}", self.dir.display(), e);
                return Err(Exception::CachePurgeFailed);
            }
        };

        let mut removed = 0;
        let mut failed = false;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let is_entry = name.ends_with(ENTRY_SUFFIX);
            if !is_entry && !(name.ends_with(TMP_SUFFIX) && is_stale_tmp(&entry)) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(_) if is_entry => removed += 1,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    error!("无法删除缓存文件{}：{}", path.display(), e);
                    failed = true;
                }
            }
        }

        match failed {
            true => Err(Exception::CachePurgeFailed),
            false => Ok(removed),
        }
    }

    /// 当前目录中的条目数（含已过期但尚未覆盖的条目）
    pub fn entry_count(&self) -> usize {
        match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().ends_with(ENTRY_SUFFIX))
                .count(),
            Err(_) => 0,
        }
    }
}

fn write_entry(path: &Path, header: &[u8], body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(header)?;
    file.write_all(b"\n")?;
    file.write_all(body)?;
    file.sync_data()
}

fn is_stale_tmp(entry: &fs::DirEntry) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .map_or(false, |age| age > TMP_STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{HttpRequestMethod, Scheme};
    use std::sync::Arc;
    use std::thread;

    fn key(path: &str) -> CacheKey {
        CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, path, "").unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let k = key("/page");

        let written = store.put(&k, Bytes::from("<html>A</html>")).unwrap();
        assert_eq!(written.etag(), etag_of(b"<html>A</html>"));
        assert_eq!(written.size(), 14);

        let found = store.get(&k).unwrap();
        assert_eq!(found.body(), &Bytes::from("<html>A</html>"));
        assert_eq!(found.etag(), written.etag());
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_content_type_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("/feed/");
        let now = SystemTime::now();
        PageStore::open(dir.path())
            .unwrap()
            .put_page_at(&k, Bytes::from("<rss/>"), Some("application/rss+xml"), now)
            .unwrap();

        let reopened = PageStore::open(dir.path()).unwrap();
        let found = reopened.get(&k).unwrap();
        assert_eq!(found.content_type(), Some("application/rss+xml"));
        assert_eq!(found.body(), &Bytes::from("<rss/>"));

        // 未记录类型的旧条目依然可读
        let plain = key("/plain");
        let meta = format!(r#"{{"etag":"{}","created_at_ms":{},"size":1}}"#, etag_of(b"x"), 1_700_000_000_000u64);
        fs::write(dir.path().join(format!("{}.entry", plain)), format!("{}\nx", meta)).unwrap();
        let legacy = reopened.read(&plain).unwrap().unwrap();
        assert_eq!(legacy.content_type(), None);
        assert_eq!(legacy.body(), &Bytes::from("x"));
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        assert!(store.get(&key("/nothing")).is_none());
        assert_eq!(store.read(&key("/nothing")), Ok(None));
    }

    #[test]
    fn test_ttl_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let k = key("/ttl");
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        store.put_at(&k, Bytes::from("body"), t).unwrap();

        let epsilon = Duration::from_millis(5);
        assert!(store.get_at(&k, t + PAGE_CACHE_TTL - epsilon).is_some());
        assert!(store.get_at(&k, t + PAGE_CACHE_TTL + epsilon).is_none());
        // 过期只是逻辑上的，文件仍在磁盘上
        assert!(store.read(&k).unwrap().is_some());
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let k = key("/over");

        store.put(&k, Bytes::from("old")).unwrap();
        store.put(&k, Bytes::from("new content")).unwrap();

        let found = store.get(&k).unwrap();
        assert_eq!(found.body(), &Bytes::from("new content"));
        assert_eq!(found.etag(), etag_of(b"new content"));
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("/cold");
        {
            let store = PageStore::open(dir.path()).unwrap();
            store.put(&k, Bytes::from("persisted")).unwrap();
        }
        let reopened = PageStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&k).unwrap().body(), &Bytes::from("persisted"));
    }

    #[test]
    fn test_purge_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        for i in 0..5 {
            store.put(&key(&format!("/p{}", i)), Bytes::from("x")).unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        assert_eq!(store.purge_all().unwrap(), 5);
        assert_eq!(store.entry_count(), 0);
        assert!(store.get(&key("/p0")).is_none());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_corrupted_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let k = key("/corrupt");
        store.put(&k, Bytes::from("<html>full body</html>")).unwrap();

        // 截断正文：元数据仍然存在
        let path = dir.path().join(format!("{}.entry", k));
        let raw = fs::read(&path).unwrap();
        fs::write(&path, &raw[..raw.len() - 4]).unwrap();

        assert_eq!(store.read(&k), Err(Exception::CacheCorrupted));
        assert!(store.get(&k).is_none());

        // 重新写入即可修复
        store.put(&k, Bytes::from("<html>repaired</html>")).unwrap();
        assert!(store.get(&k).is_some());
    }

    #[test]
    fn test_garbage_metadata_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let k = key("/garbage");
        fs::write(dir.path().join(format!("{}.entry", k)), b"not json\nbody").unwrap();
        assert_eq!(store.read(&k), Err(Exception::CacheCorrupted));
        assert!(store.get(&k).is_none());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = PageStore::open(dir.path().join("pages")).unwrap();
        fs::remove_dir_all(dir.path().join("pages")).unwrap();

        let result = store.put(&key("/fail"), Bytes::from("x"));
        assert_eq!(result.unwrap_err(), Exception::CacheWriteFailed);
        assert_eq!(store.purge_all(), Ok(0));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PageStore::open(dir.path()).unwrap());
        let k = key("/race");
        store.put(&k, Bytes::from(vec![b'a'; 64 * 1024])).unwrap();

        let writers: Vec<_> = (0..4u8)
            .map(|i| {
                let store = Arc::clone(&store);
                let k = k.clone();
                thread::spawn(move || {
                    for round in 0..20usize {
                        let body = vec![b'b' + i; 32 * 1024 + round * 97];
                        store.put(&k, Bytes::from(body)).unwrap();
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let k = k.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let entry = store.read(&k).unwrap().unwrap();
                        assert_eq!(entry.etag(), etag_of(entry.body()));
                        assert_eq!(entry.size(), entry.body().len() as u64);
                        let first = entry.body()[0];
                        assert!(entry.body().iter().all(|&b| b == first));
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
        assert_eq!(store.entry_count(), 1);
    }
}
