// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 静态资源直出
//!
//! 扩展名被识别为静态资源、且文件确实存在的请求会被直接返回，完全绕过渲染管线与页面缓存。
//! CSS/JS 会优先选择客户端支持的预压缩兄弟文件（`.br` 优先于 `.gz`）。
//! 所有静态命中都带有一年的 `immutable` 缓存头。

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, warn};

use crate::{
    cache::FileCache,
    param::*,
    request::Request,
    response::{etag_matches, format_http_date, quote_etag, Response},
    util::{format_file_size, sha256_hex},
};

/// 解析成功的静态资源
#[derive(Debug, Clone, PartialEq)]
pub struct StaticAssetDescriptor {
    path: PathBuf,
    mime: Option<&'static str>,
    variants: Vec<HttpEncoding>,
}

impl StaticAssetDescriptor {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime(&self) -> Option<&'static str> {
        self.mime
    }

    /// 可用的预压缩变体，按优先级排列
    pub fn variants(&self) -> &[HttpEncoding] {
        &self.variants
    }

    /// 是否参与编码协商（仅 CSS/JS）
    pub fn negotiates_encoding(&self) -> bool {
        extension_of(&self.path)
            .map_or(false, |e| COMPRESSIBLE_EXTENSIONS.contains(&e.as_str()))
    }

    /// 选择要发送的编码：客户端支持的第一个可用变体
    pub fn select_encoding(&self, request: &Request) -> Option<HttpEncoding> {
        self.variants.iter().copied().find(|e| request.accepts(*e))
    }

    fn variant_path(&self, encoding: Option<HttpEncoding>) -> PathBuf {
        match encoding.and_then(|e| e.sibling_suffix()) {
            Some(suffix) => append_suffix(&self.path, suffix),
            None => self.path.clone(),
        }
    }
}

/// 把请求路径解析为文档根目录下的静态文件。
///
/// 扩展名不在静态表中、路径非法或文件不存在时返回 `None`，调用方应继续走渲染流程。
pub fn resolve(root: &Path, request_path: &str) -> Option<StaticAssetDescriptor> {
    let decoded = percent_decode(request_path)?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut path = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => path.push(s),
        }
    }

    let extension = extension_of(&path)?;
    if !STATIC_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    if !path.is_file() {
        return None;
    }

    let mut variants = vec![];
    if COMPRESSIBLE_EXTENSIONS.contains(&extension.as_str()) {
        for encoding in [HttpEncoding::Br, HttpEncoding::Gzip] {
            if let Some(suffix) = encoding.sibling_suffix() {
                if append_suffix(&path, suffix).is_file() {
                    variants.push(encoding);
                }
            }
        }
    }

    Some(StaticAssetDescriptor {
        mime: STATIC_MIME_TYPES.get(extension.as_str()).copied(),
        path,
        variants,
    })
}

/// 静态资源服务，内部持有一个小型的字节缓存
pub struct AssetServer {
    root: PathBuf,
    cache: Mutex<FileCache>,
    cache_threshold: u64,
}

impl AssetServer {
    pub fn new(root: impl Into<PathBuf>, cache_size: usize, cache_threshold: u64) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(FileCache::from_capacity(cache_size)),
            cache_threshold,
        }
    }

    pub fn cached_files(&self) -> usize {
        match self.cache.lock() {
            Ok(lock) => lock.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 尝试以静态资源响应请求。返回 `None` 表示不是静态资源，应交给页面流程处理。
    pub fn serve(&self, request: &Request, id: u128) -> Option<Response> {
        let headonly = match request.method() {
            HttpRequestMethod::Get => false,
            HttpRequestMethod::Head => true,
            _ => return None,
        };

        let descriptor = resolve(&self.root, request.path())?;
        let encoding = descriptor.select_encoding(request);
        let file_path = descriptor.variant_path(encoding);
        debug!(
            "[ID{}]静态资源命中：{}，编码：{:?}",
            id,
            file_path.display(),
            encoding
        );

        let (content, etag) = match self.load(&file_path, id) {
            Some(loaded) => loaded,
            None => {
                warn!("[ID{}]静态资源{}读取失败，交给渲染流程", id, file_path.display());
                return None;
            }
        };

        let expires = Utc::now() + ChronoDuration::seconds(STATIC_MAX_AGE as i64);
        let mut response = Response::new();
        response
            .set_header("Cache-Control", STATIC_CACHE_CONTROL)
            .set_header("Expires", &format_http_date(&expires))
            .set_header("ETag", &quote_etag(&etag));
        if descriptor.negotiates_encoding() {
            response.set_header("Vary", "Accept-Encoding");
        }

        if let Some(inm) = request.if_none_match() {
            if etag_matches(inm, &etag) {
                debug!("[ID{}]静态资源ETag匹配，返回304", id);
                response.set_code(304);
                return Some(response);
            }
        }

        if let Some(mime) = descriptor.mime() {
            response.set_header("Content-Type", mime);
        }
        if let Some(e) = encoding {
            response.set_header("Content-Encoding", &e.to_string());
        }
        response.set_content(content);
        if headonly {
            response.strip_body();
        }
        Some(response)
    }

    /// 读取文件内容与 ETag，优先使用内存缓存
    fn load(&self, path: &Path, id: u128) -> Option<(Bytes, String)> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata.modified().ok();
        let key = path.to_string_lossy().to_string();

        if let Some(modified) = modified {
            let mut cache = match self.cache.lock() {
                Ok(lock) => lock,
                Err(poisoned) => {
                    warn!("[ID{}]缓存锁被污染，恢复并继续", id);
                    poisoned.into_inner()
                }
            };
            if let Some(hit) = cache.find(&key, modified) {
                debug!("[ID{}]资源缓存命中：{}", id, key);
                return Some(hit);
            }
        }

        let content = Bytes::from(fs::read(path).ok()?);
        let etag = sha256_hex(&content);
        debug!(
            "[ID{}]读取文件{}，大小{}",
            id,
            key,
            format_file_size(content.len() as u64)
        );

        if let Some(modified) = modified {
            if FileCache::should_cache(content.len() as u64, self.cache_threshold) {
                let mut cache = match self.cache.lock() {
                    Ok(lock) => lock,
                    Err(poisoned) => poisoned.into_inner(),
                };
                cache.push(&key, content.clone(), etag.clone(), modified);
            }
        }
        Some((content, etag))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// 百分号解码，非法编码或解码结果不是 UTF-8 时返回 `None`
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
