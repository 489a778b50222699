// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了缓存服务器遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 静态资源的固定 MIME 类型映射表。
//! - 页面缓存与静态资源缓存的时效常量。
//! - HTTP 方法、版本、协议类型及编码格式的强类型枚举。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::time::Duration;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "shaneyale-cacheserver";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 页面缓存条目的固定存活时间（1 小时）
pub const PAGE_CACHE_TTL: Duration = Duration::from_secs(3600);

/// 静态资源的 `max-age`（1 年，单位秒）
pub const STATIC_MAX_AGE: u64 = 31_536_000;

/// 静态资源命中时的 `Cache-Control` 值
pub const STATIC_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// 页面缓存路径（HIT/MISS）上的 `Cache-Control` 值
pub const PAGE_CACHE_CONTROL: &str = "public, max-age=3600";

/// 页面响应的默认内容类型
pub const HTML_CONTENT_TYPE: &str = "text/html;charset=utf-8";

/// 可在不破坏缓存资格的前提下出现在查询字符串中的追踪参数名。
/// 以 `_` 结尾的项表示前缀匹配（如 `utm_source`）。
pub const TRACKING_PARAMS: [&str; 4] = ["utm_", "ref", "fbclid", "gclid"];

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        // 2xx
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(203, "Non-Authoritative Information");
        map.insert(204, "No Content");
        map.insert(205, "Reset Content");
        map.insert(206, "Partial Content");

        // 3xx
        map.insert(300, "Multiple Choices");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(412, "Precondition Failed");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(422, "Unprocessable Content");
        map.insert(429, "Too Many Requests");

        // 5xx
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 被识别为静态资源的扩展名（小写）。匹配这些扩展名且文件存在的请求会绕过渲染直接返回。
pub const STATIC_EXTENSIONS: [&str; 19] = [
    "css", "js", "mjs", "map", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "woff",
    "woff2", "ttf", "otf", "eot", "lottie", "dotlottie",
];

lazy_static! {
    /// 静态资源扩展名到 MIME 类型的固定映射表。
    ///
    /// 不在表中的静态扩展名（如 `map`）直出时不附带 `Content-Type`。
    pub static ref STATIC_MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("css", "text/css");
        map.insert("js", "application/javascript");
        map.insert("mjs", "application/javascript");
        map.insert("png", "image/png");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("gif", "image/gif");
        map.insert("svg", "image/svg+xml");
        map.insert("webp", "image/webp");
        map.insert("avif", "image/avif");
        map.insert("ico", "image/x-icon");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("ttf", "font/ttf");
        map.insert("otf", "font/otf");
        map.insert("eot", "font/eot");
        // 两种动画数据格式
        map.insert("lottie", "application/json");
        map.insert("dotlottie", "application/json");
        map
    };
}

/// 允许协商预压缩变体的扩展名（仅 CSS/JS）
pub const COMPRESSIBLE_EXTENSIONS: [&str; 3] = ["css", "js", "mjs"];

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
    /// Brotli 压缩
    Br,
}

/// 请求所使用的协议类型。HTTP 与 HTTPS 在缓存键中永不混淆。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl HttpEncoding {
    /// 预压缩兄弟文件的后缀名（`deflate` 没有预压缩变体）
    pub fn sibling_suffix(&self) -> Option<&'static str> {
        match *self {
            HttpEncoding::Br => Some(".br"),
            HttpEncoding::Gzip => Some(".gz"),
            HttpEncoding::Deflate => None,
        }
    }
}

impl Scheme {
    /// 参与缓存键计算的协议标记
    pub fn marker(&self) -> &'static str {
        match *self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

use std::fmt;

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "1.0"),
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
            HttpRequestMethod::Put => write!(f, "PUT"),
            HttpRequestMethod::Patch => write!(f, "PATCH"),
            HttpRequestMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}
