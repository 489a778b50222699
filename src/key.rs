// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 缓存键生成
//!
//! 由 `(方法, 协议, 路径, 查询字符串)` 派生出确定性的缓存键。
//! 只有 `GET` 请求会被赋予缓存键。

use std::fmt;

use crate::{
    param::{HttpRequestMethod, Scheme},
    request::Request,
    util::sha256_hex,
};

/// 不透明的缓存键：SHA-256 摘要的小写十六进制表示
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// 计算缓存键。非 `GET` 请求返回 `None`。
    ///
    /// 各字段之间以 NUL 分隔，避免 `("/a", "b")` 与 `("/ab", "")` 这样的拼接歧义。
    pub fn derive(
        method: HttpRequestMethod,
        scheme: Scheme,
        path: &str,
        query: &str,
    ) -> Option<Self> {
        if method != HttpRequestMethod::Get {
            return None;
        }
        let material = [path, "\0", query, "\0", scheme.marker()].concat();
        Some(Self(sha256_hex(material.as_bytes())))
    }

    pub fn for_request(request: &Request) -> Option<Self> {
        Self::derive(
            request.method(),
            request.scheme(),
            request.path(),
            request.query(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_only_get_is_keyed() {
        for method in [
            HttpRequestMethod::Head,
            HttpRequestMethod::Post,
            HttpRequestMethod::Put,
            HttpRequestMethod::Delete,
        ] {
            assert!(CacheKey::derive(method, Scheme::Http, "/", "").is_none());
        }
        assert!(CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, "/", "").is_some());
    }

    #[test]
    fn test_known_value_is_stable() {
        // 跨进程稳定：与实现细节无关的固定摘要
        let key = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, "/", "").unwrap();
        assert_eq!(key.as_str(), sha256_hex(b"/\0\0http"));
        assert_eq!(key.as_str().len(), 64);
    }

    #[test]
    fn test_scheme_is_distinguished() {
        let http = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, "/page", "").unwrap();
        let https = CacheKey::derive(HttpRequestMethod::Get, Scheme::Https, "/page", "").unwrap();
        assert_ne!(http, https);
    }

    #[test]
    fn test_concatenation_is_unambiguous() {
        let a = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, "/a", "b").unwrap();
        let b = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, "/ab", "").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_for_request() {
        let request = Request::get("/page?utm_source=x").with_scheme(Scheme::Https);
        let key = CacheKey::for_request(&request).unwrap();
        let expected =
            CacheKey::derive(HttpRequestMethod::Get, Scheme::Https, "/page", "utm_source=x")
                .unwrap();
        assert_eq!(key, expected);
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(path in "/[a-z0-9/_-]{0,32}", query in "[a-z0-9=&_]{0,24}") {
            let a = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, &path, &query);
            let b = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, &path, &query);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_distinct_queries_yield_distinct_keys(
            path in "/[a-z0-9/]{0,16}",
            q1 in "[a-z0-9=&_]{0,16}",
            q2 in "[a-z0-9=&_]{0,16}",
        ) {
            prop_assume!(q1 != q2);
            let a = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, &path, &q1);
            let b = CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, &path, &q2);
            prop_assert_ne!(a, b);
        }
    }
}
