// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 页面缓存资格判断
//!
//! 合格请求：`GET` 方法、匿名前台上下文（非管理后台/已登录/AJAX/定时任务），
//! 且查询字符串为空或只包含追踪参数。

use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    param::{HttpRequestMethod, TRACKING_PARAMS},
    request::Request,
};

lazy_static! {
    /// 单个查询参数的名称必须完整匹配追踪参数白名单
    static ref TRACKING_PARAM: Regex = {
        let names: Vec<String> = TRACKING_PARAMS
            .iter()
            .map(|p| match p.ends_with('_') {
                true => format!("{}[^=&]*", regex::escape(p)),
                false => regex::escape(p),
            })
            .collect();
        Regex::new(&format!("(?i)^(?:{})(?:=.*)?$", names.join("|")))
            .expect("追踪参数正则表达式无效")
    };
}

/// 查询字符串是否允许被缓存：为空，或每个参数都是追踪参数
pub fn query_is_cacheable(query: &str) -> bool {
    query.is_empty()
        || query
            .split('&')
            .filter(|p| !p.is_empty())
            .all(|param| TRACKING_PARAM.is_match(param))
}

/// 请求是否可以参与页面缓存
pub fn is_eligible(request: &Request) -> bool {
    request.method() == HttpRequestMethod::Get
        && request.context().is_anonymous_frontend()
        && query_is_cacheable(request.query())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestContext;

    #[test]
    fn test_empty_query_is_cacheable() {
        assert!(query_is_cacheable(""));
    }

    #[test]
    fn test_tracking_params_are_cacheable() {
        assert!(query_is_cacheable("utm_source=x"));
        assert!(query_is_cacheable("utm_source=x&utm_medium=email&utm_campaign=spring"));
        assert!(query_is_cacheable("ref=twitter"));
        assert!(query_is_cacheable("fbclid=IwAR0abc"));
        assert!(query_is_cacheable("gclid=Cj0KCQ"));
        assert!(query_is_cacheable("UTM_SOURCE=x"));
        assert!(query_is_cacheable("utm_source=x&"));
    }

    #[test]
    fn test_other_params_disqualify() {
        assert!(!query_is_cacheable("p=123"));
        assert!(!query_is_cacheable("s=search+term"));
        assert!(!query_is_cacheable("utm_source=x&page=2"));
        assert!(!query_is_cacheable("referrer=x"));
        assert!(!query_is_cacheable("gclidx=1"));
        assert!(!query_is_cacheable("preview=true&utm_source=x"));
    }

    #[test]
    fn test_method_must_be_get() {
        assert!(is_eligible(&Request::get("/")));
        assert!(!is_eligible(&Request::new(HttpRequestMethod::Head, "/")));
        assert!(!is_eligible(&Request::new(HttpRequestMethod::Post, "/")));
    }

    #[test]
    fn test_non_anonymous_contexts_bypass() {
        let contexts = [
            RequestContext { admin: true, ..Default::default() },
            RequestContext { authenticated: true, ..Default::default() },
            RequestContext { ajax: true, ..Default::default() },
            RequestContext { cron: true, ..Default::default() },
        ];
        for context in contexts {
            assert!(!is_eligible(&Request::get("/").with_context(context)));
        }
    }

    #[test]
    fn test_query_is_considered() {
        assert!(is_eligible(&Request::get("/page?utm_source=x")));
        assert!(!is_eligible(&Request::get("/page?p=42")));
    }
}
