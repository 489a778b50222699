// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 页面缓存协商
//!
//! 每个未被静态资源处理的请求都经过这里：
//!
//! - 不合格请求：直接调用渲染能力，原样返回，不接触缓存
//! - 合格且命中新鲜条目：比对 `If-None-Match`，匹配返回 `304`，否则返回缓存正文与 `X-Cache: HIT`
//! - 合格但未命中：渲染，成功（200 且未提前发送响应头）时写回缓存并返回 `X-Cache: MISS`
//! - 渲染结果不是 200，或已自行压缩（`Content-Encoding` 非 identity）：原样透传，永不缓存

use std::{fmt, time::SystemTime};

use bytes::Bytes;
use log::{debug, error};

use crate::{
    key::CacheKey,
    param::{HTML_CONTENT_TYPE, PAGE_CACHE_CONTROL},
    policy,
    render::{Render, RenderOutput},
    request::Request,
    response::{decide_encoding, etag_matches, quote_etag, weak_etag, Response},
    store::{etag_of, PageStore},
};

/// 页面缓存响应自行设置的响应头，渲染结果中的同名头不再转发
const PAGE_HEADERS: [&str; 8] = [
    "Content-Type",
    "Content-Encoding",
    "Cache-Control",
    "Vary",
    "X-Content-Type-Options",
    "X-Frame-Options",
    "X-Cache",
    "ETag",
];

/// 一次协商的结果，用于日志与测试
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Bypass,
    NotModified,
    Hit,
    Miss,
    Uncacheable,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CacheOutcome::Bypass => "BYPASS",
            CacheOutcome::NotModified => "NOT_MODIFIED",
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
            CacheOutcome::Uncacheable => "UNCACHEABLE",
        };
        write!(f, "{}", s)
    }
}

pub struct Negotiator {
    store: PageStore,
    compress_pages: bool,
}

impl Negotiator {
    pub fn new(store: PageStore) -> Self {
        Self {
            store,
            compress_pages: true,
        }
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_pages = enabled;
        self
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn respond(&self, request: &Request, renderer: &dyn Render, id: u128) -> (Response, CacheOutcome) {
        self.respond_at(request, renderer, id, SystemTime::now())
    }

    /// 以 `now` 作为当前时间进行协商
    pub fn respond_at(
        &self,
        request: &Request,
        renderer: &dyn Render,
        id: u128,
        now: SystemTime,
    ) -> (Response, CacheOutcome) {
        let key = match policy::is_eligible(request)
            .then(|| CacheKey::for_request(request))
            .flatten()
        {
            Some(key) => key,
            None => {
                debug!("[ID{}]请求不满足页面缓存条件，直接渲染", id);
                return (self.render_verbatim(request, renderer, id), CacheOutcome::Bypass);
            }
        };

        if let Some(entry) = self.store.get_at(&key, now) {
            if let Some(inm) = request.if_none_match() {
                if etag_matches(inm, entry.etag()) {
                    debug!("[ID{}]页面缓存命中且ETag匹配，返回304", id);
                    let response = self.not_modified(entry.etag(), entry.body(), request);
                    return (response, CacheOutcome::NotModified);
                }
            }
            debug!("[ID{}]页面缓存命中：{}", id, key);
            let mut response =
                self.page_response(entry.body().clone(), entry.etag(), "HIT", entry.content_type());
            self.compress(&mut response, request, id);
            return (response, CacheOutcome::Hit);
        }

        debug!("[ID{}]页面缓存未命中：{}，调用渲染", id, key);
        let output = match renderer.render(request) {
            Ok(output) => output,
            Err(e) => {
                error!("[ID{}]渲染失败：{}", id, e);
                return (Response::response_500(id), CacheOutcome::Uncacheable);
            }
        };
        if !output.is_cacheable() {
            debug!(
                "[ID{}]渲染结果不可缓存（状态码{}，响应头已发送：{}），原样返回",
                id, output.status, output.headers_sent
            );
            return (passthrough(output), CacheOutcome::Uncacheable);
        }
        // 正文已被编码，缓存后命中时无法还原同样的响应头
        if let Some(encoding) = output
            .header("content-encoding")
            .filter(|e| !e.trim().eq_ignore_ascii_case("identity"))
        {
            debug!("[ID{}]渲染结果已使用{}编码，原样返回且不缓存", id, encoding);
            return (passthrough(output), CacheOutcome::Uncacheable);
        }

        let content_type = output.header("content-type").map(str::to_string);
        let etag = match self
            .store
            .put_page_at(&key, output.body.clone(), content_type.as_deref(), now)
        {
            Ok(entry) => entry.etag().to_string(),
            Err(e) => {
                error!("[ID{}]写入页面缓存失败：{}，本次响应不受影响", id, e);
                etag_of(&output.body)
            }
        };
        let mut response = self.page_response(output.body.clone(), &etag, "MISS", content_type.as_deref());
        for (name, value) in forwardable(&output.headers) {
            if !PAGE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                response.append_header(name, value);
            }
        }
        self.compress(&mut response, request, id);
        (response, CacheOutcome::Miss)
    }

    /// 不合格请求：渲染结果原样返回；渲染失败时返回500
    fn render_verbatim(&self, request: &Request, renderer: &dyn Render, id: u128) -> Response {
        match renderer.render(request) {
            Ok(output) => passthrough(output),
            Err(e) => {
                error!("[ID{}]渲染失败：{}", id, e);
                Response::response_500(id)
            }
        }
    }

    /// HIT 与 MISS 共用的响应头
    fn page_response(&self, body: Bytes, etag: &str, x_cache: &str, content_type: Option<&str>) -> Response {
        Response::new()
            .set_header("Content-Type", content_type.unwrap_or(HTML_CONTENT_TYPE))
            .set_header("Cache-Control", PAGE_CACHE_CONTROL)
            .set_header("Vary", "Accept-Encoding")
            .set_header("X-Content-Type-Options", "nosniff")
            .set_header("X-Frame-Options", "SAMEORIGIN")
            .set_header("X-Cache", x_cache)
            .set_header("ETag", &quote_etag(etag))
            .set_content(body)
            .to_owned()
    }

    /// `304` 携带与 `200` 相同的 `Cache-Control`、`Vary` 与 ETag
    fn not_modified(&self, etag: &str, body: &Bytes, request: &Request) -> Response {
        let compressed = self.compress_pages
            && !body.is_empty()
            && decide_encoding(request.accept_encoding()).is_some();
        let etag = match compressed {
            true => weak_etag(etag),
            false => quote_etag(etag),
        };
        Response::not_modified(&etag)
            .set_header("Cache-Control", PAGE_CACHE_CONTROL)
            .set_header("Vary", "Accept-Encoding")
            .to_owned()
    }

    fn compress(&self, response: &mut Response, request: &Request, id: u128) {
        if self.compress_pages {
            response.compress_for(request, id);
        }
    }
}

/// 渲染结果中可以转发给客户端的响应头，长度与分块相关的头由服务端重新生成
fn forwardable(headers: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .filter(|(n, _)| {
            !n.eq_ignore_ascii_case("content-length") && !n.eq_ignore_ascii_case("transfer-encoding")
        })
        .map(|(n, v)| (n.as_str(), v.as_str()))
}

/// 把渲染结果原样转成响应
fn passthrough(output: RenderOutput) -> Response {
    let mut response = Response::new();
    response.set_code(output.status);
    for (name, value) in forwardable(&output.headers) {
        response.append_header(name, value);
    }
    response.set_content(output.body);
    response
}
