// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求描述模块
//!
//! 该模块把 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体，
//! 作为"收集请求事实"与"决策/响应"之间的显式边界。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询字符串、版本）。
//! 2. 全部请求头的提取（名称统一为小写）。
//! 3. 内容协商（Content Negotiation）相关的编码解析。
//! 4. 请求上下文（管理后台 / 已登录 / AJAX / 定时任务）的识别。

use crate::{config::Config, exception::Exception, param::*};
use bytes::Bytes;
use log::error;
use std::collections::HashMap;

/// 请求所处的执行上下文，仅用于页面缓存的资格判断。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// 管理后台请求
    pub admin: bool,
    /// 已登录（携带会话凭据）的请求
    pub authenticated: bool,
    /// AJAX 请求
    pub ajax: bool,
    /// 定时任务请求
    pub cron: bool,
}

impl RequestContext {
    /// 是否为匿名的普通前台请求
    pub fn is_anonymous_frontend(&self) -> bool {
        !(self.admin || self.authenticated || self.ajax || self.cron)
    }
}

/// 表示一个完整的 HTTP 请求描述。
///
/// 除路由与缓存决策需要的事实外，还携带 `Content-Length` 声明的请求体，供渲染能力使用。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（不含查询字符串）
    path: String,
    /// 原始查询字符串（不含 `?`），可能为空
    query: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 请求所使用的协议类型
    scheme: Scheme,
    /// 全部请求头，名称为小写
    headers: HashMap<String, String>,
    /// 客户端支持的压缩编码列表（按出现顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 请求上下文
    context: RequestContext,
    /// 请求体，可能尚未读取完整
    body: Bytes,
}

impl Request {
    /// 以编程方式构造请求描述，`target` 可以包含查询字符串。
    pub fn new(method: HttpRequestMethod, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            query,
            version: HttpVersion::V1_1,
            scheme: Scheme::Http,
            headers: HashMap::new(),
            accept_encoding: vec![],
            context: RequestContext::default(),
            body: Bytes::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(HttpRequestMethod::Get, target)
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// 添加（或覆盖）一个请求头。`Accept-Encoding` 会同时被解析为编码列表。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn insert_header(&mut self, name: &str, value: &str) {
        let name = name.trim().to_lowercase();
        let value = value.trim().to_string();
        if name == "accept-encoding" {
            self.accept_encoding = parse_accept_encoding(&value);
        }
        self.headers.insert(name, value);
    }

    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求头部分是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、路径、查询字符串和协议版本。
    /// 3. 逐行解析请求头，直到遇到空行。
    /// 4. 空行之后已读到的字节作为请求体，最多取 `Content-Length` 字节。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 只解析头部，请求体不需要是 UTF-8
        let head_len = find_head_end(buffer).unwrap_or(buffer.len());
        let head = &buffer[..head_len];
        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string.trim_end_matches('\0'),
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);

        // 解析请求行 (e.g., "GET /index.html?utm_source=x HTTP/1.1")
        let first_line = request_lines.next().unwrap_or("");
        let first_line_parts: Vec<&str> = first_line.split(' ').filter(|s| !s.is_empty()).collect();
        if first_line_parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::MalformedRequest);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "PATCH" => HttpRequestMethod::Patch,
            "DELETE" => HttpRequestMethod::Delete,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[2].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let target = first_line_parts[1];
        if !target.starts_with('/') {
            error!("[ID{}]请求目标不是origin-form：{}", id, target);
            return Err(Exception::MalformedRequest);
        }

        let mut request = Self::new(method, target);
        request.version = version;

        for line in request_lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => request.insert_header(name, value),
                None => {
                    error!("[ID{}]无法解析请求头：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        let declared = request.content_length().map_err(|e| {
            error!("[ID{}]Content-Length不合法：{:?}", id, request.header("content-length"));
            e
        })?;
        if head_len + 4 <= buffer.len() {
            let rest = &buffer[head_len + 4..];
            request.body = Bytes::copy_from_slice(&rest[..rest.len().min(declared)]);
        }

        Ok(request)
    }

    /// 根据站点配置确定协议类型与请求上下文。
    ///
    /// 协议类型只有在配置信任反向代理时才读取 `X-Forwarded-Proto`。
    pub fn classify(&mut self, config: &Config) {
        let forwarded = match config.trust_forwarded_proto() {
            true => self.header("x-forwarded-proto").map(|p| p.eq_ignore_ascii_case("https")),
            false => None,
        };
        self.scheme = match forwarded.unwrap_or(config.https()) {
            true => Scheme::Https,
            false => Scheme::Http,
        };

        let admin_prefix = config.admin_prefix();
        let login_prefix = config.login_cookie_prefix();
        let authenticated = self.header("authorization").is_some()
            || (!login_prefix.is_empty()
                && self.header("cookie").map_or(false, |cookies| {
                    cookies
                        .split(';')
                        .any(|c| c.trim_start().starts_with(login_prefix))
                }));
        let ajax = self.path == config.ajax_path()
            || self
                .header("x-requested-with")
                .map_or(false, |v| v.eq_ignore_ascii_case("XMLHttpRequest"));

        self.context = RequestContext {
            admin: !admin_prefix.is_empty() && self.path.starts_with(admin_prefix),
            authenticated,
            ajax,
            cron: self.path == config.cron_path(),
        };
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取原始查询字符串（不含 `?`）
    pub fn query(&self) -> &str {
        &self.query
    }

    /// 获取完整的请求目标（路径 + 查询字符串）
    pub fn target(&self) -> String {
        match self.query.is_empty() {
            true => self.path.clone(),
            false => format!("{}?{}", self.path, self.query),
        }
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn context(&self) -> RequestContext {
        self.context
    }

    /// 按名称（大小写不敏感）获取请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    pub fn accepts(&self, encoding: HttpEncoding) -> bool {
        self.accept_encoding.contains(&encoding)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// `Content-Length` 声明的请求体长度，未声明时为 0
    pub fn content_length(&self) -> Result<usize, Exception> {
        match self.header("content-length") {
            Some(value) => value.parse().map_err(|_| Exception::MalformedRequest),
            None => Ok(0),
        }
    }

    /// 获取条件请求头 `If-None-Match`
    pub fn if_none_match(&self) -> Option<&str> {
        self.header("if-none-match")
    }
}

fn split_target(target: &str) -> (String, String) {
    let target = target.split('#').next().unwrap_or("");
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.to_string(), String::new()),
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

/// 解析 `Accept-Encoding`，忽略 `q=0` 的项
fn parse_accept_encoding(value: &str) -> Vec<HttpEncoding> {
    let mut encodings = vec![];
    for item in value.split(',') {
        let mut parts = item.split(';');
        let token = parts.next().unwrap_or("").trim().to_lowercase();
        let refused = parts.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .map_or(false, |q| q <= 0.0)
        });
        if refused {
            continue;
        }
        let encoding = match token.as_str() {
            "gzip" | "x-gzip" => HttpEncoding::Gzip,
            "deflate" => HttpEncoding::Deflate,
            "br" => HttpEncoding::Br,
            _ => continue,
        };
        if !encodings.contains(&encoding) {
            encodings.push(encoding);
        }
    }
    encodings
}
