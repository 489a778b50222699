// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 渲染能力
//!
//! 页面缓存之外的完整动态渲染管线，对缓存层而言是不透明的：
//! 输入请求描述，输出 `(状态码, 响应头, 正文)`。

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

use bytes::Bytes;
use log::{debug, error, warn};

use crate::{
    exception::Exception,
    param::{Scheme, SERVER_NAME},
    request::Request,
};

/// 渲染结果
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// 渲染过程中是否已有响应头被提前发送（此时捕获的正文不可信，不能缓存）
    pub headers_sent: bool,
}

impl RenderOutput {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: vec![],
            body: body.into(),
            headers_sent: false,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 只有明确成功（200 且未提前发送响应头）的结果才允许写入缓存
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && !self.headers_sent
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 渲染能力。实现者可能阻塞（数据库、模板展开等），调用方不设超时。
#[cfg_attr(test, mockall::automock)]
pub trait Render: Send + Sync {
    fn render(&self, request: &Request) -> Result<RenderOutput, Exception>;
}

/// 把闭包包装为渲染能力
pub struct RenderFn<F>(F);

impl<F> RenderFn<F>
where
    F: Fn(&Request) -> Result<RenderOutput, Exception> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Render for RenderFn<F>
where
    F: Fn(&Request) -> Result<RenderOutput, Exception> + Send + Sync,
{
    fn render(&self, request: &Request) -> Result<RenderOutput, Exception> {
        (self.0)(request)
    }
}

/// 通过 `php-cgi` 执行前端控制器的渲染能力
pub struct PhpRenderer {
    php_binary: String,
    document_root: PathBuf,
    script: PathBuf,
}

impl PhpRenderer {
    pub fn new(php_binary: &str, document_root: impl Into<PathBuf>, front_controller: &str) -> Self {
        let document_root = document_root.into();
        let script = document_root.join(front_controller);
        Self {
            php_binary: php_binary.to_string(),
            document_root,
            script,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// 构造 CGI/1.1 环境变量
    fn cgi_env(&self, request: &Request) -> Vec<(String, String)> {
        let mut env = vec![
            ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
            ("SERVER_SOFTWARE".to_string(), SERVER_NAME.to_string()),
            ("SERVER_PROTOCOL".to_string(), format!("HTTP/{}", request.version())),
            ("REQUEST_METHOD".to_string(), request.method().to_string()),
            ("REQUEST_URI".to_string(), request.target()),
            ("QUERY_STRING".to_string(), request.query().to_string()),
            ("SCRIPT_FILENAME".to_string(), self.script.to_string_lossy().to_string()),
            ("DOCUMENT_ROOT".to_string(), self.document_root.to_string_lossy().to_string()),
            ("REDIRECT_STATUS".to_string(), "200".to_string()),
        ];
        if request.scheme() == Scheme::Https {
            env.push(("HTTPS".to_string(), "on".to_string()));
        }
        if !request.body().is_empty() || request.header("content-length").is_some() {
            env.push(("CONTENT_LENGTH".to_string(), request.body().len().to_string()));
        }
        if let Some(content_type) = request.header("content-type") {
            env.push(("CONTENT_TYPE".to_string(), content_type.to_string()));
        }
        for (name, value) in request.headers() {
            // 这两个头已经以 CGI 元变量的形式传递
            if name == "content-length" || name == "content-type" {
                continue;
            }
            let var = format!("HTTP_{}", name.to_uppercase().replace('-', "_"));
            env.push((var, value.clone()));
        }
        env
    }
}

impl Render for PhpRenderer {
    fn render(&self, request: &Request) -> Result<RenderOutput, Exception> {
        debug!("调用{}渲染{}", self.php_binary, request.target());
        let mut child = Command::new(&self.php_binary)
            .envs(self.cgi_env(request))
            .current_dir(&self.document_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("无法启动PHP解释器{}：{}", self.php_binary, e);
                Exception::RenderFailed
            })?;

        // 请求体在单独的线程中写入，避免子进程输出填满管道时互相等待
        let feeder = child.stdin.take().map(|mut stdin| {
            let body = request.body().clone();
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(&body) {
                    warn!("向PHP解释器写入请求体失败：{}", e);
                }
            })
        });
        let output = child.wait_with_output().map_err(|e| {
            error!("等待PHP解释器输出失败：{}", e);
            Exception::RenderFailed
        })?;
        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }

        if !output.status.success() && output.stdout.is_empty() {
            error!(
                "PHP解释器出错：{}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(Exception::RenderFailed);
        }
        Ok(parse_cgi_output(&output.stdout))
    }
}

/// 解析 CGI 输出：头部块（`Status:` 行与普通响应头）+ 空行 + 正文
pub fn parse_cgi_output(raw: &[u8]) -> RenderOutput {
    let (head_len, sep_len) = match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(p) => (p, 4),
        None => match raw.windows(2).position(|w| w == b"\n\n") {
            Some(p) => (p, 2),
            None => return RenderOutput::ok(Bytes::copy_from_slice(raw)),
        },
    };

    let head = String::from_utf8_lossy(&raw[..head_len]);
    let mut output = RenderOutput::ok(Bytes::copy_from_slice(&raw[head_len + sep_len..]));
    let mut explicit_status = false;
    for line in head.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("status") {
            if let Some(code) = value.split_whitespace().next().and_then(|c| c.parse().ok()) {
                output.status = code;
                explicit_status = true;
            }
        } else {
            output.headers.push((name.to_string(), value.to_string()));
        }
    }
    if !explicit_status && output.header("location").is_some() {
        output.status = 302;
    }
    output
}
