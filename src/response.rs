// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::{param::*, request::Request, util::HtmlBuilder};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    headers: Vec<(String, String)>,
    content_length: u64,
    date: DateTime<Utc>,
    server_name: String,
    content: Option<Bytes>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            headers: vec![],
            content_length: 0,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            content: None,
        }
    }

    /// 由状态码构造带 HTML 说明页的响应
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let content = HtmlBuilder::from_status_code(code, note).build();
        Self::new()
            .set_code(code)
            .set_header("Content-Type", HTML_CONTENT_TYPE)
            .set_header("Cache-Control", "no-store")
            .set_content(Bytes::from(content))
            .to_owned()
    }

    /// `304 Not Modified`：回显 ETag（已加引号的响应头值），不携带正文
    pub fn not_modified(etag: &str) -> Self {
        Self::new().set_code(304).set_header("ETag", etag).to_owned()
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                debug!("未知的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    /// 设置响应头，同名（大小写不敏感）的旧值会被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 追加响应头，不替换同名旧值（如多个 `Set-Cookie`）
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    pub fn set_content(&mut self, content: Bytes) -> &mut Self {
        self.content_length = content.len() as u64;
        self.content = Some(content);
        self
    }

    /// 丢弃正文但保留 `Content-Length`，用于 HEAD 请求
    pub fn strip_body(&mut self) -> &mut Self {
        self.content = None;
        self
    }

    /// 按客户端的 `Accept-Encoding` 压缩正文。压缩失败时返回未压缩内容。
    pub fn compress_for(&mut self, request: &Request, id: u128) -> &mut Self {
        self.set_header("Vary", "Accept-Encoding");
        let encoding = match decide_encoding(request.accept_encoding()) {
            Some(e) => e,
            None => return self,
        };
        let original = match &self.content {
            Some(c) if !c.is_empty() => c.clone(),
            _ => return self,
        };
        match compress(original.to_vec(), Some(encoding)) {
            Ok(compressed) => {
                debug!(
                    "[ID{}]使用{}压缩正文: {} bytes -> {} bytes",
                    id,
                    encoding,
                    original.len(),
                    compressed.len()
                );
                self.set_header("Content-Encoding", &encoding.to_string());
                self.set_content(Bytes::from(compressed));
                // 压缩后的表示与原文字节不同，只能作为弱校验器
                if let Some(etag) = self.header("ETag").filter(|e| !e.starts_with("W/")) {
                    let weak = format!("W/{}", etag);
                    self.set_header("ETag", &weak);
                }
            }
            Err(e) => {
                error!("[ID{}]压缩正文失败: {}，返回未压缩内容", id, e);
            }
        }
        self
    }

    pub fn response_400(id: u128) -> Self {
        debug!("[ID{}]构造400响应", id);
        Self::from_status_code(400, None)
    }

    pub fn response_500(id: u128) -> Self {
        debug!("[ID{}]构造500响应", id);
        Self::from_status_code(500, Some(r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let mut header = [
            version,
            " ",
            &self.status_code.to_string(),
            " ",
            &self.information,
            CRLF,
        ]
        .concat();
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value.as_str(), CRLF].concat());
        }
        // 1xx/204/304 不携带 Content-Length
        if !(self.status_code < 200 || self.status_code == 204 || self.status_code == 304) {
            header.push_str(&["Content-Length: ", &self.content_length.to_string(), CRLF].concat());
        }
        header.push_str(&["Date: ", &format_http_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        header.push_str(CRLF);
        [
            header.as_bytes(),
            match &self.content {
                Some(c) => c.as_ref(),
                None => b"".as_slice(),
            },
        ]
        .concat()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    /// 按名称（大小写不敏感）获取响应头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &Vec<(String, String)> {
        &self.headers
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn get_content_length(&self) -> u64 {
        self.content_length
    }
}

/// IMF-fixdate 格式（`Sun, 06 Nov 1994 08:49:37 GMT`），用于 `Date` 与 `Expires`
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// ETag 在响应头中以强校验器形式出现
pub fn quote_etag(etag: &str) -> String {
    format!("\"{}\"", etag)
}

/// 弱校验器形式，用于经过压缩的表示
pub fn weak_etag(etag: &str) -> String {
    format!("W/{}", quote_etag(etag))
}

/// 判断 `If-None-Match` 是否与给定 ETag 匹配（弱比较）。
///
/// 支持逗号分隔的多个值、弱校验器 `W/` 以及通配符 `*`。
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').any(|candidate| {
        let candidate = candidate.trim();
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate.trim_matches('"') == etag
    })
}

pub fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    }
}

/// 页面正文的编码选择：br 优先，其次 gzip，最后 deflate
pub fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Br, HttpEncoding::Gzip, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}
