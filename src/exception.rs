// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了缓存服务器在请求处理生命周期中可能出现的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：协议解析、配置、页面缓存、渲染以及事件名称的错误。
//! - **语义映射**：每个变体都对应特定的处理策略。缓存相关的错误从不返回给客户端，
//!   只会被记录并降级为缓存未命中；渲染错误会被转化为 `500` 响应。
//! - **可记录**：底层 `io::Error` 的细节在出错位置即被写入日志，枚举本身保持 `Copy`。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或请求头格式不正确。
    MalformedRequest,
    /// 客户端使用了服务器不认识的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 配置文件无法读取。
    ConfigUnreadable,
    /// 配置文件内容无法解析。
    ConfigInvalid,
    /// 缓存条目存在但无法读取。
    CacheReadFailed,
    /// 缓存条目的元数据与正文不一致（截断、损坏或 ETag 不匹配）。
    CacheCorrupted,
    /// 写入缓存条目失败（磁盘已满、权限不足等）。
    CacheWriteFailed,
    /// 清空缓存目录失败。
    CachePurgeFailed,
    /// 渲染能力执行失败（进程无法启动或输出无法解析）。
    RenderFailed,
    /// 无法识别的内容变更事件名称。
    UnknownEvent,
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            ConfigUnreadable => write!(f, "Couldn't read configuration file"),
            ConfigInvalid => write!(f, "Configuration file is invalid"),
            CacheReadFailed => write!(f, "Couldn't read cache entry"),
            CacheCorrupted => write!(f, "Cache entry is corrupted"),
            CacheWriteFailed => write!(f, "Couldn't write cache entry"),
            CachePurgeFailed => write!(f, "Couldn't purge page cache"),
            RenderFailed => write!(f, "Render capability failed"),
            UnknownEvent => write!(f, "Unknown content event"),
        }
    }
}

impl std::error::Error for Exception {}
