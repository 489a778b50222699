// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 缓存失效
//!
//! 任何可能改变渲染结果的内容变更事件都会同步清空整个页面缓存。
//! 不做按键失效：无法追踪哪些缓存页面嵌入了某条内容。

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};

use crate::{exception::Exception, store::PageStore};

/// 内容变更事件
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ContentEvent {
    /// 内容被创建或更新
    ContentSaved,
    /// 内容被删除
    ContentDeleted,
    /// 切换了主题
    ThemeSwitched,
    /// 全站自定义设置已提交
    CustomizationSaved,
}

impl ContentEvent {
    pub const ALL: [ContentEvent; 4] = [
        ContentEvent::ContentSaved,
        ContentEvent::ContentDeleted,
        ContentEvent::ThemeSwitched,
        ContentEvent::CustomizationSaved,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ContentEvent::ContentSaved => "content_saved",
            ContentEvent::ContentDeleted => "content_deleted",
            ContentEvent::ThemeSwitched => "theme_switched",
            ContentEvent::CustomizationSaved => "customization_saved",
        }
    }
}

impl fmt::Display for ContentEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ContentEvent {
    type Err = Exception;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content_saved" | "content_updated" => Ok(ContentEvent::ContentSaved),
            "content_deleted" => Ok(ContentEvent::ContentDeleted),
            "theme_switched" => Ok(ContentEvent::ThemeSwitched),
            "customization_saved" => Ok(ContentEvent::CustomizationSaved),
            _ => Err(Exception::UnknownEvent),
        }
    }
}

type Handler = Arc<dyn Fn(&ContentEvent) + Send + Sync>;

/// 同步事件总线：`publish` 返回前所有订阅者都已执行完毕。
///
/// 订阅者在锁外执行，可以在回调中再次订阅或发布。
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&ContentEvent) + Send + Sync + 'static,
    {
        let mut handlers = match self.handlers.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.push(Arc::new(handler));
    }

    /// 发布事件，返回收到事件的订阅者数量
    pub fn publish(&self, event: ContentEvent) -> usize {
        let handlers: Vec<Handler> = match self.handlers.lock() {
            Ok(lock) => lock.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        debug!("发布内容变更事件：{}，订阅者{}个", event, handlers.len());
        for handler in handlers.iter() {
            handler(&event);
        }
        handlers.len()
    }
}

/// 收到内容变更事件时清空页面缓存
#[derive(Debug, Clone)]
pub struct Invalidator {
    store: PageStore,
}

impl Invalidator {
    pub fn new(store: PageStore) -> Self {
        Self { store }
    }

    /// 处理一个事件，返回被删除的条目数。清空失败只记录日志，不影响触发方。
    pub fn handle(&self, event: &ContentEvent) -> usize {
        match self.store.purge_all() {
            Ok(removed) => {
                info!("内容变更事件{}：已清空页面缓存，删除{}个条目", event, removed);
                removed
            }
            Err(e) => {
                warn!("内容变更事件{}：清空页面缓存失败：{}", event, e);
                0
            }
        }
    }

    /// 订阅总线上的全部事件
    pub fn subscribe(self, bus: &EventBus) {
        bus.subscribe(move |event| {
            self.handle(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKey;
    use crate::param::{HttpRequestMethod, Scheme};
    use bytes::Bytes;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tempfile::TempDir;

    fn key(path: &str) -> CacheKey {
        CacheKey::derive(HttpRequestMethod::Get, Scheme::Http, path, "").unwrap()
    }

    #[test]
    fn test_event_names() {
        for event in ContentEvent::ALL {
            assert_eq!(event.name().parse::<ContentEvent>(), Ok(event));
            assert_eq!(event.to_string(), event.name());
        }
        assert_eq!("content_updated".parse(), Ok(ContentEvent::ContentSaved));
        assert_eq!(" Theme_Switched\n".parse(), Ok(ContentEvent::ThemeSwitched));
        assert_eq!("comment_posted".parse::<ContentEvent>(), Err(Exception::UnknownEvent));
    }

    #[test]
    fn test_bus_delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            bus.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(bus.publish(ContentEvent::ContentSaved), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handlers_may_reenter_the_bus() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let inner_bus = Arc::clone(&bus);
        let inner_seen = Arc::clone(&seen);
        bus.subscribe(move |event| {
            inner_seen.fetch_add(1, Ordering::SeqCst);
            // 主题切换时顺带触发一次自定义设置事件，并追加一个订阅者
            if *event == ContentEvent::ThemeSwitched {
                inner_bus.subscribe(|_| {});
                inner_bus.publish(ContentEvent::CustomizationSaved);
            }
        });

        assert_eq!(bus.publish(ContentEvent::ThemeSwitched), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(bus.publish(ContentEvent::ContentSaved), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        assert_eq!(EventBus::new().publish(ContentEvent::ThemeSwitched), 0);
    }

    #[test]
    fn test_every_event_purges_store() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let bus = EventBus::new();
        Invalidator::new(store.clone()).subscribe(&bus);

        for event in ContentEvent::ALL {
            store.put(&key("/"), Bytes::from("home")).unwrap();
            store.put(&key("/about"), Bytes::from("about")).unwrap();
            assert_eq!(store.entry_count(), 2);

            bus.publish(event);
            assert_eq!(store.entry_count(), 0);
            assert!(store.get(&key("/")).is_none());
        }
    }

    #[test]
    fn test_purge_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let pages = dir.path().join("pages");
        let store = PageStore::open(&pages).unwrap();
        std::fs::remove_dir_all(&pages).unwrap();
        std::fs::write(&pages, b"not a directory").unwrap();

        let invalidator = Invalidator::new(store);
        assert_eq!(invalidator.handle(&ContentEvent::ContentDeleted), 0);
    }
}
