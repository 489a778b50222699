// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod assets;
pub mod cache;
pub mod config;
pub mod exception;
pub mod invalidation;
pub mod key;
pub mod negotiator;
pub mod param;
pub mod policy;
pub mod render;
pub mod request;
pub mod response;
pub mod store;
pub mod util;

pub use assets::{AssetServer, StaticAssetDescriptor};
pub use cache::FileCache;
pub use config::Config;
pub use exception::Exception;
pub use invalidation::{ContentEvent, EventBus, Invalidator};
pub use key::CacheKey;
pub use negotiator::{CacheOutcome, Negotiator};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion, Scheme};
pub use render::{PhpRenderer, Render, RenderFn, RenderOutput};
pub use request::{Request, RequestContext};
pub use response::Response;
pub use store::{CachedEntry, PageStore};
pub use util::HtmlBuilder;
