// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_www_root")]
    www_root: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default = "default_cache_dir")]
    cache_dir: String,
    #[serde(default = "default_asset_cache_size")]
    asset_cache_size: usize,
    #[serde(default = "default_asset_cache_threshold")]
    asset_cache_threshold: u64,
    #[serde(default = "default_php_binary")]
    php_binary: String,
    #[serde(default = "default_front_controller")]
    front_controller: String,
    #[serde(default = "default_true")]
    compress_pages: bool,
    #[serde(default)]
    trust_forwarded_proto: bool,
    #[serde(default)]
    https: bool,
    #[serde(default = "default_admin_prefix")]
    admin_prefix: String,
    #[serde(default = "default_login_cookie_prefix")]
    login_cookie_prefix: String,
    #[serde(default = "default_ajax_path")]
    ajax_path: String,
    #[serde(default = "default_cron_path")]
    cron_path: String,
}

fn default_www_root() -> String {
    "www".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_local() -> bool {
    true
}

fn default_cache_dir() -> String {
    "cache/pages".to_string()
}

fn default_asset_cache_size() -> usize {
    64
}

fn default_asset_cache_threshold() -> u64 {
    1048576 // 1MB
}

fn default_php_binary() -> String {
    "php-cgi".to_string()
}

fn default_front_controller() -> String {
    "index.php".to_string()
}

fn default_true() -> bool {
    true
}

fn default_admin_prefix() -> String {
    "/wp-admin".to_string()
}

fn default_login_cookie_prefix() -> String {
    "wordpress_logged_in_".to_string()
}

fn default_ajax_path() -> String {
    "/wp-admin/admin-ajax.php".to_string()
}

fn default_cron_path() -> String {
    "/wp-cron.php".to_string()
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: default_www_root(),
            port: default_port(),
            worker_threads: 0,
            local: default_local(),
            cache_dir: default_cache_dir(),
            asset_cache_size: default_asset_cache_size(),
            asset_cache_threshold: default_asset_cache_threshold(),
            php_binary: default_php_binary(),
            front_controller: default_front_controller(),
            compress_pages: true,
            trust_forwarded_proto: false,
            https: false,
            admin_prefix: default_admin_prefix(),
            login_cookie_prefix: default_login_cookie_prefix(),
            ajax_path: default_ajax_path(),
            cron_path: default_cron_path(),
        }
    }

    /// 从 TOML 文件读取配置，并修正不合理的取值
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename).map_err(|e| {
            error!("无法打开配置文件{}：{}", filename, e);
            Exception::ConfigUnreadable
        })?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val).map_err(|e| {
            error!("无法读取配置文件{}：{}", filename, e);
            Exception::ConfigUnreadable
        })?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Exception> {
        let mut raw_config: Config = toml::from_str(content).map_err(|e| {
            error!("无法成功从配置文件构建配置对象：{}", e);
            Exception::ConfigInvalid
        })?;
        raw_config.normalize();
        Ok(raw_config)
    }

    /// 读取配置文件，失败时退回默认配置
    pub fn load_or_default(filename: &str) -> Self {
        match Self::from_toml(filename) {
            Ok(c) => c,
            Err(e) => {
                warn!("{}，使用默认配置", e);
                let mut config = Config::new();
                config.normalize();
                config
            }
        }
    }

    fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.asset_cache_size == 0 {
            warn!("asset_cache_size被设置为0，但目前尚不支持禁用资源缓存，因此该值将被改为5。");
            self.asset_cache_size = 5;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    pub fn asset_cache_size(&self) -> usize {
        self.asset_cache_size
    }

    pub fn asset_cache_threshold(&self) -> u64 {
        self.asset_cache_threshold
    }

    pub fn php_binary(&self) -> &str {
        &self.php_binary
    }

    pub fn front_controller(&self) -> &str {
        &self.front_controller
    }

    pub fn compress_pages(&self) -> bool {
        self.compress_pages
    }

    pub fn trust_forwarded_proto(&self) -> bool {
        self.trust_forwarded_proto
    }

    pub fn https(&self) -> bool {
        self.https
    }

    pub fn admin_prefix(&self) -> &str {
        &self.admin_prefix
    }

    pub fn login_cookie_prefix(&self) -> &str {
        &self.login_cookie_prefix
    }

    pub fn ajax_path(&self) -> &str {
        &self.ajax_path
    }

    pub fn cron_path(&self) -> &str {
        &self.cron_path
    }
}
