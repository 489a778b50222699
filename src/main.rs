// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 页面缓存前置服务器
//!
//! 基于 Tokio 运行时的多线程服务器，位于动态渲染管线之前：
//! - 静态资源直接从磁盘返回，带长期缓存头与预压缩变体协商
//! - 匿名前台页面经磁盘页面缓存协商，未命中时调用 `php-cgi` 渲染
//! - 后台管理控制台（CLI 指令交互），可查看状态、清空缓存、发布内容变更事件

use cacheserver::{
    AssetServer, CacheOutcome, Config, ContentEvent, EventBus, HttpRequestMethod, Invalidator,
    Negotiator, PageStore, PhpRenderer, Request, Response,
};

use log::{debug, error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
    sync::Notify,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process::Command,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

const CONFIG_FILE: &str = "config/development.toml";
const LOG_CONFIG_FILE: &str = "config/log4rs.yaml";
/// 请求头的最大长度
const MAX_HEAD_SIZE: usize = 16 * 1024;
/// 请求体的最大长度
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// 所有连接共享的服务端状态
struct Server {
    config: Config,
    assets: AssetServer,
    negotiator: Negotiator,
    renderer: PhpRenderer,
    bus: EventBus,
    active_connection: AtomicU32,
}

fn main() {
    init_logging();

    let config = Config::load_or_default(CONFIG_FILE);
    info!("配置文件已载入");
    info!("www root: {}", config.www_root());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            return;
        }
    };
    info!("异步运行时已创建，工作线程{}个", config.worker_threads());

    runtime.block_on(run(config));
}

/// 初始化 log4rs：优先读取 YAML 配置，失败时退回仅输出到控制台的配置
fn init_logging() {
    if log4rs::init_file(LOG_CONFIG_FILE, Default::default()).is_ok() {
        return;
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
        )))
        .build();
    let fallback = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match fallback {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("无法初始化日志系统：{}", e);
            } else {
                warn!("无法读取{}，使用默认日志配置", LOG_CONFIG_FILE);
            }
        }
        Err(e) => eprintln!("无法构建默认日志配置：{}", e),
    }
}

/// 探测 PHP 解释器版本
fn probe_php(binary: &str) {
    match Command::new(binary).arg("-v").output() {
        Ok(o) if o.status.success() => {
            let output = String::from_utf8_lossy(&o.stdout);
            let version = Regex::new(r"PHP (\d+\.\d+\.\d+)")
                .ok()
                .and_then(|re| re.captures(&output))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            match version {
                Some(v) => info!("找到PHP解释器{}，版本：{}", binary, v),
                None => info!("找到PHP解释器{}", binary),
            }
        }
        Ok(_) => warn!("PHP解释器{}返回了错误状态", binary),
        Err(_) => warn!("无法找到PHP解释器{}。服务器将继续运行，但页面渲染会失败。", binary),
    }
}

async fn run(config: Config) {
    let store = match PageStore::open(config.cache_dir()) {
        Ok(store) => store,
        Err(e) => {
            error!("无法打开页面缓存目录{}：{}", config.cache_dir(), e);
            return;
        }
    };
    info!(
        "页面缓存目录：{}，现有条目{}个",
        store.dir().display(),
        store.entry_count()
    );

    probe_php(config.php_binary());

    let bus = EventBus::new();
    Invalidator::new(store.clone()).subscribe(&bus);

    let server = Arc::new(Server {
        assets: AssetServer::new(
            config.www_root(),
            config.asset_cache_size(),
            config.asset_cache_threshold(),
        ),
        negotiator: Negotiator::new(store).with_compression(config.compress_pages()),
        renderer: PhpRenderer::new(
            config.php_binary(),
            config.www_root(),
            config.front_controller(),
        ),
        bus,
        active_connection: AtomicU32::new(0),
        config,
    });

    let port = server.config.port();
    let address = match server.config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("服务端将在{}上监听Socket连接", socket);

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(console(Arc::clone(&server), Arc::clone(&shutdown)));

    let mut id: u128 = 0;
    loop {
        let (mut stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("接受连接失败：{}", e);
                    continue;
                }
            },
            _ = shutdown.notified() => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
        };
        debug!("[ID{}]新的连接：{}", id, addr);

        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server.active_connection.fetch_add(1, Ordering::SeqCst);
            handle_connection(&mut stream, id, Arc::clone(&server)).await;
            server.active_connection.fetch_sub(1, Ordering::SeqCst);
        });
        id += 1;
    }
}

/// 后台管理控制台
async fn console(server: Arc<Server>, shutdown: Arc<Notify>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        match cmd {
            "" => {}
            "stop" => {
                println!("停机指令已激活，服务器将停止接受新的连接...");
                shutdown.notify_one();
                break;
            }
            "help" => {
                println!("== Cacheserver Help ==");
                println!("stop          - 发出停机信号");
                println!("status        - 查看当前服务器运行状态");
                println!("purge         - 清空页面缓存");
                println!("emit <event>  - 发布内容变更事件");
                println!("                ({})", event_names());
                println!("help          - 显示此帮助信息");
                println!("======================");
            }
            "status" => {
                println!("== Cacheserver 状态 ==");
                println!(
                    "当前活跃连接数: {}",
                    server.active_connection.load(Ordering::SeqCst)
                );
                println!("页面缓存条目数: {}", server.negotiator.store().entry_count());
                println!("静态资源缓存文件数: {}", server.assets.cached_files());
                println!("======================");
            }
            "purge" => match server.negotiator.store().purge_all() {
                Ok(removed) => println!("页面缓存已清空，删除{}个条目", removed),
                Err(e) => println!("清空页面缓存失败：{}", e),
            },
            "emit" => match parts.next().map(str::parse::<ContentEvent>) {
                Some(Ok(event)) => {
                    let delivered = server.bus.publish(event);
                    println!("事件{}已发布给{}个订阅者", event, delivered);
                }
                Some(Err(e)) => println!("{}，可用事件：{}", e, event_names()),
                None => println!("用法：emit <event>"),
            },
            _ => {
                println!("无效的命令：{}", cmd);
            }
        }
    }
}

fn event_names() -> String {
    ContentEvent::ALL
        .iter()
        .map(|e| e.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 读取请求头，直到空行、连接关闭或超出长度上限
async fn read_head(stream: &mut TcpStream, id: u128) -> Option<Vec<u8>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_HEAD_SIZE {
                    break;
                }
            }
            Err(e) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return None;
            }
        }
    }
    match buffer.is_empty() {
        true => None,
        false => Some(buffer),
    }
}

/// 按 `Content-Length` 补齐请求体。连接提前关闭时返回 `None`。
async fn read_body(stream: &mut TcpStream, request: &Request, wanted: usize, id: u128) -> Option<Vec<u8>> {
    let mut body = Vec::with_capacity(wanted);
    body.extend_from_slice(request.body());
    let mut chunk = [0u8; 8192];
    while body.len() < wanted {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                warn!("[ID{}]请求体不完整：{} / {} bytes", id, body.len(), wanted);
                return None;
            }
            Ok(n) => body.extend_from_slice(&chunk[..n.min(wanted - body.len())]),
            Err(e) => {
                error!("[ID{}]读取请求体时遇到错误: {}", id, e);
                return None;
            }
        }
    }
    Some(body)
}

/// # 连接处理器
///
/// 读取解析请求，先尝试静态资源，再交给页面缓存协商，最后发送响应。
async fn handle_connection(stream: &mut TcpStream, id: u128, server: Arc<Server>) {
    let buffer = match read_head(stream, id).await {
        Some(buffer) => buffer,
        None => return,
    };
    debug!("[ID{}]HTTP请求接收完毕", id);
    let start_time = Instant::now();

    let mut request = match Request::try_from(&buffer, id) {
        Ok(req) => req,
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败: {}", id, e);
            let response = Response::response_400(id);
            let _ = stream.write_all(&response.as_bytes()).await;
            return;
        }
    };
    // 解析阶段已校验过 Content-Length
    let wanted = request.content_length().unwrap_or(0);
    if wanted > MAX_BODY_SIZE {
        warn!("[ID{}]请求体过大：{} bytes", id, wanted);
        let response = Response::from_status_code(413, None);
        let _ = stream.write_all(&response.as_bytes()).await;
        return;
    }
    if request.body().len() < wanted {
        request = match read_body(stream, &request, wanted, id).await {
            Some(body) => request.with_body(body),
            None => return,
        };
    }
    request.classify(&server.config);
    debug!("[ID{}]成功解析HTTP请求，上下文：{:?}", id, request.context());

    // 文件读写与渲染都是阻塞操作
    let worker = Arc::clone(&server);
    let handled = tokio::task::spawn_blocking(move || {
        let (mut response, outcome) = match worker.assets.serve(&request, id) {
            Some(response) => (response, None),
            None => {
                let (response, outcome) =
                    worker
                        .negotiator
                        .respond(&request, &worker.renderer, id);
                (response, Some(outcome))
            }
        };
        if request.method() == HttpRequestMethod::Head {
            response.strip_body();
        }
        response.set_header("Connection", "close");
        (request, response, outcome)
    })
    .await;

    let (request, response, outcome) = match handled {
        Ok(handled) => handled,
        Err(e) => {
            error!("[ID{}]请求处理任务异常终止：{}", id, e);
            let response = Response::response_500(id);
            let _ = stream.write_all(&response.as_bytes()).await;
            return;
        }
    };

    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}, {}ms",
        id,
        request.version(),
        request.method(),
        request.target(),
        response.status_code(),
        outcome.map_or("STATIC".to_string(), |o: CacheOutcome| o.to_string()),
        request.user_agent(),
        start_time.elapsed().as_millis()
    );

    let response_bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, response_bytes.len());
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}
