//! 从 `/proc` 读取内存信息，单位均为字节
//!
//! 非 Linux 主机上读取失败时返回 0，并只记录一次警告。

use std::sync::Once;

use tracing::warn;

const MEMINFO_PATH: &str = "/proc/meminfo";
const SELF_STATUS_PATH: &str = "/proc/self/status";

static WARN_ONCE: Once = Once::new();

/// 节点可用内存，优先取 `MemAvailable`，缺失时取 `MemFree`
pub fn available_memory() -> u64 {
    match std::fs::read_to_string(MEMINFO_PATH) {
        Ok(contents) => parse_available_memory(&contents).unwrap_or(0),
        Err(e) => {
            warn_unavailable(MEMINFO_PATH, &e);
            0
        }
    }
}

/// 当前进程的常驻内存 (`VmRSS`)
pub fn process_memory_usage() -> u64 {
    match std::fs::read_to_string(SELF_STATUS_PATH) {
        Ok(contents) => parse_kb_field(&contents, "VmRSS").unwrap_or(0),
        Err(e) => {
            warn_unavailable(SELF_STATUS_PATH, &e);
            0
        }
    }
}

pub fn parse_available_memory(meminfo: &str) -> Option<u64> {
    parse_kb_field(meminfo, "MemAvailable")
        .filter(|v| *v > 0)
        .or_else(|| parse_kb_field(meminfo, "MemFree"))
}

/// 解析 `Key:   1234 kB` 形式的行
pub fn parse_kb_field(contents: &str, key: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != key {
            return None;
        }
        let mut parts = rest.split_whitespace();
        let value: u64 = parts.next()?.parse().ok()?;
        match parts.next() {
            Some("kB") => Some(value * 1024),
            _ => Some(value),
        }
    })
}

fn warn_unavailable(path: &str, err: &std::io::Error) {
    WARN_ONCE.call_once(|| {
        warn!("无法读取 {}，内存统计将上报为0: {}", path, err);
    });
}
