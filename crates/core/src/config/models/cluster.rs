use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 启动 worker 进程的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    Ssh,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub ssh_user: String,
    pub ssh_port: u16,
    pub nodes: Vec<String>,
    /// 每行一个主机名的节点列表文件，空行忽略
    pub nodes_file: Option<String>,
    /// 远程主机上程序所在目录，需以 `/` 结尾
    pub remote_binary_path: String,
    /// 远程程序名，缺省为当前可执行文件名
    pub program: Option<String>,
    pub launcher: LauncherKind,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ssh_user: std::env::var("USER").unwrap_or_else(|_| "pipeline".to_string()),
            ssh_port: 22,
            nodes: Vec::new(),
            nodes_file: None,
            remote_binary_path: String::new(),
            program: None,
            launcher: LauncherKind::Ssh,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ssh_user.is_empty() && self.launcher == LauncherKind::Ssh {
            return Err(anyhow::anyhow!("SSH用户名不能为空"));
        }

        if self.ssh_port == 0 {
            return Err(anyhow::anyhow!("SSH端口必须大于0"));
        }

        if !self.remote_binary_path.is_empty() && !self.remote_binary_path.ends_with('/') {
            return Err(anyhow::anyhow!(
                "远程程序路径必须以 / 结尾: {}",
                self.remote_binary_path
            ));
        }

        if self.nodes.is_empty() && self.nodes_file.is_none() {
            return Err(anyhow::anyhow!("节点列表不能为空"));
        }

        Ok(())
    }

    /// 合并 `nodes` 与 `nodes_file` 中的节点，保持顺序
    pub fn resolve_nodes(&self) -> anyhow::Result<Vec<String>> {
        let mut nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        if let Some(ref path) = self.nodes_file {
            let contents = std::fs::read_to_string(Path::new(path))
                .with_context(|| format!("读取节点列表文件失败: {path}"))?;
            nodes.extend(parse_node_list(&contents));
        }

        if nodes.is_empty() {
            return Err(anyhow::anyhow!("没有可用的节点"));
        }
        Ok(nodes)
    }

    /// 远程命令中使用的程序完整路径
    pub fn program_path(&self) -> anyhow::Result<String> {
        let program = match self.program {
            Some(ref program) => program.clone(),
            None => std::env::current_exe()
                .context("无法获取当前可执行文件路径")?
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("无法解析当前可执行文件名"))?,
        };
        Ok(format!("{}{}", self.remote_binary_path, program))
    }
}

/// 解析节点列表文本，每行一个节点
pub fn parse_node_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub bind_address: String,
    /// worker 回连 master 使用的地址
    pub advertise_address: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7070".to_string(),
            advertise_address: "127.0.0.1:7070".to_string(),
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("无效的绑定地址: {}", self.bind_address))?;

        if !self.advertise_address.contains(':') {
            return Err(anyhow::anyhow!(
                "通告地址必须包含端口: {}",
                self.advertise_address
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_list_filters_blank_lines() {
        let nodes = parse_node_list("node-a\n\n  node-b  \n# comment\nnode-c\n");
        assert_eq!(nodes, vec!["node-a", "node-b", "node-c"]);
    }

    #[test]
    fn test_resolve_nodes_merges_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.txt");
        std::fs::write(&path, "n2\nn3\n").unwrap();

        let config = ClusterConfig {
            nodes: vec!["n1".to_string()],
            nodes_file: Some(path.to_string_lossy().into_owned()),
            ..ClusterConfig::default()
        };
        assert_eq!(config.resolve_nodes().unwrap(), vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_validate_rejects_path_without_slash() {
        let config = ClusterConfig {
            nodes: vec!["n1".to_string()],
            remote_binary_path: "/opt/bin".to_string(),
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_program_path_uses_configured_program() {
        let config = ClusterConfig {
            remote_binary_path: "/opt/pipeline/".to_string(),
            program: Some("wordcount".to_string()),
            ..ClusterConfig::default()
        };
        assert_eq!(config.program_path().unwrap(), "/opt/pipeline/wordcount");
    }

    #[test]
    fn test_master_config_validation() {
        assert!(MasterConfig::default().validate().is_ok());
        let bad = MasterConfig {
            bind_address: "not-an-address".to_string(),
            ..MasterConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
