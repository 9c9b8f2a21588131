//! 测试数据构建器

use pipeline_domain::{Topology, WorkerId, WorkerStats};

/// 构建执行时间和内存数据
#[derive(Debug, Clone, Default)]
pub struct StatsBuilder {
    stats: WorkerStats,
}

impl StatsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置执行时间，执行次数至少为1
    pub fn with_execution_time(mut self, millis: f64) -> Self {
        self.stats.execution_time_ms = millis;
        self.stats.executions = self.stats.executions.max(1);
        self
    }

    pub fn with_executions(mut self, executions: u64) -> Self {
        self.stats.executions = executions;
        self
    }

    pub fn with_memory(mut self, usage: u64, max_usage: u64) -> Self {
        self.stats.worker_memory_usage = usage;
        self.stats.max_worker_memory_usage = max_usage;
        self
    }

    pub fn with_available_memory(mut self, available: u64) -> Self {
        self.stats.node_available_memory = available;
        self
    }

    pub fn build(self) -> WorkerStats {
        self.stats
    }
}

struct PlannedWorker {
    position: usize,
    host: String,
    stats: Option<WorkerStats>,
    registered: bool,
}

/// 构建拓扑
///
/// worker 按添加顺序分配，编号从 "1" 开始。已注册的 worker 地址为
/// `{host}:{5000 + 编号}`，进程号为 `1000 + 编号`。
pub struct TopologyBuilder {
    stage_count: usize,
    hosts: Vec<String>,
    workers: Vec<PlannedWorker>,
}

impl TopologyBuilder {
    pub fn new(stage_count: usize) -> Self {
        Self {
            stage_count,
            hosts: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// 加入节点池，先加入的节点先被使用
    pub fn with_nodes<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// 已注册、带统计数据的 worker
    pub fn with_worker(mut self, position: usize, host: &str, stats: WorkerStats) -> Self {
        self.workers.push(PlannedWorker {
            position,
            host: host.to_string(),
            stats: Some(stats),
            registered: true,
        });
        self
    }

    /// 已注册、尚未上报统计数据的 worker
    pub fn with_idle_worker(mut self, position: usize, host: &str) -> Self {
        self.workers.push(PlannedWorker {
            position,
            host: host.to_string(),
            stats: None,
            registered: true,
        });
        self
    }

    /// 已分配但未注册的 worker
    pub fn with_pending_worker(mut self, position: usize, host: &str) -> Self {
        self.workers.push(PlannedWorker {
            position,
            host: host.to_string(),
            stats: None,
            registered: false,
        });
        self
    }

    pub fn build(self) -> (Topology, Vec<WorkerId>) {
        let mut topology = Topology::new(self.hosts, self.stage_count);
        let mut ids = Vec::with_capacity(self.workers.len());

        for planned in self.workers {
            let id = topology.add_worker(planned.position, &planned.host).unwrap();
            let n: u32 = id.parse().unwrap();
            if planned.registered {
                topology
                    .update_info(&id, format!("{}:{}", planned.host, 5000 + n), 1000 + n)
                    .unwrap();
            }
            if let Some(stats) = planned.stats {
                topology.update_stats(&id, stats).unwrap();
            }
            ids.push(id);
        }

        (topology, ids)
    }
}

/// 已注册 worker 的地址
pub fn worker_address(topology: &Topology, id: &str) -> String {
    topology
        .find_worker(id)
        .and_then(|w| w.address.clone())
        .unwrap()
}
