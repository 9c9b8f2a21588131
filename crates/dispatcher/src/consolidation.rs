//! 基于内存的合并
//!
//! 按顺序扫描使用中的节点，节点可用内存取其上各 worker 上报值的最小值。
//! 在排在该节点之后的节点上寻找一个已执行过、最大内存占用小于该可用内存的 worker，
//! 把它迁移到该节点。每轮只执行找到的第一个迁移。

use pipeline_domain::{Topology, Worker, WorkerId};

/// 一次待执行的迁移
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub worker_id: WorkerId,
    pub position: usize,
    pub from_host: String,
    pub to_host: String,
    /// 迁移前 worker 的监听地址
    pub old_address: String,
}

fn movable(worker: &Worker, available: u64) -> bool {
    worker.is_live()
        && worker.stats.has_executed()
        && worker.stats.max_worker_memory_usage < available
}

pub fn find_migration(topology: &Topology) -> Option<Migration> {
    for target in topology.nodes().iter() {
        let available = topology.available_memory(target);
        if available == 0 {
            continue;
        }

        let candidate = topology
            .nodes()
            .iter()
            .filter(|node| node.position > target.position)
            .flat_map(|node| topology.node_workers(node))
            .find(|worker| movable(worker, available));

        if let Some(worker) = candidate {
            return Some(Migration {
                worker_id: worker.id.clone(),
                position: worker.position,
                from_host: worker.host.clone(),
                to_host: target.address.clone(),
                old_address: worker.address.clone().unwrap_or_default(),
            });
        }
    }
    None
}
