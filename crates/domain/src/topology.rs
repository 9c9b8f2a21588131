use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::{
    Node, NodeList, PipelineError, PipelineResult, Stage, StageList, Worker, WorkerId,
    WorkerState, WorkerStats,
};

/// 内存中的拓扑图
///
/// 空闲节点池、使用中的节点、阶段以及所有 worker。节点只会在两个池之间移动，不会被删除。
#[derive(Debug)]
pub struct Topology {
    free_nodes: NodeList,
    nodes: NodeList,
    stages: StageList,
    workers: HashMap<WorkerId, Worker>,
    next_worker_id: AtomicU64,
}

impl Topology {
    pub fn new<I, S>(hosts: I, stage_count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            free_nodes: hosts.into_iter().collect(),
            nodes: NodeList::new(),
            stages: StageList::new(stage_count),
            workers: HashMap::new(),
            next_worker_id: AtomicU64::new(0),
        }
    }

    pub fn free_nodes(&self) -> &NodeList {
        &self.free_nodes
    }

    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn stages(&self) -> &StageList {
        &self.stages
    }

    pub fn stage(&self, position: usize) -> Option<&Stage> {
        self.stages.get(position)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn max_position(&self) -> Option<usize> {
        self.stages.max_position()
    }

    /// 从空闲池取出一个节点并放入使用中的列表，返回节点地址
    pub fn pop_free_node(&mut self) -> PipelineResult<String> {
        let node = self.free_nodes.pop().ok_or(PipelineError::NoFreeNodes)?;
        let address = node.address.clone();
        self.nodes.add_node(node);
        Ok(address)
    }

    /// 在指定节点上为某个阶段分配一个新的 worker
    ///
    /// 节点若仍在空闲池中会被移入使用中的列表；未知节点直接加入使用中的列表。
    pub fn add_worker(&mut self, position: usize, host: &str) -> PipelineResult<WorkerId> {
        if self.stages.get(position).is_none() {
            return Err(PipelineError::StageNotFound { position });
        }

        if self.nodes.find_node(host).is_none() {
            let node = self.free_nodes.remove(host).unwrap_or_else(|| Node::new(host));
            self.nodes.add_node(node);
        }

        let id = (self.next_worker_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let worker = Worker::new(id.clone(), host, position);

        if let Some(stage) = self.stages.get_mut(position) {
            stage.workers.push(id.clone());
        }
        if let Some(node) = self.nodes.find_node_mut(host) {
            node.add_worker(id.clone());
        }
        self.workers.insert(id.clone(), worker);

        debug!(worker_id = %id, position, host, "分配新的worker");
        Ok(id)
    }

    /// 在空闲节点上分配 worker
    pub fn add_worker_on_free_node(&mut self, position: usize) -> PipelineResult<WorkerId> {
        let host = self.pop_free_node()?;
        self.add_worker(position, &host)
    }

    pub fn find_worker(&self, id: &str) -> Option<&Worker> {
        self.workers.get(id)
    }

    fn worker_mut(&mut self, id: &str) -> PipelineResult<&mut Worker> {
        self.workers
            .get_mut(id)
            .ok_or_else(|| PipelineError::worker_not_found(id))
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    /// 按阶段内顺序列出某个阶段的 worker
    pub fn workers_at(&self, position: usize) -> Vec<&Worker> {
        self.stages
            .get(position)
            .map(|stage| {
                stage
                    .workers
                    .iter()
                    .filter_map(|id| self.workers.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 已注册且未退出的 worker
    pub fn live_workers_at(&self, position: usize) -> Vec<&Worker> {
        self.workers_at(position)
            .into_iter()
            .filter(|w| w.is_live())
            .collect()
    }

    pub fn node_workers(&self, node: &Node) -> Vec<&Worker> {
        node.workers
            .iter()
            .filter_map(|id| self.workers.get(id))
            .collect()
    }

    /// 阶段的平均执行时间（毫秒）
    ///
    /// 只统计已上报过执行数据且未退出的 worker，没有数据时返回 `None`。
    pub fn average_execution_time(&self, position: usize) -> Option<f64> {
        let samples: Vec<f64> = self
            .workers_at(position)
            .into_iter()
            .filter(|w| !w.exiting && w.stats.has_executed())
            .map(|w| w.stats.execution_time_ms)
            .collect();

        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// 节点可用内存，取节点上各 worker 上报值的最小值
    pub fn available_memory(&self, node: &Node) -> u64 {
        self.node_workers(node)
            .into_iter()
            .map(|w| w.stats.node_available_memory)
            .min()
            .unwrap_or(0)
    }

    pub fn mark_starting(&mut self, id: &str) -> PipelineResult<()> {
        let worker = self.worker_mut(id)?;
        if worker.state == WorkerState::Unstarted {
            worker.state = WorkerState::Starting;
        }
        Ok(())
    }

    /// 记录 worker 注册上报的地址和进程号。已判定启动失败的 worker 不能再注册
    pub fn update_info(&mut self, id: &str, address: String, pid: u32) -> PipelineResult<()> {
        let worker = self.worker_mut(id)?;
        if let WorkerState::Failed { reason } = &worker.state {
            return Err(PipelineError::start_failed(
                id,
                format!("拒绝迟到的注册 ({address}, pid {pid}): {reason}"),
            ));
        }
        worker.address = Some(address);
        worker.state = WorkerState::Running { pid };
        Ok(())
    }

    /// 标记启动失败。已注册的 worker 不受影响
    pub fn mark_failed(&mut self, id: &str, reason: String) -> PipelineResult<bool> {
        let worker = self.worker_mut(id)?;
        if worker.is_registered() {
            return Ok(false);
        }
        worker.state = WorkerState::Failed { reason };
        Ok(true)
    }

    pub fn update_stats(&mut self, id: &str, stats: WorkerStats) -> PipelineResult<()> {
        self.worker_mut(id)?.stats = stats;
        Ok(())
    }

    pub fn mark_exiting(&mut self, id: &str) -> PipelineResult<()> {
        self.worker_mut(id)?.exiting = true;
        Ok(())
    }

    pub fn mark_scaled(&mut self, position: usize) {
        if let Some(stage) = self.stages.get_mut(position) {
            stage.scaled = true;
        }
    }

    /// 从阶段和节点中移除 worker
    ///
    /// 节点上最后一个 worker 移除后，节点回到空闲池。
    pub fn remove_worker(&mut self, id: &str) -> PipelineResult<Worker> {
        let worker = self
            .workers
            .remove(id)
            .ok_or_else(|| PipelineError::worker_not_found(id))?;

        if let Some(stage) = self.stages.get_mut(worker.position) {
            stage.workers.retain(|w| w != id);
        }

        let now_empty = match self.nodes.find_node_mut(&worker.host) {
            Some(node) => {
                node.remove_worker(id);
                node.is_empty()
            }
            None => false,
        };
        if now_empty {
            if let Some(node) = self.nodes.remove(&worker.host) {
                debug!(node = %node.address, "节点已空闲");
                self.free_nodes.add_node(Node::new(node.address));
            }
        }

        Ok(worker)
    }

    /// 所有 worker 都已注册或已失败
    pub fn all_registered(&self) -> bool {
        self.workers
            .values()
            .all(|w| w.is_registered() || w.is_failed())
    }
}
