//! 拓扑连线
//!
//! 新 worker 先拿到下一阶段所有存活 worker 的地址，再把自己的地址告知上一阶段的
//! 所有存活 worker。第0阶段的 worker 最后收到启动命令。
//!
//! 发往单个上游的消息失败只记录日志；发往新 worker 本身的消息失败，
//! 或者没有任何上游知道新 worker 时，连线失败，由调用方回滚。

use pipeline_core::{Message, PipelineError, PipelineResult, WorkerMessenger};
use pipeline_domain::Topology;
use tracing::{debug, info, warn};

use crate::registry::Registry;

fn live_addresses(topology: &Topology, position: usize) -> Vec<String> {
    topology
        .live_workers_at(position)
        .into_iter()
        .filter_map(|w| w.live_address().map(str::to_string))
        .collect()
}

struct WiringPlan {
    address: String,
    position: usize,
    predecessors: Vec<String>,
    successors: Vec<String>,
}

/// 把已注册的 worker 接入拓扑
///
/// 非第0阶段的 worker 至少要有一个上游收到它的地址。
pub async fn wire_worker(
    registry: &Registry,
    messenger: &dyn WorkerMessenger,
    worker_id: &str,
) -> PipelineResult<()> {
    let plan = {
        let topology = registry.lock();
        let worker = topology
            .find_worker(worker_id)
            .ok_or_else(|| PipelineError::worker_not_found(worker_id))?;
        let address = worker.live_address().ok_or_else(|| {
            PipelineError::Internal(format!("worker {worker_id} 尚未注册，无法连线"))
        })?;
        WiringPlan {
            address: address.to_string(),
            position: worker.position,
            predecessors: worker
                .position
                .checked_sub(1)
                .map(|p| live_addresses(&topology, p))
                .unwrap_or_default(),
            successors: live_addresses(&topology, worker.position + 1),
        }
    };

    for successor in &plan.successors {
        messenger
            .send(&plan.address, Message::add_next_stage_addr(successor.clone()))
            .await?;
    }

    let mut notified = 0;
    for predecessor in &plan.predecessors {
        match messenger
            .send(predecessor, Message::add_next_stage_addr(plan.address.clone()))
            .await
        {
            Ok(()) => notified += 1,
            Err(e) => warn!(worker_id, "通知上游 {} 失败: {}", predecessor, e),
        }
    }
    if plan.position > 0 && notified == 0 {
        return Err(PipelineError::Network(format!(
            "worker {worker_id} 没有可达的上游 (共 {} 个)",
            plan.predecessors.len()
        )));
    }

    if plan.position == 0 {
        messenger.send(&plan.address, Message::start_worker()).await?;
    }

    info!(
        worker_id,
        position = plan.position,
        "worker已接入拓扑: 上游 {}/{} 个, 下游 {} 个",
        notified,
        plan.predecessors.len(),
        plan.successors.len()
    );
    Ok(())
}

/// 初始连线：第 `p-1` 阶段的每个存活 worker 都拿到第 `p` 阶段每个存活 worker 的地址
pub async fn initial_wiring(
    registry: &Registry,
    messenger: &dyn WorkerMessenger,
) -> PipelineResult<()> {
    let edges: Vec<(String, String)> = {
        let topology = registry.lock();
        let mut edges = Vec::new();
        for position in 1..topology.stage_count() {
            let upstream = live_addresses(&topology, position - 1);
            let downstream = live_addresses(&topology, position);
            for from in &upstream {
                for to in &downstream {
                    edges.push((from.clone(), to.clone()));
                }
            }
        }
        edges
    };

    for (from, to) in &edges {
        debug!("连线 {} -> {}", from, to);
        messenger
            .send(from, Message::add_next_stage_addr(to.clone()))
            .await?;
    }
    info!("初始连线完成，共 {} 条", edges.len());
    Ok(())
}

/// 向第0阶段的所有存活 worker 发送启动命令
pub async fn start_first_stage(
    registry: &Registry,
    messenger: &dyn WorkerMessenger,
) -> PipelineResult<()> {
    let addresses = {
        let topology = registry.lock();
        live_addresses(&topology, 0)
    };
    for address in &addresses {
        messenger.send(address, Message::start_worker()).await?;
    }
    info!("已启动第0阶段的 {} 个worker", addresses.len());
    Ok(())
}

/// 让上一阶段的所有存活 worker 断开到 `address` 的连接，返回成功通知的数量
///
/// 没收到通知的上游会在写入失败时自行移除该连接。
pub async fn break_predecessors(
    registry: &Registry,
    messenger: &dyn WorkerMessenger,
    address: &str,
    position: usize,
) -> usize {
    let Some(previous) = position.checked_sub(1) else {
        return 0;
    };
    let predecessors = {
        let topology = registry.lock();
        live_addresses(&topology, previous)
    };

    let mut notified = 0;
    for predecessor in &predecessors {
        match messenger
            .send(predecessor, Message::break_connection(address))
            .await
        {
            Ok(()) => notified += 1,
            Err(e) => warn!("通知上游 {} 断开 {} 失败: {}", predecessor, address, e),
        }
    }
    notified
}
