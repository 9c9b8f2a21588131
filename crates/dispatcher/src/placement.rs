//! 静态放置
//!
//! 按密度把连续的阶段分配给节点：`density = ceil(剩余阶段数 / 剩余空闲节点数)`，
//! 当前节点分满 `density` 个阶段后取下一个空闲节点并重新计算密度。

use pipeline_core::{PipelineError, PipelineResult, WorkerId};
use pipeline_domain::Topology;
use tracing::info;

/// 剩余阶段在剩余节点上的密度
pub fn density(remaining_stages: usize, remaining_nodes: usize) -> Option<usize> {
    if remaining_nodes == 0 {
        return None;
    }
    Some(remaining_stages.div_ceil(remaining_nodes))
}

/// 为每个阶段分配一个 worker，返回按阶段位置排列的编号
///
/// 阶段还没分完而空闲节点已用尽时返回 `NoFreeNodes`。
pub fn place_stages(topology: &mut Topology) -> PipelineResult<Vec<WorkerId>> {
    let total = topology.stage_count();
    let mut assigned = Vec::with_capacity(total);

    while assigned.len() < total {
        let remaining = total - assigned.len();
        let per_node =
            density(remaining, topology.free_nodes().len()).ok_or(PipelineError::NoFreeNodes)?;
        let host = topology.pop_free_node()?;

        for _ in 0..per_node {
            let position = assigned.len();
            assigned.push(topology.add_worker(position, &host)?);
        }
        info!(
            "节点 {} 分配阶段 {}..={}",
            host,
            assigned.len() - per_node,
            assigned.len() - 1
        );
    }

    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages_per_node(stage_count: usize, node_count: usize) -> Vec<usize> {
        let hosts: Vec<String> = (0..node_count).map(|i| format!("n{i}")).collect();
        let mut topology = Topology::new(hosts, stage_count);
        place_stages(&mut topology).unwrap();
        topology
            .nodes()
            .iter()
            .map(|node| node.workers.len())
            .collect()
    }

    #[test]
    fn test_density() {
        assert_eq!(density(5, 3), Some(2));
        assert_eq!(density(3, 2), Some(2));
        assert_eq!(density(1, 1), Some(1));
        assert_eq!(density(4, 0), None);
    }

    #[test]
    fn test_balanced_blocks() {
        assert_eq!(stages_per_node(5, 3), vec![2, 2, 1]);
        assert_eq!(stages_per_node(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(stages_per_node(7, 2), vec![4, 3]);
    }

    #[test]
    fn test_stages_are_contiguous_per_node() {
        let mut topology = Topology::new(["a", "b", "c"], 7);
        let ids = place_stages(&mut topology).unwrap();
        assert_eq!(ids.len(), 7);

        let hosts: Vec<String> = ids
            .iter()
            .map(|id| topology.find_worker(id).unwrap().host.clone())
            .collect();
        assert_eq!(hosts, vec!["a", "a", "a", "b", "b", "c", "c"]);
    }

    #[test]
    fn test_no_nodes_is_fatal() {
        let mut topology = Topology::new(Vec::<String>::new(), 2);
        assert!(matches!(
            place_stages(&mut topology),
            Err(PipelineError::NoFreeNodes)
        ));
    }
}
