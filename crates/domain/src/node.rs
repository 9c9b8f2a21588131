use serde::{Deserialize, Serialize};

use crate::WorkerId;

/// 可以运行 worker 的主机
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    /// 在所属列表中的序号，加入列表时分配
    pub position: usize,
    pub workers: Vec<WorkerId>,
}

impl Node {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            position: 0,
            workers: Vec::new(),
        }
    }

    pub fn add_worker(&mut self, id: WorkerId) {
        self.workers.push(id);
    }

    pub fn remove_worker(&mut self, id: &str) -> bool {
        let before = self.workers.len();
        self.workers.retain(|w| w != id);
        self.workers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// 有序的节点列表
///
/// 序号单调递增，节点离开后再加入会排到末尾。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeList {
    nodes: Vec<Node>,
    next_position: usize,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, mut node: Node) {
        node.position = self.next_position;
        self.next_position += 1;
        self.nodes.push(node);
    }

    /// 取出第一个节点
    pub fn pop(&mut self) -> Option<Node> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes.remove(0))
        }
    }

    pub fn find_node(&self, address: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn find_node_mut(&mut self, address: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.address == address)
    }

    pub fn remove(&mut self, address: &str) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.address == address)?;
        Some(self.nodes.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for NodeList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = NodeList::new();
        for address in iter {
            list.add_node(Node::new(address));
        }
        list
    }
}
