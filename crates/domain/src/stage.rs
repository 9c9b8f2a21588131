use serde::{Deserialize, Serialize};

use crate::WorkerId;

/// 流水线中的一个位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub position: usize,
    pub workers: Vec<WorkerId>,
    /// 是否做过扩容，只用于瓶颈日志，不影响调度决策
    pub scaled: bool,
}

impl Stage {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            workers: Vec::new(),
            scaled: false,
        }
    }
}

/// 阶段列表，位置为 `0..len` 连续，创建后不再增减
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageList {
    stages: Vec<Stage>,
}

impl StageList {
    pub fn new(count: usize) -> Self {
        Self {
            stages: (0..count).map(Stage::new).collect(),
        }
    }

    pub fn get(&self, position: usize) -> Option<&Stage> {
        self.stages.get(position)
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut Stage> {
        self.stages.get_mut(position)
    }

    /// 包含该 worker 的阶段
    pub fn find_stage_with_worker(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.workers.iter().any(|w| w == id))
    }

    pub fn max_position(&self) -> Option<usize> {
        self.stages.len().checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }
}
