//! 瓶颈检测
//!
//! 某阶段的平均执行时间超过相邻阶段的 `threshold` 倍即为候选，严重程度为两者之差。
//! 取严重程度最大的候选，扩容倍数为 `floor(平均值 / 相邻平均值)`。
//! 没有数据或平均值为0的阶段不参与比较。

use pipeline_domain::Topology;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bottleneck {
    pub position: usize,
    pub average: f64,
    pub neighbor_average: f64,
    pub severity: f64,
    pub scale_factor: usize,
    /// 该阶段之前是否扩容过，只用于日志
    pub previously_scaled: bool,
}

/// 各阶段的平均执行时间，按位置排列
pub fn stage_averages(topology: &Topology) -> Vec<Option<f64>> {
    (0..topology.stage_count())
        .map(|position| topology.average_execution_time(position))
        .collect()
}

fn usable(average: Option<f64>) -> Option<f64> {
    average.filter(|a| a.is_finite() && *a > 0.0)
}

pub fn find_bottleneck(averages: &[Option<f64>], threshold: f64) -> Option<Bottleneck> {
    let mut best: Option<Bottleneck> = None;

    for (position, average) in averages.iter().enumerate() {
        let Some(average) = usable(*average) else {
            continue;
        };

        let neighbors = [
            averages.get(position + 1).copied().flatten(),
            position
                .checked_sub(1)
                .and_then(|p| averages.get(p).copied().flatten()),
        ];

        for neighbor in neighbors.into_iter().filter_map(usable) {
            if average <= threshold * neighbor {
                continue;
            }
            let severity = average - neighbor;
            if best.map_or(true, |b| severity > b.severity) {
                best = Some(Bottleneck {
                    position,
                    average,
                    neighbor_average: neighbor,
                    severity,
                    scale_factor: ((average / neighbor).floor() as usize).max(1),
                    previously_scaled: false,
                });
            }
        }
    }

    best
}
