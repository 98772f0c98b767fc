//! # 结果聚合
//!
//! 把乱序完成的各目标结果按展开顺序重新排列，并推导整体结论。

use std::collections::HashMap;

use crate::types::{AggregateResult, ExitCodePolicy, Overall, TargetRef, TargetResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    policy: ExitCodePolicy,
}

impl Aggregator {
    pub fn new(policy: ExitCodePolicy) -> Self {
        Self { policy }
    }

    /// 按 `expanded` 的顺序组装结果
    ///
    /// # Panics
    ///
    /// `expanded` 中任一目标在 `outcomes` 里缺失时 panic：每个已提交的目标都必须恰好有一个结果。
    pub fn aggregate(
        &self,
        expanded: &[TargetRef],
        mut outcomes: HashMap<TargetRef, TargetResult>,
    ) -> AggregateResult {
        if expanded.is_empty() {
            return AggregateResult::no_targets();
        }

        let results: Vec<TargetResult> = expanded
            .iter()
            .map(|target| match outcomes.remove(target) {
                Some(result) => result,
                None => panic!("no outcome recorded for dispatched target {target}"),
            })
            .collect();

        let overall = self.classify(&results);
        AggregateResult::from_parts(results, overall)
    }

    /// 全部成功 → `AllSucceeded`；全部失败 → `TotalFailure`；否则 `PartialFailure`
    pub fn classify(&self, results: &[TargetResult]) -> Overall {
        if results.is_empty() {
            return Overall::NoTargets;
        }

        let succeeded = results
            .iter()
            .filter(|result| result.outcome.succeeded(self.policy))
            .count();

        if succeeded == results.len() {
            Overall::AllSucceeded
        } else if succeeded == 0 {
            Overall::TotalFailure
        } else {
            Overall::PartialFailure
        }
    }
}
