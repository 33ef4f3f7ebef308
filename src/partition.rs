//! Planning: serial pipeline or fanned task graph.
//!
//! Given the number of input streams and the configured parallelism, the
//! planner either runs the whole merge-combine serially in the caller's
//! pulls, or splits the inputs into balanced, contiguous-by-index groups,
//! each feeding an intermediate merge-combine task whose output feeds the
//! final merge-combine task.

use crate::config::MergeConfig;
use smallvec::SmallVec;
use std::ops::Range;

/// Index groups of a fanned plan. Inline up to the common fan-out.
pub type GroupRanges = SmallVec<[Range<usize>; 8]>;

/// The shape of one merge-combine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergePlan {
    /// Merge and combine in the caller's pulls; no pool use.
    Serial,
    /// `groups.len()` intermediate tasks feeding one final task.
    Fanned {
        /// Contiguous input index ranges, one per intermediate task. Every
        /// range is non-empty and the ranges cover `0..input_count`.
        groups: GroupRanges,
    },
}

/// Decides how to run a merge over `input_count` streams.
///
/// Serial when the input count is at or below the configured threshold,
/// when the parallelism hint allows no concurrency, or when grouping
/// would degenerate to a single group.
#[must_use]
pub fn plan(input_count: usize, config: &MergeConfig) -> MergePlan {
    if input_count <= config.serial_input_threshold || config.parallelism_hint <= 1 {
        return MergePlan::Serial;
    }
    let group_count = config
        .parallelism_hint
        .min(input_count.div_ceil(config.fanin_min));
    if group_count <= 1 {
        return MergePlan::Serial;
    }

    let base = input_count / group_count;
    let extra = input_count % group_count;
    let mut groups = GroupRanges::new();
    let mut start = 0;
    for index in 0..group_count {
        let len = base + usize::from(index < extra);
        groups.push(start..start + len);
        start += len;
    }
    debug_assert_eq!(start, input_count);
    MergePlan::Fanned { groups }
}
