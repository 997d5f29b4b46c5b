//! Iteration guard: bounds how often each phase may be (re-)entered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::graph::StageGraph;
use crate::engine::types::{Next, Phase, StageId};

/// Guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardPolicy {
    pub max_iterations: u32,
    /// Per-phase overrides of `max_iterations`.
    pub limits: BTreeMap<Phase, u32>,
    /// Order used when forcing progression.
    pub forward: Vec<Phase>,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            limits: BTreeMap::new(),
            forward: Phase::FORWARD.to_vec(),
        }
    }
}

/// The contiguous run of stages in the phase currently being visited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseVisit {
    pub phase: Option<Phase>,
    pub stages: Vec<StageId>,
}

/// One forced progression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOverride {
    pub phase: Phase,
    pub limit: u32,
    pub requested: StageId,
    pub forced: Next,
}

impl GuardOverride {
    pub fn warning(&self) -> String {
        format!(
            "iteration guard: phase '{}' exceeded {} iterations; '{}' overridden, forcing '{}'",
            self.phase, self.limit, self.requested, self.forced
        )
    }
}

/// The guard's decision for a requested stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Stage to run; `None` means progression ran past the last phase.
    pub stage: Option<StageId>,
    pub overrides: Vec<GuardOverride>,
}

impl GuardPolicy {
    pub fn limit(&self, phase: Phase) -> u32 {
        self.limits
            .get(&phase)
            .copied()
            .unwrap_or(self.max_iterations)
    }

    /// Upper bound on stage invocations for one execution of `graph`.
    pub fn invocation_bound(&self, graph: &StageGraph) -> u64 {
        self.forward
            .iter()
            .map(|phase| self.limit(*phase) as u64 * graph.phase_size(*phase) as u64)
            .sum()
    }

    /// Account for the stage the engine is about to run and decide what
    /// actually runs.
    ///
    /// A phase iteration starts when the phase changes or when a stage repeats
    /// within the current visit. Exhausted phases are skipped forward to the
    /// entry stage of the next phase that still has budget.
    pub fn admit(
        &self,
        graph: &StageGraph,
        counts: &mut BTreeMap<Phase, u32>,
        visit: &mut PhaseVisit,
        requested: StageId,
    ) -> Admission {
        let mut candidate = requested;
        let mut overrides = Vec::new();

        loop {
            let phase = candidate.phase();
            let starts_iteration =
                visit.phase != Some(phase) || visit.stages.contains(&candidate);

            if !starts_iteration {
                visit.stages.push(candidate);
                return Admission {
                    stage: Some(candidate),
                    overrides,
                };
            }

            let limit = self.limit(phase);
            let count = counts.get(&phase).copied().unwrap_or(0) + 1;
            if count <= limit {
                counts.insert(phase, count);
                visit.phase = Some(phase);
                visit.stages = vec![candidate];
                return Admission {
                    stage: Some(candidate),
                    overrides,
                };
            }

            let forced = self.next_phase_entry(graph, phase);
            overrides.push(GuardOverride {
                phase,
                limit,
                requested: candidate,
                forced,
            });
            match forced {
                Next::Stage(next) => candidate = next,
                Next::Terminate => {
                    return Admission {
                        stage: None,
                        overrides,
                    };
                }
            }
        }
    }

    fn next_phase_entry(&self, graph: &StageGraph, phase: Phase) -> Next {
        let Some(pos) = self.forward.iter().position(|p| *p == phase) else {
            return Next::Terminate;
        };
        self.forward[pos + 1..]
            .iter()
            .find_map(|p| graph.phase_entry(*p))
            .map(Next::Stage)
            .unwrap_or(Next::Terminate)
    }
}
