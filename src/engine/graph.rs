//! Stage registration, declared adjacency and per-stage routers.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::engine::error::StateError;
use crate::engine::state::StateRecord;
use crate::engine::types::*;
use crate::stages::Stage;

/// Decides the next hop after a stage has run.
pub trait Router: Send + Sync {
    fn route(&self, state: &StateRecord) -> Next;

    /// Every value `route` can return. Used to check adjacency closure
    /// without running anything.
    fn candidates(&self) -> Vec<Next>;
}

type Predicate = Box<dyn Fn(&StateRecord) -> bool + Send + Sync>;

struct Rule {
    label: &'static str,
    when: Predicate,
    then: Next,
}

/// Ordered first-match router: rules are tried in declaration order and the
/// first whose predicate holds wins; `otherwise` is used when none match.
pub struct RuleRouter {
    rules: Vec<Rule>,
    otherwise: Next,
}

impl RuleRouter {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            otherwise: Next::Terminate,
        }
    }

    /// Router with a single unconditional successor.
    pub fn always(next: Next) -> Self {
        Self::new().otherwise(next)
    }

    pub fn when<F>(mut self, label: &'static str, predicate: F, then: Next) -> Self
    where
        F: Fn(&StateRecord) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            label,
            when: Box::new(predicate),
            then,
        });
        self
    }

    pub fn otherwise(mut self, next: Next) -> Self {
        self.otherwise = next;
        self
    }

    /// Labels of the rules in priority order, for display.
    pub fn labels(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.label).collect()
    }
}

impl Default for RuleRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Router for RuleRouter {
    fn route(&self, state: &StateRecord) -> Next {
        self.rules
            .iter()
            .find(|rule| (rule.when)(state))
            .map(|rule| rule.then)
            .unwrap_or(self.otherwise)
    }

    fn candidates(&self) -> Vec<Next> {
        let mut out: Vec<Next> = self.rules.iter().map(|r| r.then).collect();
        out.push(self.otherwise);
        out.dedup();
        out
    }
}

/// Registration entry for one stage.
pub struct StageSpec {
    pub stage: Arc<dyn Stage>,
    pub successors: Vec<Next>,
    pub router: Arc<dyn Router>,
    pub policy: StagePolicy,
    /// A failing critical stage halts the execution.
    pub critical: bool,
}

impl StageSpec {
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            successors: Vec::new(),
            router: Arc::new(RuleRouter::new()),
            policy: StagePolicy::default(),
            critical: true,
        }
    }

    pub fn id(&self) -> StageId {
        self.stage.id()
    }

    pub fn successors(mut self, successors: impl IntoIterator<Item = Next>) -> Self {
        self.successors = successors.into_iter().collect();
        self
    }

    pub fn router(mut self, router: impl Router + 'static) -> Self {
        self.router = Arc::new(router);
        self
    }

    pub fn policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn allows(&self, next: Next) -> bool {
        next == Next::Terminate || self.successors.contains(&next)
    }
}

/// The full set of registered stages. The first registered stage is the entry.
#[derive(Default)]
pub struct StageGraph {
    order: Vec<StageId>,
    specs: HashMap<StageId, StageSpec>,
}

/// One declared edge, for display and static checks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Edge {
    pub from: StageId,
    pub to: Next,
    pub priority: usize,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage; re-registering an id replaces the earlier spec but
    /// keeps its position.
    pub fn register(&mut self, spec: StageSpec) {
        let id = spec.id();
        if !self.specs.contains_key(&id) {
            self.order.push(id);
        }
        self.specs.insert(id, spec);
    }

    pub fn with(mut self, spec: StageSpec) -> Self {
        self.register(spec);
        self
    }

    pub fn entry(&self) -> Option<StageId> {
        self.order.first().copied()
    }

    pub fn stages(&self) -> &[StageId] {
        &self.order
    }

    pub fn get(&self, id: StageId) -> Result<&StageSpec, StateError> {
        self.specs.get(&id).ok_or(StateError::UnknownStage(id))
    }

    /// First registered stage of a phase.
    pub fn phase_entry(&self, phase: Phase) -> Option<StageId> {
        self.order.iter().copied().find(|id| id.phase() == phase)
    }

    /// Number of registered stages in a phase.
    pub fn phase_size(&self, phase: Phase) -> usize {
        self.order.iter().filter(|id| id.phase() == phase).count()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.order
            .iter()
            .filter_map(|id| self.specs.get(id))
            .flat_map(|spec| {
                spec.successors
                    .iter()
                    .enumerate()
                    .map(move |(priority, to)| Edge {
                        from: spec.id(),
                        to: *to,
                        priority,
                    })
            })
            .collect()
    }

    /// Static consistency checks. Returns every problem found; empty means valid.
    pub fn validate(&self, forward: &[Phase]) -> Vec<String> {
        let mut problems = Vec::new();

        let Some(entry) = self.entry() else {
            problems.push("graph has no stages".to_string());
            return problems;
        };

        for id in &self.order {
            let spec = &self.specs[id];
            for next in &spec.successors {
                if let Next::Stage(target) = next
                    && !self.specs.contains_key(target)
                {
                    problems.push(format!(
                        "stage '{}' declares successor '{}', which is not registered",
                        id, target
                    ));
                }
            }
            for candidate in spec.router.candidates() {
                if !spec.allows(candidate) {
                    problems.push(format!(
                        "router of stage '{}' can return '{}', which is not a declared successor",
                        id, candidate
                    ));
                }
            }
        }

        let reachable = self.reachable_from(entry);
        for id in &self.order {
            if !reachable.contains(id) {
                problems.push(format!("stage '{}' is unreachable from '{}'", id, entry));
            }
        }

        for phase in forward {
            if self.phase_entry(*phase).is_none() {
                problems.push(format!("phase '{}' has no registered stage", phase));
            }
        }

        problems
    }

    fn reachable_from(&self, entry: StageId) -> BTreeSet<StageId> {
        let mut seen = BTreeSet::from([entry]);
        let mut queue = VecDeque::from([entry]);
        while let Some(id) = queue.pop_front() {
            let Some(spec) = self.specs.get(&id) else {
                continue;
            };
            for next in &spec.successors {
                if let Next::Stage(target) = next
                    && seen.insert(*target)
                {
                    queue.push_back(*target);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> StateRecord {
        StateRecord::new("e", "r", RequestConfig::default(), StageId::Generation)
    }

    #[test]
    fn first_declared_rule_wins() {
        let router = RuleRouter::new()
            .when(
                "consult",
                |_| true,
                Next::Stage(StageId::Consultation),
            )
            .when("validate", |_| true, Next::Stage(StageId::Validation))
            .otherwise(Next::Terminate);
        assert_eq!(router.route(&state()), Next::Stage(StageId::Consultation));
        assert_eq!(router.labels(), vec!["consult", "validate"]);
    }

    #[test]
    fn falls_back_to_otherwise() {
        let router = RuleRouter::new()
            .when("never", |_| false, Next::Stage(StageId::Consultation))
            .otherwise(Next::Stage(StageId::Validation));
        assert_eq!(router.route(&state()), Next::Stage(StageId::Validation));
        assert_eq!(
            router.candidates(),
            vec![
                Next::Stage(StageId::Consultation),
                Next::Stage(StageId::Validation)
            ]
        );
    }

    #[test]
    fn terminate_is_always_allowed() {
        struct Nop;
        #[async_trait::async_trait]
        impl Stage for Nop {
            fn id(&self) -> StageId {
                StageId::Respond
            }
            fn description(&self) -> &str {
                "nop"
            }
            async fn run(&self, _state: &StateRecord) -> anyhow::Result<crate::stages::StageOutput> {
                Ok(crate::stages::StageOutput::default())
            }
        }
        let spec = StageSpec::new(Arc::new(Nop));
        assert!(spec.allows(Next::Terminate));
        assert!(!spec.allows(Next::Stage(StageId::Generation)));
    }
}
