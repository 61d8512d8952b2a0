//! Invariant engine
//!
//! Holds the invariant registry, validates the dependency graph at
//! startup (it must be acyclic), and evaluates requested invariants in
//! topological order. A failure short-circuits and yields a decision
//! whose action is rollback, or freeze for financial-reconciliation
//! failures. Every evaluation writes a decision record. Enforcement is
//! always blocking; there is no warn-only mode.

use crate::{
    context::CheckContext,
    decision_ledger::DecisionLedger,
    types::{CheckOutcome, Criticality, Decision, EnforcementAction, InvariantId, Phase},
    Error, Result,
};
use chrono::Duration;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;

/// A checkable predicate with enforcement metadata
pub trait Invariant: Send + Sync {
    /// Stable identifier
    fn id(&self) -> InvariantId;

    /// How badly a violation hurts
    fn criticality(&self) -> Criticality;

    /// Invariants that must be evaluated before this one
    fn dependencies(&self) -> Vec<InvariantId> {
        Vec::new()
    }

    /// How old the underlying assumption may be before it must be refreshed
    fn decay_window(&self) -> Option<Duration> {
        None
    }

    /// Action to instruct when this invariant fails
    fn failure_action(&self) -> EnforcementAction {
        EnforcementAction::Rollback
    }

    /// Evaluate the invariant against the supplied facts
    fn check(&self, phase: Phase, ctx: &CheckContext) -> CheckOutcome;
}

/// Engine owning the registry and the dependency DAG
pub struct InvariantEngine {
    invariants: HashMap<InvariantId, Arc<dyn Invariant>>,

    /// Registry ids in one valid topological order
    topo_order: Vec<InvariantId>,

    decisions: Arc<DecisionLedger>,
}

impl InvariantEngine {
    /// Build the engine, validating the dependency graph.
    ///
    /// Fails on duplicate ids, unknown dependencies, or a cycle.
    pub fn new(
        invariants: Vec<Arc<dyn Invariant>>,
        decisions: Arc<DecisionLedger>,
    ) -> Result<Self> {
        let mut by_id: HashMap<InvariantId, Arc<dyn Invariant>> = HashMap::new();
        for inv in invariants {
            if by_id.insert(inv.id(), inv.clone()).is_some() {
                return Err(Error::Registry(format!("Duplicate invariant '{}'", inv.id())));
            }
        }

        let mut graph: DiGraph<InvariantId, ()> = DiGraph::new();
        let mut nodes: HashMap<InvariantId, NodeIndex> = HashMap::new();

        for id in by_id.keys() {
            let idx = graph.add_node(id.clone());
            nodes.insert(id.clone(), idx);
        }

        for (id, inv) in &by_id {
            for dep in inv.dependencies() {
                let dep_idx = nodes
                    .get(&dep)
                    .ok_or_else(|| Error::Registry(format!("'{}' depends on unknown '{}'", id, dep)))?;
                // Edge dep -> dependent, so a topological sort checks deps first
                graph.add_edge(*dep_idx, nodes[id], ());
            }
        }

        let sorted = toposort(&graph, None)
            .map_err(|cycle| Error::DependencyCycle(graph[cycle.node_id()].to_string()))?;

        let topo_order = sorted.into_iter().map(|idx| graph[idx].clone()).collect();

        tracing::info!(count = by_id.len(), "Invariant registry validated");

        Ok(Self {
            invariants: by_id,
            topo_order,
            decisions,
        })
    }

    /// Evaluate one invariant by id and record the decision
    pub fn check(
        &self,
        id: &InvariantId,
        phase: Phase,
        ctx: &CheckContext,
        actor: &str,
    ) -> Result<Decision> {
        self.run_phase(phase, std::slice::from_ref(id), ctx, actor)
    }

    /// Evaluate the named invariants in dependency order.
    ///
    /// Short-circuits on the first failure; every evaluated invariant
    /// writes a decision record.
    pub fn run_phase(
        &self,
        phase: Phase,
        ids: &[InvariantId],
        ctx: &CheckContext,
        actor: &str,
    ) -> Result<Decision> {
        let requested: Vec<&InvariantId> = self
            .topo_order
            .iter()
            .filter(|id| ids.contains(*id))
            .collect();

        for id in ids {
            if !self.invariants.contains_key(id) {
                return Err(Error::UnknownInvariant(id.to_string()));
            }
        }

        for id in requested {
            let invariant = &self.invariants[id];
            let outcome = invariant.check(phase, ctx);

            match outcome {
                CheckOutcome::Pass => {
                    self.decisions.record_check(
                        id,
                        phase,
                        true,
                        EnforcementAction::Proceed,
                        "",
                        serde_json::Value::Null,
                        actor,
                    )?;
                }
                CheckOutcome::Fail { reason } => {
                    let action = invariant.failure_action();

                    tracing::warn!(
                        invariant = %id,
                        %phase,
                        %reason,
                        ?action,
                        "Invariant check failed"
                    );

                    self.decisions.record_check(
                        id,
                        phase,
                        false,
                        action,
                        reason.clone(),
                        ctx.snapshot(),
                        actor,
                    )?;

                    return Ok(Decision {
                        action,
                        failed: Some(id.clone()),
                        reason: Some(reason),
                    });
                }
            }
        }

        Ok(Decision::proceed())
    }

    /// Registered invariant ids in topological order
    pub fn registry(&self) -> &[InvariantId] {
        &self.topo_order
    }

    /// The decision ledger this engine writes to
    pub fn decisions(&self) -> &Arc<DecisionLedger> {
        &self.decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::crypto::KeyPair;

    struct Stub {
        id: &'static str,
        deps: Vec<&'static str>,
        pass: bool,
    }

    impl Invariant for Stub {
        fn id(&self) -> InvariantId {
            InvariantId(self.id)
        }

        fn criticality(&self) -> Criticality {
            Criticality::Critical
        }

        fn dependencies(&self) -> Vec<InvariantId> {
            self.deps.iter().map(|d| InvariantId(d)).collect()
        }

        fn check(&self, _phase: Phase, _ctx: &CheckContext) -> CheckOutcome {
            if self.pass {
                CheckOutcome::Pass
            } else {
                CheckOutcome::fail("stub failure")
            }
        }
    }

    fn engine(invariants: Vec<Arc<dyn Invariant>>) -> Result<InvariantEngine> {
        let decisions = Arc::new(DecisionLedger::new(Arc::new(KeyPair::generate())));
        InvariantEngine::new(invariants, decisions)
    }

    #[test]
    fn test_cycle_rejected_at_startup() {
        let result = engine(vec![
            Arc::new(Stub {
                id: "a",
                deps: vec!["b"],
                pass: true,
            }),
            Arc::new(Stub {
                id: "b",
                deps: vec!["a"],
                pass: true,
            }),
        ]);

        assert!(matches!(result, Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = engine(vec![Arc::new(Stub {
            id: "a",
            deps: vec!["ghost"],
            pass: true,
        })]);

        assert!(matches!(result, Err(Error::Registry(_))));
    }

    #[test]
    fn test_dependency_checked_first_and_short_circuits() {
        let engine = engine(vec![
            Arc::new(Stub {
                id: "dependent",
                deps: vec!["base"],
                pass: true,
            }),
            Arc::new(Stub {
                id: "base",
                deps: vec![],
                pass: false,
            }),
        ])
        .unwrap();

        let decision = engine
            .run_phase(
                Phase::Pre,
                &[InvariantId("dependent"), InvariantId("base")],
                &CheckContext::default(),
                "test",
            )
            .unwrap();

        assert_eq!(decision.action, EnforcementAction::Rollback);
        assert_eq!(decision.failed, Some(InvariantId("base")));
        // Only the failing base was evaluated
        assert_eq!(engine.decisions().len(), 1);
    }

    #[test]
    fn test_all_pass_proceeds() {
        let engine = engine(vec![
            Arc::new(Stub {
                id: "a",
                deps: vec![],
                pass: true,
            }),
            Arc::new(Stub {
                id: "b",
                deps: vec!["a"],
                pass: true,
            }),
        ])
        .unwrap();

        let decision = engine
            .run_phase(
                Phase::Pre,
                &[InvariantId("a"), InvariantId("b")],
                &CheckContext::default(),
                "test",
            )
            .unwrap();

        assert!(decision.is_proceed());
        assert_eq!(engine.decisions().len(), 2);
        assert_eq!(engine.decisions().verify_chain().unwrap(), 2);
    }
}
