//! Node registry and dependency-driven scheduler.
//!
//! [`NodeFactory`] owns every live node. Creating a node wires its
//! dependency slots by id, then a readiness pass starts every node whose
//! dependencies are all started, repeating until nothing more can start.
//! Creation order therefore does not matter: a node waiting on a missing
//! dependency simply stays created until that dependency shows up.
//!
//! All create/destroy/start/stop work runs under the single registry lock.
//! A node's own lock is only ever taken inside its hooks, so the order is
//! always registry first, node second.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::bridge::{ControlReply, NodeRequest, Responder};
use super::error::{NodeError, NodeResult};
use super::node::{NodeHandle, NodeState, StartContext};
use super::node_type::NodeType;
use super::nodes::{self, Backends};
use crate::config::PipelineSettings;

/// Builds a node instance from its id and the shared responder.
pub type NodeConstructor = Box<dyn Fn(&str, Responder) -> NodeHandle + Send + Sync>;

struct NodeCreator {
    create: NodeConstructor,
    singleton: bool,
}

/// Maps lower-cased type names to constructors.
#[derive(Default)]
pub struct NodeRegistry {
    creators: HashMap<String, NodeCreator>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type wired to `backends`.
    pub fn with_builtins(backends: Backends, settings: PipelineSettings) -> Self {
        let mut registry = Self::new();
        for ty in NodeType::all() {
            let backends = backends.clone();
            let settings = settings.clone();
            let ty = *ty;
            registry.register(
                ty.type_name(),
                ty.is_singleton(),
                Box::new(move |id, responder| {
                    nodes::build(ty, id, responder, &backends, &settings)
                }),
            );
        }
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register(&mut self, node_type: &str, singleton: bool, create: NodeConstructor) {
        self.creators
            .insert(node_type.to_ascii_lowercase(), NodeCreator { create, singleton });
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.creators.contains_key(&node_type.to_ascii_lowercase())
    }

    pub fn is_singleton(&self, node_type: &str) -> bool {
        self.creators
            .get(&node_type.to_ascii_lowercase())
            .is_some_and(|c| c.singleton)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.creators.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Outcome of the readiness pass that follows a create or start.
#[derive(Debug, Default)]
pub struct CreateReport {
    /// Nodes that started during this pass, in start order.
    pub started: Vec<String>,
    /// Nodes whose `on_start` failed during this pass.
    pub failed: Vec<(String, NodeError)>,
}

/// Health view of one live node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub state: NodeState,
    pub enabled: bool,
    pub start_failed: bool,
    /// Dependency id and whether it currently resolves.
    pub dependencies: Vec<(String, bool)>,
}

struct NodeEntry {
    node: NodeHandle,
    dependencies: BTreeMap<String, Option<NodeHandle>>,
    dependents: BTreeMap<String, Option<NodeHandle>>,
    order: Vec<String>,
    start_failed: bool,
    held: bool,
}

impl NodeEntry {
    fn id(&self) -> &str {
        self.node.id()
    }

    fn depends_on(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    fn is_ready(&self) -> bool {
        self.dependencies
            .values()
            .all(|slot| slot.as_ref().is_some_and(|n| n.is_started()))
            && self.dependents.values().all(Option::is_some)
    }

    fn start_context(&self) -> StartContext {
        let dependencies = self
            .order
            .iter()
            .filter_map(|id| self.dependencies.get(id).cloned().flatten())
            .collect();
        StartContext {
            dependencies,
            dependents: self.dependents.values().flatten().cloned().collect(),
        }
    }
}

/// The scheduler context: live nodes, their wiring, and the registry.
pub struct NodeFactory {
    registry: NodeRegistry,
    nodes: Mutex<Vec<NodeEntry>>,
    responder: Responder,
}

impl NodeFactory {
    pub fn new(registry: NodeRegistry, responder: Responder) -> Self {
        Self {
            registry,
            nodes: Mutex::new(Vec::new()),
            responder,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    fn lock_nodes(&self) -> MutexGuard<'_, Vec<NodeEntry>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Creation ──

    /// Instantiate a node, wire it into the graph, and start whatever has
    /// become ready.
    pub fn create(&self, request: NodeRequest) -> NodeResult<CreateReport> {
        let node_type = request.node_type.to_ascii_lowercase();
        let mut nodes = self.lock_nodes();

        if nodes.iter().any(|e| e.id() == request.id) {
            return Err(NodeError::AlreadyExists(request.id));
        }
        let creator = self
            .registry
            .creators
            .get(&node_type)
            .ok_or_else(|| NodeError::UnknownType(node_type.clone()))?;
        if creator.singleton && nodes.iter().any(|e| e.node.node_type() == node_type) {
            return Err(NodeError::SingletonConflict(node_type));
        }

        tracing::info!("create node: {}({})", node_type, request.id);
        let node = (creator.create)(&request.id, self.responder.clone());
        if let Err(e) = node.on_create(&request.config) {
            tracing::error!("create node {}({}) failed: {}", node_type, request.id, e);
            return Err(e);
        }

        let lookup = |id: &str| nodes.iter().find(|e| e.id() == id).map(|e| e.node.clone());
        let mut entry = NodeEntry {
            node: node.clone(),
            dependencies: BTreeMap::new(),
            dependents: BTreeMap::new(),
            order: Vec::new(),
            start_failed: false,
            held: false,
        };
        for dep in &request.dependencies {
            if !entry.dependencies.contains_key(dep) {
                entry.order.push(dep.clone());
            }
            entry.dependencies.insert(dep.clone(), lookup(dep));
        }
        for dep in &request.dependents {
            entry.dependents.insert(dep.clone(), lookup(dep));
        }

        // Back-fill slots of existing nodes that were waiting on this id.
        for other in nodes.iter_mut() {
            if let Some(slot) = other.dependencies.get_mut(&request.id) {
                *slot = Some(node.clone());
            }
            if let Some(slot) = other.dependents.get_mut(&request.id) {
                *slot = Some(node.clone());
            }
        }
        nodes.push(entry);

        Ok(Self::resolve(&mut nodes))
    }

    // ── Readiness ──

    fn resolve(nodes: &mut [NodeEntry]) -> CreateReport {
        let mut report = CreateReport::default();
        loop {
            let mut progressed = false;
            for entry in nodes.iter_mut() {
                if entry.node.is_started() || entry.start_failed || entry.held {
                    continue;
                }
                if !entry.is_ready() {
                    continue;
                }
                match Self::start_entry(entry) {
                    Ok(()) if entry.node.is_started() => {
                        report.started.push(entry.id().to_string());
                        progressed = true;
                    }
                    Ok(()) => {}
                    Err(e) => {
                        tracing::error!(
                            "start node {}({}) failed: {}",
                            entry.node.node_type(),
                            entry.id(),
                            e
                        );
                        entry.start_failed = true;
                        report.failed.push((entry.id().to_string(), e));
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        report
    }

    fn start_entry(entry: &NodeEntry) -> NodeResult<()> {
        tracing::info!("start node: {}({})", entry.node.node_type(), entry.id());
        entry.node.on_start(&entry.start_context())
    }

    // ── Teardown ──

    /// Ids of every node that transitively depends on `id` (including
    /// `id`'s declared dependents), deepest first.
    fn dependents_closure(nodes: &[NodeEntry], id: &str) -> Vec<String> {
        let mut visited: Vec<String> = Vec::new();
        let mut queue: Vec<String> = vec![id.to_string()];
        while let Some(current) = queue.pop() {
            let declared = nodes
                .iter()
                .find(|e| e.id() == current)
                .map(|e| e.dependents.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            let direct = nodes
                .iter()
                .filter(|e| e.depends_on(&current))
                .map(|e| e.id().to_string())
                .chain(declared);
            for next in direct {
                if next != id && !visited.contains(&next) && nodes.iter().any(|e| e.id() == next) {
                    visited.push(next.clone());
                    queue.push(next);
                }
            }
        }
        visited.reverse();
        visited
    }

    fn stop_entry(entry: &NodeEntry) {
        if !entry.node.is_started() {
            return;
        }
        tracing::info!("stop node: {}({})", entry.node.node_type(), entry.id());
        if let Err(e) = entry.node.on_stop() {
            tracing::warn!(
                "stop node {}({}) failed: {}",
                entry.node.node_type(),
                entry.id(),
                e
            );
        }
    }

    fn destroy_locked(nodes: &mut Vec<NodeEntry>, id: &str) -> NodeResult<()> {
        let Some(idx) = nodes.iter().position(|e| e.id() == id) else {
            return Err(NodeError::NotFound(id.to_string()));
        };

        for dependent in Self::dependents_closure(nodes, id) {
            if let Some(entry) = nodes.iter().find(|e| e.id() == dependent) {
                Self::stop_entry(entry);
            }
        }

        let entry = nodes.remove(idx);
        Self::stop_entry(&entry);
        tracing::info!("destroy node: {}({})", entry.node.node_type(), id);
        if let Err(e) = entry.node.on_destroy() {
            tracing::warn!("destroy node {}({}) failed: {}", entry.node.node_type(), id, e);
        }

        for other in nodes.iter_mut() {
            if let Some(slot) = other.dependencies.get_mut(id) {
                *slot = None;
            }
            if let Some(slot) = other.dependents.get_mut(id) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Stop whatever depends on `id`, then stop and destroy `id` itself.
    pub fn destroy(&self, id: &str) -> NodeResult<()> {
        let mut nodes = self.lock_nodes();
        Self::destroy_locked(&mut nodes, id)
    }

    /// Destroy every node, dependents before their dependencies.
    pub fn clear(&self) {
        let mut nodes = self.lock_nodes();
        while !nodes.is_empty() {
            // A node nobody else depends on goes first.
            let leaf = nodes
                .iter()
                .find(|candidate| {
                    !nodes.iter().any(|other| {
                        other.id() != candidate.id()
                            && (other.depends_on(candidate.id())
                                || candidate.dependents.contains_key(other.id()))
                    })
                })
                .unwrap_or(&nodes[0])
                .id()
                .to_string();
            if let Err(e) = Self::destroy_locked(&mut nodes, &leaf) {
                tracing::warn!("clear: {}", e);
                break;
            }
        }
        tracing::info!("all nodes cleared");
    }

    // ── Explicit transitions ──

    /// Start one node explicitly. Clears a previous start failure.
    pub fn start(&self, id: &str) -> NodeResult<CreateReport> {
        let mut nodes = self.lock_nodes();
        let entry = nodes
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| NodeError::NotFound(id.to_string()))?;
        entry.held = false;
        entry.start_failed = false;
        if !entry.node.is_started() && !entry.is_ready() {
            return Err(NodeError::WouldBlock);
        }
        let mut report = Self::resolve(&mut nodes);
        if let Some(pos) = report.failed.iter().position(|(failed, _)| failed == id) {
            let (_, err) = report.failed.swap_remove(pos);
            return Err(err);
        }
        Ok(report)
    }

    /// Stop one node (and whatever depends on it). Stopped this way, it is
    /// not restarted by later readiness passes until started explicitly.
    pub fn stop(&self, id: &str) -> NodeResult<()> {
        let mut nodes = self.lock_nodes();
        if !nodes.iter().any(|e| e.id() == id) {
            return Err(NodeError::NotFound(id.to_string()));
        }
        for dependent in Self::dependents_closure(&nodes, id) {
            if let Some(entry) = nodes.iter().find(|e| e.id() == dependent) {
                Self::stop_entry(entry);
            }
        }
        if let Some(entry) = nodes.iter_mut().find(|e| e.id() == id) {
            Self::stop_entry(entry);
            entry.held = true;
        }
        Ok(())
    }

    // ── Lookup & control ──

    pub fn find(&self, id: &str) -> Option<NodeHandle> {
        self.lock_nodes()
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.node.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock_nodes().iter().map(|e| e.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_nodes().is_empty()
    }

    /// Forward a runtime command to a node. Runs outside the registry lock.
    pub fn control(&self, id: &str, name: &str, data: &Value) -> ControlReply {
        match self.find(id) {
            Some(node) => node.on_control(name, data),
            None => ControlReply::error(name, &NodeError::NotFound(id.to_string())),
        }
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.lock_nodes()
            .iter()
            .map(|e| NodeSnapshot {
                id: e.id().to_string(),
                node_type: e.node.node_type().to_string(),
                state: e.node.state(),
                enabled: e.node.core().is_enabled(),
                start_failed: e.start_failed,
                dependencies: e
                    .order
                    .iter()
                    .map(|dep| {
                        let resolved = e.dependencies.get(dep).is_some_and(Option::is_some);
                        (dep.clone(), resolved)
                    })
                    .collect(),
            })
            .collect()
    }
}

impl Drop for NodeFactory {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::node::{Node, NodeCore};
    use proptest::prelude::*;
    use serde_json::json;
    use std::any::Any;

    /// Records lifecycle calls into a shared journal.
    struct JournalNode {
        core: NodeCore,
        journal: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl JournalNode {
        fn log(&self, what: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", what, self.core.id()));
        }
    }

    impl Node for JournalNode {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn on_create(&self, config: &Value) -> NodeResult<()> {
            if config.get("reject").and_then(Value::as_bool) == Some(true) {
                return Err(NodeError::InvalidArgument("rejected".into()));
            }
            self.log("create");
            Ok(())
        }

        fn on_start(&self, ctx: &StartContext) -> NodeResult<()> {
            for dep in &ctx.dependencies {
                assert!(dep.is_started(), "dependency started first");
            }
            if self.fail_start {
                return Err(NodeError::Hal("device missing".into()));
            }
            self.log("start");
            self.core.transition(NodeState::Started)
        }

        fn on_stop(&self) -> NodeResult<()> {
            self.log("stop");
            self.core.transition(NodeState::Stopped)
        }

        fn on_destroy(&self) -> NodeResult<()> {
            self.log("destroy");
            self.core.transition(NodeState::Destroyed)
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn factory(journal: &Arc<Mutex<Vec<String>>>) -> NodeFactory {
        let mut registry = NodeRegistry::new();
        for (name, singleton, fail_start) in [
            ("source", true, false),
            ("sink", false, false),
            ("broken", false, true),
        ] {
            let journal = journal.clone();
            registry.register(
                name,
                singleton,
                Box::new(move |id, responder| {
                    Arc::new(JournalNode {
                        core: NodeCore::new(id, name, responder),
                        journal: journal.clone(),
                        fail_start,
                    })
                }),
            );
        }
        NodeFactory::new(registry, Responder::disconnected())
    }

    fn entries(journal: &Arc<Mutex<Vec<String>>>, prefix: &str) -> Vec<String> {
        journal
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[test]
    fn test_dependency_created_later_starts_consumer() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);

        let report = factory
            .create(NodeRequest::new("model0", "sink").depends_on("cam0"))
            .unwrap();
        assert!(report.started.is_empty());
        assert!(!factory.find("model0").unwrap().is_started());

        let report = factory.create(NodeRequest::new("cam0", "source")).unwrap();
        assert_eq!(report.started, vec!["cam0".to_string(), "model0".to_string()]);
        assert_eq!(entries(&journal, "start"), vec!["start:cam0", "start:model0"]);
    }

    #[test]
    fn test_chain_created_in_reverse_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("c", "sink").depends_on("b")).unwrap();
        factory.create(NodeRequest::new("b", "sink").depends_on("a")).unwrap();
        factory.create(NodeRequest::new("a", "source")).unwrap();
        assert_eq!(entries(&journal, "start"), vec!["start:a", "start:b", "start:c"]);
    }

    #[test]
    fn test_missing_dependency_isolated() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        factory
            .create(NodeRequest::new("orphan", "sink").depends_on("ghost"))
            .unwrap();
        factory
            .create(NodeRequest::new("rec", "sink").depends_on("cam0"))
            .unwrap();
        assert!(factory.find("cam0").unwrap().is_started());
        assert!(factory.find("rec").unwrap().is_started());
        assert!(!factory.find("orphan").unwrap().is_started());
    }

    #[test]
    fn test_declared_dependent_must_exist() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory
            .create(NodeRequest::new("cam0", "source").with_dependent("model0"))
            .unwrap();
        assert!(!factory.find("cam0").unwrap().is_started());
        let report = factory
            .create(NodeRequest::new("model0", "sink").depends_on("cam0"))
            .unwrap();
        assert_eq!(report.started, vec!["cam0".to_string(), "model0".to_string()]);
    }

    #[test]
    fn test_singleton_and_duplicate_id_rejected() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        let err = factory.create(NodeRequest::new("cam1", "Source")).unwrap_err();
        assert!(matches!(err, NodeError::SingletonConflict(_)));
        let err = factory.create(NodeRequest::new("cam0", "sink")).unwrap_err();
        assert!(matches!(err, NodeError::AlreadyExists(_)));
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn test_unknown_type_and_rejected_config_leave_registry_unchanged() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        let err = factory.create(NodeRequest::new("x", "hologram")).unwrap_err();
        assert!(matches!(err, NodeError::UnknownType(_)));
        let err = factory
            .create(NodeRequest::new("y", "sink").with_config(json!({ "reject": true })))
            .unwrap_err();
        assert_eq!(err.code().as_i32(), 5);
        assert!(factory.is_empty());
    }

    #[test]
    fn test_start_failure_is_reported_and_not_retried() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        let report = factory
            .create(NodeRequest::new("bad", "broken").depends_on("cam0"))
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");

        // Another create does not retry the failed node.
        let report = factory
            .create(NodeRequest::new("rec", "sink").depends_on("cam0"))
            .unwrap();
        assert_eq!(report.started, vec!["rec".to_string()]);
        assert!(report.failed.is_empty());

        // An explicit start does.
        assert!(matches!(factory.start("bad"), Err(NodeError::Hal(_))));
    }

    #[test]
    fn test_destroy_stops_dependents_and_nulls_slots() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        factory
            .create(NodeRequest::new("model0", "sink").depends_on("cam0"))
            .unwrap();
        factory
            .create(NodeRequest::new("post", "sink").depends_on("model0"))
            .unwrap();

        factory.destroy("cam0").unwrap();
        assert_eq!(
            entries(&journal, "stop"),
            vec!["stop:post", "stop:model0", "stop:cam0"]
        );
        assert!(factory.find("cam0").is_none());
        let snapshot = factory.snapshot();
        let model = snapshot.iter().find(|s| s.id == "model0").unwrap();
        assert_eq!(model.dependencies, vec![("cam0".to_string(), false)]);
        assert_eq!(model.state, NodeState::Stopped);

        // Re-creating the camera restarts the chain.
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        assert!(factory.find("post").unwrap().is_started());
    }

    #[test]
    fn test_destroy_unknown_is_not_found() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        assert!(matches!(factory.destroy("nope"), Err(NodeError::NotFound(_))));
    }

    #[test]
    fn test_clear_destroys_dependents_first() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        factory
            .create(NodeRequest::new("model0", "sink").depends_on("cam0"))
            .unwrap();
        factory.clear();
        assert!(factory.is_empty());
        assert_eq!(
            entries(&journal, "destroy"),
            vec!["destroy:model0", "destroy:cam0"]
        );
    }

    #[test]
    fn test_explicit_stop_holds_node() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        factory
            .create(NodeRequest::new("model0", "sink").depends_on("cam0"))
            .unwrap();
        factory.stop("model0").unwrap();
        factory.create(NodeRequest::new("rec", "sink").depends_on("cam0")).unwrap();
        assert!(!factory.find("model0").unwrap().is_started());
        factory.start("model0").unwrap();
        assert!(factory.find("model0").unwrap().is_started());
    }

    #[test]
    fn test_control_unknown_node_replies_not_found() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let factory = factory(&journal);
        let reply = factory.control("ghost", "enabled", &json!(true));
        assert_eq!(reply.code, 10);
        factory.create(NodeRequest::new("cam0", "source")).unwrap();
        let reply = factory.control("cam0", "zoom", &Value::Null);
        assert_eq!(reply.code, 8);
    }

    /// Per node, the lower-numbered nodes it depends on, plus a creation order.
    fn dag_and_order() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
        (1usize..9).prop_flat_map(|n| {
            let deps: Vec<_> = (0..n)
                .map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i))
                .collect();
            let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            (deps, order)
        })
    }

    proptest! {
        #[test]
        fn test_any_dag_in_any_order_starts_dependencies_first((deps, order) in dag_and_order()) {
            let journal = Arc::new(Mutex::new(Vec::new()));
            let factory = factory(&journal);
            for &i in &order {
                let mut request = NodeRequest::new(format!("n{}", i), "sink");
                for &d in &deps[i] {
                    request = request.depends_on(format!("n{}", d));
                }
                factory.create(request).unwrap();
            }

            let starts = entries(&journal, "start");
            prop_assert_eq!(starts.len(), deps.len());
            let position = |i: usize| starts.iter().position(|e| *e == format!("start:n{}", i));
            for (i, node_deps) in deps.iter().enumerate() {
                let own = position(i);
                prop_assert!(own.is_some());
                let name = format!("n{}", i);
                prop_assert!(factory.find(&name).unwrap().is_started());
                for &d in node_deps {
                    prop_assert!(position(d) < own, "n{} started before its dependency n{}", i, d);
                }
            }
        }
    }
}
