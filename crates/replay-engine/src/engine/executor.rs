//! Workflow engine
//!
//! Walks a [`Workflow`] from its start node, dispatching each node to its
//! handler and following the first viable guarded edge. Every step attempt is
//! reported to the [`ExecutionRuntime`]; the debugger is consulted before
//! every dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use replay_elements::{ElementRegistry, UIElement};
use serde_json::{json, Value};
use tokio::time::Instant;

use super::action::{ActionPerformer, ActionRequest};
use super::context::ExecutionContext;
use super::nodes::{
    self, parse_config, ActionConfig, LoopConfig, NodeOutcome, ParallelConfig, WaitConfig,
};
use crate::debugger::Debugger;
use crate::error::{EngineError, ExpressionError, Result};
use crate::expression::{DefaultEvaluator, ExpressionEvaluator};
use crate::runtime::{ExecutionRuntime, ExecutionStatus, LogLevel, StepRecord, STOPPED_BY_USER};
use crate::workflow::{ErrorPolicy, NodeId, NodeType, Workflow, WorkflowEdge, WorkflowNode};

/// Executes workflows against an action collaborator
pub struct WorkflowEngine {
    performer: Arc<dyn ActionPerformer>,
    /// Read-only during replay
    registry: Arc<ElementRegistry>,
    debugger: Arc<Debugger>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl WorkflowEngine {
    pub fn new(performer: Arc<dyn ActionPerformer>) -> Self {
        Self {
            performer,
            registry: Arc::new(ElementRegistry::new()),
            debugger: Arc::new(Debugger::new()),
            evaluator: Arc::new(DefaultEvaluator),
        }
    }

    pub fn with_registry(mut self, registry: Arc<ElementRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_debugger(mut self, debugger: Arc<Debugger>) -> Self {
        self.debugger = debugger;
        self
    }

    /// Evaluator for guards, conditions, loops, waits and scripts
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn registry(&self) -> &Arc<ElementRegistry> {
        &self.registry
    }

    pub fn debugger(&self) -> &Arc<Debugger> {
        &self.debugger
    }

    /// Execute a workflow to a terminal status
    ///
    /// Always returns the context; success or failure is carried by the
    /// runtime's record.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        variables: HashMap<String, Value>,
        runtime: &ExecutionRuntime,
    ) -> ExecutionContext {
        let ctx = ExecutionContext::new(workflow.id(), runtime.id(), HashMap::new());
        runtime.attach_bindings(ctx.bindings());

        if let Err(e) = runtime.start() {
            log::warn!("[{}] Cannot start execution: {}", runtime.id(), e);
            return ctx;
        }

        match bind_variables(workflow, variables) {
            Ok(bound) => ctx.apply(bound),
            Err(e) => {
                finish(runtime, Err(Halt::Failed(e.to_string()))).await;
                return ctx;
            }
        }

        let Some(start) = workflow.start_node() else {
            finish(
                runtime,
                Err(Halt::Failed("Workflow has no unique start node".to_string())),
            )
            .await;
            return ctx;
        };

        let walk = Walk {
            engine: self,
            workflow,
            runtime,
            ctx: &ctx,
            dispatched: AtomicU32::new(0),
        };
        let result = walk.walk(start.id.clone(), None).await;

        ctx.set_current_node(None);
        runtime.clear_next_step();
        finish(runtime, result).await;
        ctx
    }
}

/// Bind initial values over declared defaults and check declared types
fn bind_variables(
    workflow: &Workflow,
    mut initial: HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut bound = HashMap::new();
    for variable in workflow.variables() {
        match initial.remove(&variable.name) {
            Some(value) => {
                if !variable.var_type.matches(&value) {
                    return Err(EngineError::InvalidVariable {
                        name: variable.name.clone(),
                        expected: variable.var_type.to_string(),
                    });
                }
                bound.insert(variable.name.clone(), value);
            }
            None => match &variable.default_value {
                Some(default) => {
                    bound.insert(variable.name.clone(), default.clone());
                }
                None if variable.required => {
                    return Err(EngineError::MissingVariable(variable.name.clone()));
                }
                None => {}
            },
        }
    }
    // Undeclared bindings pass through untouched
    bound.extend(initial);
    Ok(bound)
}

/// Move the runtime to its terminal status
///
/// A pause that landed while the last node was in flight holds the terminal
/// transition until resume or stop.
async fn finish(runtime: &ExecutionRuntime, result: std::result::Result<(), Halt>) {
    loop {
        runtime.wait_while_paused().await;
        if runtime.is_stopped() {
            return;
        }
        let transition = match &result {
            Ok(()) => runtime.complete(),
            Err(Halt::Failed(error)) => runtime.fail(error.clone()),
            Err(Halt::Stopped) => return,
        };
        match transition {
            Ok(()) => return,
            // Paused again between the wait and the transition
            Err(_) if runtime.status() == ExecutionStatus::Paused => continue,
            Err(e) => {
                log::warn!("[{}] Terminal transition rejected: {}", runtime.id(), e);
                return;
            }
        }
    }
}

/// Why a walk ended early
#[derive(Debug, Clone)]
enum Halt {
    Stopped,
    Failed(String),
}

/// Failure of a single node dispatch
enum NodeError {
    /// Subject to the node's error policy
    Failed(EngineError),
    /// A nested walk halted; bypasses the error policy
    Halted(Halt),
}

impl From<EngineError> for NodeError {
    fn from(e: EngineError) -> Self {
        NodeError::Failed(e)
    }
}

impl From<ExpressionError> for NodeError {
    fn from(e: ExpressionError) -> Self {
        NodeError::Failed(e.into())
    }
}

type NodeResult = std::result::Result<NodeOutcome, NodeError>;

/// State of one in-flight walk, shared by nested loop and parallel walks
struct Walk<'a> {
    engine: &'a WorkflowEngine,
    workflow: &'a Workflow,
    runtime: &'a ExecutionRuntime,
    ctx: &'a ExecutionContext,
    /// Dispatches so far, across all nested walks
    dispatched: AtomicU32,
}

impl<'a> Walk<'a> {
    /// Walk from `from` until there is no continuation or `stop_at` is reached
    fn walk<'s>(
        &'s self,
        from: NodeId,
        stop_at: Option<&'s str>,
    ) -> BoxFuture<'s, std::result::Result<(), Halt>> {
        async move {
            let mut current = from;
            loop {
                if stop_at == Some(current.as_str()) {
                    return Ok(());
                }
                let node = self.workflow.node(&current).ok_or_else(|| {
                    Halt::Failed(format!("Node '{}' not found in workflow", current))
                })?;

                self.checkpoint(node).await?;
                self.dispatch_with_policy(node).await?;

                if self.runtime.is_stopped() {
                    return Err(Halt::Stopped);
                }

                let next = match node.node_type {
                    NodeType::Parallel => parse_config::<ParallelConfig>(node)
                        .map(|config| config.join)
                        .map_err(|e| Halt::Failed(e.to_string()))?,
                    NodeType::Loop => {
                        let config: LoopConfig =
                            parse_config(node).map_err(|e| Halt::Failed(e.to_string()))?;
                        self.select_edge(node, Some(config.body.as_str()))?
                    }
                    _ => self.select_edge(node, None)?,
                };

                match next {
                    Some(next) => current = next,
                    None => return Ok(()),
                }
            }
        }
        .boxed()
    }

    /// Suspension point before every dispatch
    async fn checkpoint(&self, node: &WorkflowNode) -> std::result::Result<(), Halt> {
        if self.runtime.is_stopped() {
            return Err(Halt::Stopped);
        }

        let max_steps = self.runtime.config().max_steps;
        if self.dispatched.fetch_add(1, Ordering::SeqCst) >= max_steps {
            return Err(Halt::Failed(format!(
                "Execution limit reached ({} nodes)",
                max_steps
            )));
        }

        self.ctx.set_current_node(Some(node.id.clone()));
        self.runtime
            .set_next_step(StepRecord::pending(&node.id, node.config.clone()));

        let bindings = self.ctx.variables();
        if self.engine.debugger.should_break(&node.id, &bindings) {
            if let Err(e) = self.runtime.pause_at(&node.id) {
                log::debug!("[{}] Breakpoint ignored: {}", self.runtime.id(), e);
            }
        }

        self.runtime.wait_while_paused().await;

        if self.runtime.is_stopped() {
            return Err(Halt::Stopped);
        }
        Ok(())
    }

    /// Dispatch a node, applying its error policy
    async fn dispatch_with_policy(&self, node: &WorkflowNode) -> std::result::Result<(), Halt> {
        let policy = node
            .on_error
            .clone()
            .unwrap_or_else(|| self.runtime.config().default_error_policy.clone());
        let total_attempts = policy.total_attempts(self.runtime.config().retry_count);
        let mut attempt = 1;

        loop {
            let mut step = StepRecord::running(&node.id, node.config.clone(), attempt);
            self.runtime.begin_step(&step);

            let error = match self.dispatch(node, &step).await {
                Ok(outcome) => {
                    self.ctx.apply(outcome.updates);
                    step.finish(outcome.status, outcome.output);
                    self.finish_step(step);
                    return Ok(());
                }
                Err(NodeError::Halted(halt)) => {
                    let message = match &halt {
                        Halt::Stopped => STOPPED_BY_USER.to_string(),
                        Halt::Failed(message) => message.clone(),
                    };
                    step.fail(message);
                    self.finish_step(step);
                    return Err(halt);
                }
                Err(NodeError::Failed(error)) => error.to_string(),
            };

            step.fail(&error);
            self.finish_step(step);
            // The stop entry stays the last word in the log
            if self.runtime.is_stopped() {
                return Err(Halt::Stopped);
            }
            self.runtime.log(
                LogLevel::Error,
                format!(
                    "Node '{}' failed (attempt {}/{}): {}",
                    node.id, attempt, total_attempts, error
                ),
                json!({ "nodeId": node.id, "attempt": attempt }),
            );

            if attempt < total_attempts {
                attempt += 1;
                let delay = self.runtime.config().retry_delay();
                if !delay.is_zero() {
                    self.sleep_or_stop(delay).await.map_err(|_| Halt::Stopped)?;
                }
                // Retries are dispatches too; hold them while paused
                self.runtime.wait_while_paused().await;
                if self.runtime.is_stopped() {
                    return Err(Halt::Stopped);
                }
                continue;
            }

            return match policy {
                ErrorPolicy::Continue => {
                    self.runtime.log(
                        LogLevel::Warn,
                        format!("Continuing past failed node '{}'", node.id),
                        json!({ "nodeId": node.id }),
                    );
                    Ok(())
                }
                ErrorPolicy::Stop | ErrorPolicy::Retry { .. } => Err(Halt::Failed(error)),
            };
        }
    }

    fn finish_step(&self, step: StepRecord) {
        self.ctx.push_step(step.clone());
        self.runtime.record_step(step);
    }

    async fn dispatch(&self, node: &WorkflowNode, step: &StepRecord) -> NodeResult {
        let evaluator = self.engine.evaluator.as_ref();
        match node.node_type {
            NodeType::Action => Ok(self.execute_action(node, step).await?),
            NodeType::Condition => {
                Ok(nodes::execute_condition(node, &self.ctx.variables(), evaluator)?)
            }
            NodeType::Script => Ok(nodes::execute_script(node, &self.ctx.variables(), evaluator)?),
            NodeType::Wait => self.execute_wait(node).await,
            NodeType::Loop => self.execute_loop(node).await,
            NodeType::Parallel => self.execute_parallel(node).await,
        }
    }

    /// First outgoing edge (in declaration order) whose guard passes
    ///
    /// `Ok(None)` when the node has no outgoing edges.
    fn select_edge(
        &self,
        node: &WorkflowNode,
        exclude_target: Option<&str>,
    ) -> std::result::Result<Option<NodeId>, Halt> {
        let candidates: Vec<&WorkflowEdge> = self
            .workflow
            .outgoing_edges(&node.id)
            .filter(|e| Some(e.target.as_str()) != exclude_target)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let bindings = self.ctx.variables();
        candidates
            .into_iter()
            .find(|edge| self.guard_passes(edge, &bindings))
            .map(|edge| Some(edge.target.clone()))
            .ok_or_else(|| {
                Halt::Failed(format!("No viable continuation from node '{}'", node.id))
            })
    }

    /// A guard that cannot be evaluated counts as false
    fn guard_passes(&self, edge: &WorkflowEdge, bindings: &HashMap<String, Value>) -> bool {
        let Some(guard) = &edge.guard else {
            return true;
        };
        match self.engine.evaluator.evaluate_bool(guard, bindings) {
            Ok(passes) => passes,
            Err(e) => {
                self.runtime.log(
                    LogLevel::Warn,
                    format!("Guard on edge '{}' could not be evaluated: {}", edge.id, e),
                    json!({ "edgeId": edge.id, "guard": guard }),
                );
                false
            }
        }
    }

    async fn execute_action(&self, node: &WorkflowNode, step: &StepRecord) -> Result<NodeOutcome> {
        let config: ActionConfig = parse_config(node)?;
        if config.action.trim().is_empty() {
            return Err(EngineError::invalid_config(&node.id, "action is required"));
        }

        let engine_config = self.runtime.config();
        if engine_config.dry_run {
            self.runtime.log(
                LogLevel::Info,
                format!("Dry run: skipping '{}' on node '{}'", config.action, node.id),
                json!({ "nodeId": node.id }),
            );
            return Ok(NodeOutcome::skipped(
                json!({ "dryRun": true, "action": config.action }),
            ));
        }

        let element = match &config.element {
            Some(element_id) => Some(self.resolve_element(&node.id, element_id)?),
            None => None,
        };

        let request = ActionRequest {
            execution_id: self.runtime.id().to_string(),
            node_id: node.id.clone(),
            action: config.action.clone(),
            params: config.params.clone(),
            element,
            bindings: self.ctx.variables(),
        };

        let timeout_ms = config.timeout_ms.unwrap_or(engine_config.action_timeout_ms);
        let output = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.engine.performer.perform_action(request),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    node_id: node.id.clone(),
                    timeout_ms,
                })
            }
        };

        if engine_config.capture_screenshots {
            if let Some(data) = self.engine.performer.capture_screenshot(self.runtime.id()).await {
                self.runtime.attach_artifact(Some(step.id.clone()), data);
            }
        }

        let mut outcome = NodeOutcome::completed(output.clone());
        if let Some(variable) = config.output_variable {
            outcome = outcome.with_update(variable, output);
        }
        Ok(outcome)
    }

    /// Look up and re-validate the element an action refers to
    fn resolve_element(&self, node_id: &str, element_id: &str) -> Result<UIElement> {
        let registry = &self.engine.registry;
        let element = registry.get(element_id).ok_or_else(|| {
            EngineError::selector(node_id, format!("element '{}' is not registered", element_id))
        })?;
        let selector = element.selector.clone().ok_or_else(|| {
            EngineError::selector(node_id, format!("element '{}' has no selector", element_id))
        })?;

        let validation = registry.validate(element_id, &selector);
        if validation.match_count > 1 {
            return Err(EngineError::selector(
                node_id,
                format!(
                    "selector for element '{}' is ambiguous ({} matches)",
                    element_id, validation.match_count
                ),
            ));
        }
        if !validation.is_valid {
            return Err(EngineError::selector(
                node_id,
                format!("element '{}' could not be located", element_id),
            ));
        }

        let threshold = self.runtime.config().min_selector_confidence;
        if validation.confidence <= threshold {
            return Err(EngineError::selector(
                node_id,
                format!(
                    "confidence {:.2} for element '{}' does not exceed {:.2}",
                    validation.confidence, element_id, threshold
                ),
            ));
        }
        Ok(element)
    }

    async fn execute_wait(&self, node: &WorkflowNode) -> NodeResult {
        let config: WaitConfig = parse_config(node)?;
        if config.duration_ms.is_none() && config.until.is_none() {
            return Err(EngineError::invalid_config(&node.id, "wait needs durationMs or until").into());
        }

        let started = Instant::now();
        if let Some(duration_ms) = config.duration_ms {
            self.sleep_or_stop(Duration::from_millis(duration_ms)).await?;
        }

        if let Some(until) = &config.until {
            let engine_config = self.runtime.config();
            let timeout_ms = config.timeout_ms.unwrap_or(engine_config.wait_timeout_ms);
            let poll = config
                .poll_interval_ms
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or_else(|| engine_config.wait_poll_interval());
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);

            while !self
                .engine
                .evaluator
                .evaluate_bool(until, &self.ctx.variables())?
            {
                let now = Instant::now();
                if now >= deadline {
                    return Err(EngineError::Timeout {
                        node_id: node.id.clone(),
                        timeout_ms,
                    }
                    .into());
                }
                self.sleep_or_stop(poll.min(deadline - now)).await?;
            }
        }

        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(NodeOutcome::completed(json!({ "waitedMs": waited_ms })))
    }

    async fn sleep_or_stop(&self, duration: Duration) -> std::result::Result<(), NodeError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.runtime.stopped() => Err(NodeError::Halted(Halt::Stopped)),
        }
    }

    /// Re-enter the body while the guard holds, bounded by the iteration cap
    async fn execute_loop(&self, node: &WorkflowNode) -> NodeResult {
        let config: LoopConfig = parse_config(node)?;
        let cap = config
            .max_iterations
            .unwrap_or(self.runtime.config().max_loop_iterations);
        let mut iterations: u32 = 0;

        loop {
            let next = iterations + 1;
            self.ctx.set_variable(&config.iteration_variable, json!(next));

            let keep_going = self
                .engine
                .evaluator
                .evaluate_bool(&config.condition, &self.ctx.variables())?;
            if !keep_going {
                break;
            }
            if next > cap {
                return Err(EngineError::node(
                    &node.id,
                    format!("Loop exceeded maximum of {} iterations", cap),
                )
                .into());
            }

            self.runtime.log(
                LogLevel::Debug,
                format!("Loop '{}' iteration {}", node.id, next),
                json!({ "nodeId": node.id, "iteration": next }),
            );
            self.walk(config.body.clone(), Some(node.id.as_str()))
                .await
                .map_err(NodeError::Halted)?;
            iterations = next;
        }

        Ok(NodeOutcome::completed(json!({ "iterations": iterations }))
            .with_update(config.iteration_variable, json!(iterations)))
    }

    /// Run every branch with a passing guard concurrently, up to the join
    ///
    /// Branch step records interleave in completion order.
    async fn execute_parallel(&self, node: &WorkflowNode) -> NodeResult {
        let config: ParallelConfig = parse_config(node)?;
        let join = config.join.as_deref();

        let bindings = self.ctx.variables();
        let targets: Vec<NodeId> = self
            .workflow
            .outgoing_edges(&node.id)
            .filter(|edge| Some(edge.target.as_str()) != join)
            .filter(|edge| self.guard_passes(edge, &bindings))
            .map(|edge| edge.target.clone())
            .collect();

        let results = join_all(targets.iter().map(|target| self.walk(target.clone(), join))).await;

        let mut failure = None;
        for result in results {
            match result {
                Ok(()) => {}
                Err(Halt::Stopped) => return Err(NodeError::Halted(Halt::Stopped)),
                Err(halt) => {
                    failure.get_or_insert(halt);
                }
            }
        }
        if let Some(halt) = failure {
            return Err(NodeError::Halted(halt));
        }

        Ok(NodeOutcome::completed(json!({ "branches": targets.len() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{EventSink, NullEventSink, VecEventSink};
    use crate::runtime::{ExecutionStatus, StepStatus};
    use crate::workflow::{Variable, VariableType, WorkflowBuilder};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use replay_elements::{Bounds, SelectorGenerator};
    use std::collections::HashSet;
    use tokio::sync::Notify;

    /// Records calls; optionally fails, delays or blocks specific nodes
    #[derive(Default)]
    struct MockPerformer {
        calls: Mutex<Vec<String>>,
        elements: Mutex<Vec<Option<String>>>,
        failing: HashSet<String>,
        delay_ms: u64,
        gate: Option<(String, Arc<Notify>)>,
    }

    impl MockPerformer {
        fn failing(nodes: &[&str]) -> Self {
            Self {
                failing: nodes.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ActionPerformer for MockPerformer {
        async fn perform_action(&self, request: ActionRequest) -> Result<Value> {
            self.calls.lock().push(request.node_id.clone());
            self.elements
                .lock()
                .push(request.element.as_ref().map(|e| e.id.clone()));

            if let Some((node_id, gate)) = &self.gate {
                if *node_id == request.node_id {
                    gate.notified().await;
                }
            }
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.failing.contains(&request.node_id) {
                return Err(EngineError::node(&request.node_id, "boom"));
            }
            Ok(json!({ "node": request.node_id }))
        }

        async fn capture_screenshot(&self, _execution_id: &str) -> Option<String> {
            Some("c2NyZWVu".to_string())
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn action(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeType::Action).with_config(json!({ "action": "click" }))
    }

    fn linear() -> Workflow {
        WorkflowBuilder::new("wf", "Linear")
            .node(action("a"))
            .node(action("b"))
            .connect("a", "b")
            .build()
            .unwrap()
    }

    fn runtime(config: EngineConfig) -> Arc<ExecutionRuntime> {
        Arc::new(ExecutionRuntime::open("wf", config, Arc::new(NullEventSink)))
    }

    async fn run(
        engine: &WorkflowEngine,
        workflow: &Workflow,
        variables: HashMap<String, Value>,
        config: EngineConfig,
    ) -> (Arc<ExecutionRuntime>, ExecutionContext) {
        let rt = runtime(config);
        let ctx = engine.execute(workflow, variables, &rt).await;
        (rt, ctx)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_linear_workflow_completes() {
        init_logging();
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let (rt, ctx) = run(&engine, &linear(), HashMap::new(), EngineConfig::default()).await;

        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.steps.len(), 2);
        assert!(record.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(performer.calls(), vec!["a", "b"]);
        assert_eq!(ctx.steps().len(), 2);
        assert!(ctx.current_node().is_none());
    }

    #[tokio::test]
    async fn test_guard_picks_first_truthy_edge() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Branch")
            .node(action("a"))
            .node(action("b"))
            .node(action("c"))
            .connect_if("a", "b", "x > 0")
            .connect("a", "c")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, vars(&[("x", json!(-1))]), EngineConfig::default()).await;
        assert_eq!(rt.status(), ExecutionStatus::Completed);
        assert_eq!(performer.calls(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_no_viable_continuation_fails() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Dead end")
            .node(action("a"))
            .node(action("b"))
            .connect_if("a", "b", "x > 0")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, vars(&[("x", json!(-1))]), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().contains("No viable continuation from node 'a'"));
    }

    #[tokio::test]
    async fn test_broken_guard_counts_as_false() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Broken guard")
            .node(action("a"))
            .node(action("b"))
            .node(action("c"))
            .connect_if("a", "b", "x >")
            .connect("a", "c")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        assert_eq!(rt.status(), ExecutionStatus::Completed);
        assert_eq!(performer.calls(), vec!["a", "c"]);
        assert!(rt.record().logs.iter().any(|l| l.level == LogLevel::Warn));
    }

    #[tokio::test]
    async fn test_retry_produces_one_record_per_attempt() {
        init_logging();
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::failing(&["a"])));
        let workflow = WorkflowBuilder::new("wf", "Retry")
            .node(action("a").with_error_policy(ErrorPolicy::Retry { max_attempts: Some(2) }))
            .node(action("b"))
            .connect("a", "b")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);

        let attempts: Vec<_> = record.steps_for("a").iter().map(|s| s.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(record.steps.iter().all(|s| s.status == StepStatus::Failed));
        assert!(record.steps_for("b").is_empty());
        assert!(record.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_continue_policy_proceeds() {
        let performer = Arc::new(MockPerformer::failing(&["a"]));
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Continue")
            .node(action("a").with_error_policy(ErrorPolicy::Continue))
            .node(action("b"))
            .connect("a", "b")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.steps[0].status, StepStatus::Failed);
        assert_eq!(record.steps[1].status, StepStatus::Completed);
        assert_eq!(performer.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_default_error_policy_from_config() {
        let performer = Arc::new(MockPerformer::failing(&["a"]));
        let engine = WorkflowEngine::new(performer.clone());
        let config = EngineConfig {
            default_error_policy: ErrorPolicy::Continue,
            ..Default::default()
        };
        let (rt, _) = run(&engine, &linear(), HashMap::new(), config).await;
        assert_eq!(rt.status(), ExecutionStatus::Completed);
        assert_eq!(performer.calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_condition_result_feeds_guards() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Condition")
            .add_node("check", NodeType::Condition)
            .with_config(json!({ "expression": "count > 5" }))
            .node(action("big"))
            .node(action("small"))
            .connect_if("check", "big", "$condition")
            .connect("check", "small")
            .build()
            .unwrap();

        let (_, ctx) = run(&engine, &workflow, vars(&[("count", json!(9))]), EngineConfig::default()).await;
        assert_eq!(performer.calls(), vec!["big"]);
        assert_eq!(ctx.variable("$condition"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_script_updates_bindings() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Script")
            .add_node("calc", NodeType::Script)
            .with_config(json!({ "script": "total = a + b; doubled = total * 2" }))
            .build()
            .unwrap();

        let (rt, ctx) = run(
            &engine,
            &workflow,
            vars(&[("a", json!(2)), ("b", json!(3))]),
            EngineConfig::default(),
        )
        .await;
        assert_eq!(ctx.variable("doubled"), Some(json!(10)));
        assert_eq!(rt.record().variables["total"], json!(5));
    }

    fn counting_loop(condition: &str, max_iterations: Option<u32>) -> Workflow {
        let mut config = json!({ "condition": condition, "body": "inc" });
        if let Some(max) = max_iterations {
            config["maxIterations"] = json!(max);
        }
        WorkflowBuilder::new("wf", "Loop")
            .add_node("init", NodeType::Script)
            .with_config(json!({ "script": "count = 0" }))
            .add_node("loop", NodeType::Loop)
            .with_config(config)
            .add_node("inc", NodeType::Script)
            .with_config(json!({ "script": "count = count + 1" }))
            .node(action("done"))
            .connect("init", "loop")
            .connect("loop", "inc")
            .connect("inc", "loop")
            .connect("loop", "done")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_loop_runs_body_while_guard_holds() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let (rt, ctx) = run(
            &engine,
            &counting_loop("count < 3", None),
            HashMap::new(),
            EngineConfig::default(),
        )
        .await;

        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(ctx.variable("count"), Some(json!(3)));
        assert_eq!(record.steps_for("inc").len(), 3);
        assert_eq!(record.steps_for("loop")[0].output, Some(json!({ "iterations": 3 })));
        // The body edge is not taken again once the loop is done
        assert_eq!(performer.calls(), vec!["done"]);
    }

    #[tokio::test]
    async fn test_loop_cap_exceeded_fails() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let (rt, _) = run(
            &engine,
            &counting_loop("true", Some(2)),
            HashMap::new(),
            EngineConfig::default(),
        )
        .await;

        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.steps_for("inc").len(), 2);
        assert!(record.error.unwrap().contains("maximum of 2 iterations"));
    }

    #[tokio::test]
    async fn test_max_steps_bounds_cycles() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Cycle")
            .node(action("s"))
            .node(action("a"))
            .node(action("b"))
            .connect("s", "a")
            .connect("a", "b")
            .connect("b", "a")
            .build()
            .unwrap();
        let config = EngineConfig {
            max_steps: 5,
            ..Default::default()
        };

        let (rt, _) = run(&engine, &workflow, HashMap::new(), config).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.steps.len(), 5);
        assert_eq!(record.error.as_deref(), Some("Execution limit reached (5 nodes)"));
    }

    #[tokio::test]
    async fn test_parallel_branches_meet_at_join() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Fan out")
            .add_node("fan", NodeType::Parallel)
            .with_config(json!({ "join": "merge" }))
            .node(action("left"))
            .node(action("right"))
            .node(action("merge"))
            .connect("fan", "left")
            .connect("fan", "right")
            .connect("left", "merge")
            .connect("right", "merge")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);

        // Branch order is not deterministic; the join runs once, last
        let calls = performer.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[..2].contains(&"left".to_string()));
        assert!(calls[..2].contains(&"right".to_string()));
        assert_eq!(calls[2], "merge");
        assert_eq!(record.steps_for("fan")[0].output, Some(json!({ "branches": 2 })));
    }

    #[tokio::test]
    async fn test_failed_branch_fails_parallel() {
        let performer = Arc::new(MockPerformer::failing(&["left"]));
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Fan out")
            .add_node("fan", NodeType::Parallel)
            .node(action("left"))
            .node(action("right"))
            .connect("fan", "left")
            .connect("fan", "right")
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.steps_for("fan")[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Wait")
            .add_node("w", NodeType::Wait)
            .with_config(json!({ "until": "ready", "timeoutMs": 30, "pollIntervalMs": 5 }))
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().contains("timed out after 30ms"));
    }

    #[tokio::test]
    async fn test_wait_until_already_true() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Wait")
            .add_node("w", NodeType::Wait)
            .with_config(json!({ "until": "ready", "timeoutMs": 30 }))
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, vars(&[("ready", json!(true))]), EngineConfig::default()).await;
        assert_eq!(rt.status(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_wait_without_duration_or_predicate_is_invalid() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Wait")
            .add_node("w", NodeType::Wait)
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        assert!(rt.record().error.unwrap().contains("durationMs or until"));
    }

    #[tokio::test]
    async fn test_stop_during_wait() {
        let performer = Arc::new(MockPerformer::default());
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let workflow = Arc::new(
            WorkflowBuilder::new("wf", "Long wait")
                .add_node("w", NodeType::Wait)
                .with_config(json!({ "durationMs": 60_000 }))
                .node(action("after"))
                .connect("w", "after")
                .build()
                .unwrap(),
        );
        let rt = runtime(EngineConfig::default());

        let task = {
            let (engine, workflow, rt) = (engine.clone(), workflow.clone(), rt.clone());
            tokio::spawn(async move { engine.execute(&workflow, HashMap::new(), &rt).await })
        };

        let watched = rt.clone();
        wait_until(move || {
            watched
                .snapshot()
                .next_step
                .is_some_and(|s| s.node_id == "w")
        })
        .await;
        rt.stop(Some("user cancelled")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("stopped by user: user cancelled"));
        assert!(performer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pause_before_next_node() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            gate: Some(("a".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let workflow = Arc::new(linear());
        let rt = runtime(EngineConfig::default());

        let task = {
            let (engine, workflow, rt) = (engine.clone(), workflow.clone(), rt.clone());
            tokio::spawn(async move { engine.execute(&workflow, HashMap::new(), &rt).await })
        };

        let watched = performer.clone();
        wait_until(move || watched.calls() == vec!["a"]).await;
        rt.pause().unwrap();
        gate.notify_one();

        let watched = rt.clone();
        wait_until(move || {
            watched
                .snapshot()
                .next_step
                .is_some_and(|s| s.node_id == "b")
        })
        .await;

        let snapshot = rt.snapshot();
        assert_eq!(snapshot.status, ExecutionStatus::Paused);
        assert_eq!(snapshot.steps.len(), 1);
        assert_eq!(snapshot.steps[0].node_id, "a");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(performer.calls(), vec!["a"]);

        rt.resume().unwrap();
        task.await.unwrap();
        assert_eq!(rt.status(), ExecutionStatus::Completed);
        assert_eq!(performer.calls(), vec!["a", "b"]);
    }

    fn spawn_execute(
        engine: &Arc<WorkflowEngine>,
        workflow: Workflow,
        rt: &Arc<ExecutionRuntime>,
    ) -> tokio::task::JoinHandle<ExecutionContext> {
        let (engine, rt) = (engine.clone(), rt.clone());
        tokio::spawn(async move { engine.execute(&workflow, HashMap::new(), &rt).await })
    }

    #[tokio::test]
    async fn test_pause_during_last_node_holds_completion() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            gate: Some(("b".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, linear(), &rt);

        let watched = performer.clone();
        wait_until(move || watched.calls() == vec!["a", "b"]).await;
        rt.pause().unwrap();
        gate.notify_one();

        let watched = rt.clone();
        wait_until(move || watched.record().steps.len() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rt.status(), ExecutionStatus::Paused);
        assert!(!task.is_finished());

        rt.resume().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rt.wait_for_terminal())
            .await
            .unwrap();
        assert_eq!(rt.status(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_while_paused_after_last_node() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            gate: Some(("b".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, linear(), &rt);

        let watched = performer.clone();
        wait_until(move || watched.calls() == vec!["a", "b"]).await;
        rt.pause().unwrap();
        gate.notify_one();
        let watched = rt.clone();
        wait_until(move || watched.record().steps.len() == 2).await;

        rt.stop(None).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("stopped by user"));
    }

    #[tokio::test]
    async fn test_retry_held_while_paused() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            failing: ["a".to_string()].into_iter().collect(),
            gate: Some(("a".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let workflow = WorkflowBuilder::new("wf", "Retry")
            .node(action("a").with_error_policy(ErrorPolicy::retry(1)))
            .build()
            .unwrap();
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, workflow, &rt);

        let watched = performer.clone();
        wait_until(move || watched.calls() == vec!["a"]).await;
        rt.pause().unwrap();
        gate.notify_one();

        let watched = rt.clone();
        wait_until(move || watched.record().steps.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rt.status(), ExecutionStatus::Paused);
        assert_eq!(performer.calls(), vec!["a"]);

        rt.resume().unwrap();
        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(performer.calls(), vec!["a", "a"]);
        assert_eq!(record.steps_for("a").len(), 2);
    }

    #[tokio::test]
    async fn test_stop_during_action() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            gate: Some(("a".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, linear(), &rt);

        let watched = performer.clone();
        wait_until(move || watched.calls() == vec!["a"]).await;
        rt.stop(None).unwrap();
        gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("stopped by user"));
        // The action in flight finishes and is recorded; nothing follows it
        assert_eq!(record.steps_for("a")[0].status, StepStatus::Completed);
        assert_eq!(performer.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_stop_during_failing_action_skips_retries() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            failing: ["a".to_string()].into_iter().collect(),
            gate: Some(("a".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let workflow = WorkflowBuilder::new("wf", "Retry")
            .node(action("a").with_error_policy(ErrorPolicy::retry(2)))
            .build()
            .unwrap();
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, workflow, &rt);

        let watched = performer.clone();
        wait_until(move || watched.calls() == vec!["a"]).await;
        rt.stop(None).unwrap();
        gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let record = rt.record();
        assert_eq!(record.error.as_deref(), Some("stopped by user"));
        assert_eq!(record.steps_for("a").len(), 1);
        assert_eq!(performer.calls(), vec!["a"]);
        assert_eq!(
            record.logs.last().map(|l| l.message.as_str()),
            Some("Execution stopped by user")
        );
    }

    fn fan_out() -> Workflow {
        WorkflowBuilder::new("wf", "Fan out")
            .add_node("fan", NodeType::Parallel)
            .node(action("left"))
            .node(action("after_left"))
            .node(action("right"))
            .connect("fan", "left")
            .connect("fan", "right")
            .connect("left", "after_left")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_pause_inside_parallel_branch() {
        let gate = Arc::new(Notify::new());
        let performer = Arc::new(MockPerformer {
            gate: Some(("left".to_string(), gate.clone())),
            ..Default::default()
        });
        let engine = Arc::new(WorkflowEngine::new(performer.clone()));
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, fan_out(), &rt);

        let watched = performer.clone();
        wait_until(move || {
            let calls = watched.calls();
            calls.contains(&"left".to_string()) && calls.contains(&"right".to_string())
        })
        .await;
        rt.pause().unwrap();
        gate.notify_one();

        let watched = rt.clone();
        wait_until(move || !watched.record().steps_for("left").is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rt.status(), ExecutionStatus::Paused);
        assert!(!performer.calls().contains(&"after_left".to_string()));

        rt.resume().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rt.status(), ExecutionStatus::Completed);
        assert_eq!(performer.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_breakpoint_inside_parallel_branch() {
        let performer = Arc::new(MockPerformer::default());
        let debugger = Arc::new(Debugger::new());
        debugger.add_breakpoint("after_left", None);
        let engine = Arc::new(WorkflowEngine::new(performer.clone()).with_debugger(debugger));
        let rt = runtime(EngineConfig::default());
        let task = spawn_execute(&engine, fan_out(), &rt);

        let watched = rt.clone();
        wait_until(move || watched.status() == ExecutionStatus::Paused).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!performer.calls().contains(&"after_left".to_string()));
        assert_eq!(
            rt.record().logs.iter().filter(|l| l.message.contains("Breakpoint hit")).count(),
            1
        );

        rt.resume().unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.steps_for("after_left").len(), 1);
    }

    #[tokio::test]
    async fn test_breakpoint_pauses_before_dispatch() {
        let performer = Arc::new(MockPerformer::default());
        let debugger = Arc::new(Debugger::new());
        debugger.add_breakpoint("b", None);
        let engine = Arc::new(WorkflowEngine::new(performer.clone()).with_debugger(debugger));
        let workflow = Arc::new(linear());
        let rt = runtime(EngineConfig::default());

        let task = {
            let (engine, workflow, rt) = (engine.clone(), workflow.clone(), rt.clone());
            tokio::spawn(async move { engine.execute(&workflow, HashMap::new(), &rt).await })
        };

        let watched = rt.clone();
        wait_until(move || watched.status() == ExecutionStatus::Paused).await;
        let snapshot = rt.snapshot();
        assert_eq!(snapshot.next_step.map(|s| s.node_id), Some("b".to_string()));
        assert_eq!(snapshot.steps.len(), 1);
        assert_eq!(performer.calls(), vec!["a"]);

        rt.resume().unwrap();
        task.await.unwrap();
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        // Resuming neither skips nor repeats a step
        assert_eq!(record.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_false_breakpoint_never_pauses() {
        let sink = Arc::new(VecEventSink::new());
        let debugger = Arc::new(Debugger::new());
        debugger.add_breakpoint("b", Some("false"));
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default())).with_debugger(debugger);
        let rt = ExecutionRuntime::open("wf", EngineConfig::default(), sink.clone());

        engine.execute(&linear(), HashMap::new(), &rt).await;
        assert_eq!(rt.status(), ExecutionStatus::Completed);
        assert!(!sink.names().contains(&"executionPaused"));
    }

    #[tokio::test]
    async fn test_missing_required_variable() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let workflow = WorkflowBuilder::new("wf", "Needs url")
            .node(action("a"))
            .add_variable(Variable::new("url", VariableType::String).required())
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Missing required variable: url"));
        assert!(record.steps.is_empty());
        assert!(performer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_variable_binding() {
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let workflow = WorkflowBuilder::new("wf", "Vars")
            .node(action("a"))
            .add_variable(Variable::new("retries", VariableType::Number).with_default(json!(3)))
            .add_variable(Variable::new("name", VariableType::String).with_default(json!("x")))
            .build()
            .unwrap();

        let (_, ctx) = run(
            &engine,
            &workflow,
            vars(&[("name", json!("override")), ("extra", json!(true))]),
            EngineConfig::default(),
        )
        .await;
        assert_eq!(ctx.variable("retries"), Some(json!(3)));
        assert_eq!(ctx.variable("name"), Some(json!("override")));
        assert_eq!(ctx.variable("extra"), Some(json!(true)));

        let (rt, _) = run(&engine, &workflow, vars(&[("retries", json!("many"))]), EngineConfig::default()).await;
        assert_eq!(
            rt.record().error.as_deref(),
            Some("Invalid value for variable 'retries': expected number")
        );
    }

    #[tokio::test]
    async fn test_dry_run_skips_actions() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let config = EngineConfig {
            dry_run: true,
            ..Default::default()
        };

        let (rt, _) = run(&engine, &linear(), HashMap::new(), config).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.steps.iter().all(|s| s.status == StepStatus::Skipped));
        assert!(performer.calls().is_empty());
    }

    fn click_element(element: &str) -> Workflow {
        WorkflowBuilder::new("wf", "Click")
            .add_node("click", NodeType::Action)
            .with_config(json!({
                "action": "click",
                "element": element,
                "outputVariable": "clicked"
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unregistered_element_fails_resolution() {
        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone());
        let (rt, _) = run(&engine, &click_element("ghost"), HashMap::new(), EngineConfig::default()).await;

        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().starts_with("Selector resolution failed for node 'click'"));
        assert!(performer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolved_element_reaches_performer() {
        let registry = Arc::new(ElementRegistry::new());
        let submit = UIElement::new(
            "submit",
            "button",
            "button",
            "Submit",
            Bounds::new(10.0, 10.0, 80.0, 24.0),
        );
        let selector = SelectorGenerator::generate(&submit);
        registry.add(submit.with_selector(selector));

        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone()).with_registry(registry.clone());
        let config = EngineConfig {
            capture_screenshots: true,
            ..Default::default()
        };
        let (rt, ctx) = run(&engine, &click_element("submit"), HashMap::new(), config).await;

        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(*performer.elements.lock(), vec![Some("submit".to_string())]);
        assert_eq!(ctx.variable("clicked"), Some(json!({ "node": "click" })));
        assert!(registry.selector_validation("submit").unwrap().is_valid);
        assert_eq!(record.artifacts.len(), 1);
        assert_eq!(record.artifacts[0].step_id.as_deref(), Some(record.steps[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_confidence_threshold() {
        let registry = Arc::new(ElementRegistry::new());
        let submit = UIElement::new("submit", "button", "button", "Submit", Bounds::default());
        let selector = SelectorGenerator::generate(&submit);
        registry.add(submit.with_selector(selector));

        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default())).with_registry(registry);
        let config = EngineConfig {
            min_selector_confidence: 1.1,
            ..Default::default()
        };
        let (rt, _) = run(&engine, &click_element("submit"), HashMap::new(), config).await;
        assert!(rt.record().error.unwrap().contains("does not exceed"));
    }

    #[tokio::test]
    async fn test_confidence_at_threshold_is_rejected() {
        let registry = Arc::new(ElementRegistry::new());
        let submit = UIElement::new("submit", "button", "button", "Submit", Bounds::default());
        let selector = SelectorGenerator::generate(&submit);
        let confidence = selector.confidence;
        registry.add(submit.with_selector(selector));

        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone()).with_registry(registry);
        let config = EngineConfig {
            min_selector_confidence: confidence,
            ..Default::default()
        };
        let (rt, _) = run(&engine, &click_element("submit"), HashMap::new(), config).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().contains("does not exceed"));
        assert!(performer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_selector_fails_resolution() {
        let registry = Arc::new(ElementRegistry::new());
        let ok = UIElement::new("ok", "button", "button", "OK", Bounds::default());
        let mut selector = SelectorGenerator::generate(&ok);
        selector.primary = "role:button".into();
        selector.fallback.clear();
        registry.add(ok.with_selector(selector));
        registry.add(UIElement::new("other", "button", "button", "Cancel", Bounds::default()));

        let performer = Arc::new(MockPerformer::default());
        let engine = WorkflowEngine::new(performer.clone()).with_registry(registry);
        let (rt, _) = run(&engine, &click_element("ok"), HashMap::new(), EngineConfig::default()).await;
        let record = rt.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().contains("ambiguous (2 matches)"));
        assert!(performer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_action_timeout() {
        let performer = Arc::new(MockPerformer {
            delay_ms: 500,
            ..Default::default()
        });
        let engine = WorkflowEngine::new(performer);
        let workflow = WorkflowBuilder::new("wf", "Slow")
            .add_node("slow", NodeType::Action)
            .with_config(json!({ "action": "click", "timeoutMs": 20 }))
            .build()
            .unwrap();

        let (rt, _) = run(&engine, &workflow, HashMap::new(), EngineConfig::default()).await;
        assert_eq!(
            rt.record().error.as_deref(),
            Some("Node 'slow' timed out after 20ms")
        );
    }

    #[tokio::test]
    async fn test_event_order() {
        let sink = Arc::new(VecEventSink::new());
        let engine = WorkflowEngine::new(Arc::new(MockPerformer::default()));
        let rt = ExecutionRuntime::open("wf", EngineConfig::default(), sink.clone() as Arc<dyn EventSink>);

        engine.execute(&linear(), HashMap::new(), &rt).await;

        let names: Vec<_> = sink
            .names()
            .into_iter()
            .filter(|n| *n != "logEntry")
            .collect();
        assert_eq!(
            names,
            vec![
                "executionStarted",
                "stepStarted",
                "stepCompleted",
                "stepStarted",
                "stepCompleted",
                "executionCompleted"
            ]
        );
        assert!(sink.events().iter().all(|e| e.execution_id() == rt.id()));
    }
}
