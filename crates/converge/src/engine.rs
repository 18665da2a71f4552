//! Reconciliation passes: plan, apply, destroy.
//!
//! A pass moves through Loading, Refreshing, Diffing and Applying. The
//! engine owns ordering, bounded parallelism, retries and state
//! persistence; adapters own the remote calls.
//!
//! Failure semantics: a resource that fails permanently blocks its
//! transitive dependents, and nothing else. Unrelated resources keep
//! converging, successful operations stay recorded, and the pass finishes
//! with a partial result instead of rolling anything back. The next pass
//! picks up from whatever state was reached.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rayon::prelude::*;

use crate::error::{ConfigError, EngineError, ProviderError, StateError};
use crate::expr::AttrRef;
use crate::graph::DependencyGraph;
use crate::plan::{self, Action, ChangeOp, Plan};
use crate::provider::{ProviderAdapter, ProviderRegistry};
use crate::resource::{self, Resource, ResourceRef};
use crate::retry::{self, RetryCallback, RetryPolicy};
use crate::store::{ObservedState, StateEntry, StateStore};

/// Phases of a reconciliation pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading recorded state
    Loading,
    /// Re-reading remote state for recorded resources
    Refreshing,
    /// Computing the plan
    Diffing,
    /// Executing operations
    Applying,
}

/// How one executed operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    /// The operation succeeded and state was recorded
    Applied,
    /// Nothing needed doing
    Unchanged,
    /// The operation failed; the error is surfaced verbatim
    Failed(ProviderError),
    /// Not attempted because the named dependency failed
    Blocked(ResourceRef),
}

/// Progress callbacks for a running pass.
///
/// Called from worker threads during parallel waves, hence the `Sync`
/// bound and `&self` receivers.
pub trait ProgressCallback: Send + Sync {
    /// Called when the pass enters a phase.
    fn on_phase(&self, phase: Phase);

    /// Called when an operation starts executing.
    fn on_op_start(&self, op: &ChangeOp);

    /// Called when an operation finishes, fails, or is blocked.
    fn on_op_complete(&self, op: &ChangeOp, outcome: &OpOutcome);

    /// Called when a transient failure is about to be retried.
    fn on_retry(
        &self,
        resource: &ResourceRef,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: Duration,
    );
}

/// No-op progress callback.
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase(&self, _phase: Phase) {}
    fn on_op_start(&self, _op: &ChangeOp) {}
    fn on_op_complete(&self, _op: &ChangeOp, _outcome: &OpOutcome) {}
    fn on_retry(&self, _: &ResourceRef, _: u32, _: u32, _: &ProviderError, _: Duration) {}
}

/// Shared cancellation flag.
///
/// Checked between operations: whatever is in flight completes, queued
/// work is abandoned and reported as cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running pass.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tuning knobs for a pass.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum concurrent operations within a wave
    pub jobs: usize,
    /// Retry policy for transient provider failures
    pub retry: RetryPolicy,
    /// Whether planning re-reads remote state before diffing
    pub refresh: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryPolicy::default(),
            refresh: true,
        }
    }
}

/// Overall result of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Everything the plan called for was applied
    Converged,
    /// At least one operation failed, was blocked, or was cancelled
    PartiallyFailed,
}

/// What happened to each resource during apply or destroy.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Successfully executed operations, in completion order
    pub applied: Vec<(ResourceRef, Action)>,
    /// Resources that were already converged
    pub unchanged: Vec<ResourceRef>,
    /// Failed resources with the error that stopped them
    pub failed: Vec<(ResourceRef, ProviderError)>,
    /// Blocked resources with the failed dependency that blocked them
    pub blocked: Vec<(ResourceRef, ResourceRef)>,
    /// Resources abandoned after cancellation
    pub cancelled: Vec<ResourceRef>,
}

impl ApplyReport {
    /// Outcome of the pass.
    pub fn outcome(&self) -> PassOutcome {
        if self.is_success() {
            PassOutcome::Converged
        } else {
            PassOutcome::PartiallyFailed
        }
    }

    /// Whether every planned operation was applied.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.cancelled.is_empty()
    }

    /// Count applied operations with a given action.
    pub fn count(&self, action: Action) -> usize {
        self.applied.iter().filter(|(_, a)| *a == action).count()
    }
}

/// Recover the guard from a poisoned mutex; a panicked worker must not
/// wedge the rest of the pass.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    mutex.into_inner().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards retry notifications to the pass progress callback.
struct ForwardRetry<'a> {
    resource: &'a ResourceRef,
    progress: &'a dyn ProgressCallback,
}

impl RetryCallback for ForwardRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        log::debug!(
            "retrying {} in {:?} (attempt {}/{}): {}",
            self.resource,
            delay,
            attempt,
            max_attempts,
            error
        );
        self.progress
            .on_retry(self.resource, attempt, max_attempts, error, delay);
    }
}

/// Mutable bookkeeping shared by the workers of one pass.
struct PassExec<'a> {
    progress: &'a dyn ProgressCallback,
    adapters: BTreeMap<ResourceRef, Arc<dyn ProviderAdapter>>,
    catalog: BTreeMap<ResourceRef, &'a Resource>,
    prior: BTreeMap<ResourceRef, StateEntry>,
    live: Mutex<BTreeMap<ResourceRef, ObservedState>>,
    applied: Mutex<Vec<(ResourceRef, Action)>>,
    failed: Mutex<BTreeMap<ResourceRef, ProviderError>>,
    blocked: Mutex<Vec<(ResourceRef, ResourceRef)>>,
    cancelled: Mutex<Vec<ResourceRef>>,
    fatal: Mutex<Option<StateError>>,
}

/// The reconciliation engine: a provider registry, a state store, and the
/// pass logic tying them together.
pub struct Engine<S> {
    registry: ProviderRegistry,
    store: Mutex<S>,
    options: EngineOptions,
    cancel: CancelFlag,
}

impl<S: StateStore + Send> Engine<S> {
    /// Create an engine with default options.
    pub fn new(registry: ProviderRegistry, store: S) -> Self {
        Self {
            registry,
            store: Mutex::new(store),
            options: EngineOptions::default(),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the engine options.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an externally owned cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for requesting cancellation from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Load the recorded state, e.g. for resolving outputs.
    pub fn recorded(&self) -> Result<BTreeMap<ResourceRef, StateEntry>, EngineError> {
        Ok(lock(&self.store).load()?)
    }

    /// Compute the plan for one pass.
    ///
    /// Validates the catalog, builds the graph, loads state, refreshes
    /// observed state (unless disabled), and diffs. With targets, the pass
    /// narrows to the targets plus their transitive dependencies; orphan
    /// cleanup is skipped in that case.
    pub fn plan(
        &self,
        resources: &[Resource],
        targets: &[ResourceRef],
        progress: &dyn ProgressCallback,
    ) -> Result<Plan, EngineError> {
        resource::validate(resources)?;
        self.registry.ensure_registered(resources)?;
        let full_graph = DependencyGraph::build(resources)?;

        let selected: Vec<Resource> = if targets.is_empty() {
            resources.to_vec()
        } else {
            let mut keep: BTreeSet<ResourceRef> = BTreeSet::new();
            for target in targets {
                if !full_graph.contains(target) {
                    return Err(ConfigError::UnknownTarget {
                        target: target.clone(),
                    }
                    .into());
                }
                keep.insert(target.clone());
                keep.extend(full_graph.dependencies_of(target));
            }
            resources
                .iter()
                .filter(|r| keep.contains(&r.address))
                .cloned()
                .collect()
        };
        let graph = DependencyGraph::build(&selected)?;

        progress.on_phase(Phase::Loading);
        let mut state = lock(&self.store).load()?;
        if !targets.is_empty() {
            state.retain(|address, _| graph.contains(address));
        }

        for address in state.keys() {
            self.registry.adapter_for(address)?;
        }

        let mut observed = BTreeMap::new();
        if self.options.refresh && !state.is_empty() {
            progress.on_phase(Phase::Refreshing);
            for (address, entry) in &state {
                let adapter = self.registry.adapter_for(address)?;
                let callback = ForwardRetry {
                    resource: address,
                    progress,
                };
                let current = retry::with_retry(&self.options.retry, Some(&callback), || {
                    adapter.read(address, &entry.observed)
                })
                .map_err(|source| EngineError::Refresh {
                    resource: address.clone(),
                    source,
                })?;
                if current.is_none() {
                    log::info!("{address} no longer exists remotely");
                }
                observed.insert(address.clone(), current);
            }
        } else {
            for (address, entry) in &state {
                observed.insert(address.clone(), Some(entry.observed.clone()));
            }
        }

        progress.on_phase(Phase::Diffing);
        let plan = plan::plan_changes(&selected, &graph, &state, &observed)?;
        log::debug!(
            "planned {} changes across {} resources",
            plan.change_count(),
            selected.len()
        );
        Ok(plan)
    }

    /// Execute a plan against the full resource catalog.
    ///
    /// Creates and updates run in dependency order, destroys in reverse
    /// dependency order, independent operations within a wave in parallel
    /// up to the configured job count. Every successful operation is
    /// persisted before anything that depends on it may start.
    pub fn apply(
        &self,
        resources: &[Resource],
        plan: &Plan,
        progress: &dyn ProgressCallback,
    ) -> Result<ApplyReport, EngineError> {
        let graph = DependencyGraph::build(resources)?;
        let catalog: BTreeMap<ResourceRef, &Resource> = resources
            .iter()
            .map(|r| (r.address.clone(), r))
            .collect();

        progress.on_phase(Phase::Loading);
        let prior = lock(&self.store).load()?;

        let mut destroys: Vec<&ChangeOp> = Vec::new();
        let mut changes: Vec<&ChangeOp> = Vec::new();
        let mut unchanged: Vec<ResourceRef> = Vec::new();
        for op in &plan.ops {
            match op.action {
                Action::Destroy => destroys.push(op),
                Action::NoOp => unchanged.push(op.resource.clone()),
                Action::Create | Action::Update => {
                    if !catalog.contains_key(&op.resource) {
                        return Err(ConfigError::UnknownTarget {
                            target: op.resource.clone(),
                        }
                        .into());
                    }
                    changes.push(op);
                }
            }
        }

        let mut adapters = BTreeMap::new();
        for op in destroys.iter().chain(changes.iter()) {
            let adapter = self.registry.adapter_for(&op.resource)?;
            adapters.insert(op.resource.clone(), Arc::clone(adapter));
        }

        let destroy_graph = teardown_graph(&destroys, &prior)?;
        let destroy_waves = group_waves(&destroys, &destroy_graph);
        let change_graph = change_subgraph(resources, &changes, &graph)?;
        let change_waves = group_waves(&changes, &change_graph);

        let live: BTreeMap<ResourceRef, ObservedState> = prior
            .iter()
            .map(|(address, entry)| (address.clone(), entry.observed.clone()))
            .collect();

        let exec = PassExec {
            progress,
            adapters,
            catalog,
            prior,
            live: Mutex::new(live),
            applied: Mutex::new(Vec::new()),
            failed: Mutex::new(BTreeMap::new()),
            blocked: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
        };

        progress.on_phase(Phase::Applying);
        let pool = if self.options.jobs > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.options.jobs)
                    .build()
                    .map_err(|e| EngineError::Pool(e.to_string()))?,
            )
        } else {
            None
        };

        // Orphans and teardown come first so replacements never collide
        // with what they replace.
        self.run_waves(&destroy_waves, &destroy_graph, &exec, pool.as_ref());
        self.run_waves(&change_waves, &change_graph, &exec, pool.as_ref());

        if let Some(error) = into_inner(exec.fatal) {
            return Err(error.into());
        }

        let mut report = ApplyReport {
            applied: into_inner(exec.applied),
            unchanged,
            failed: into_inner(exec.failed).into_iter().collect(),
            blocked: into_inner(exec.blocked),
            cancelled: into_inner(exec.cancelled),
        };
        report.cancelled.sort();
        report.cancelled.dedup();
        Ok(report)
    }

    /// Compute a teardown plan from recorded state.
    ///
    /// With targets, the teardown narrows to the targets plus their
    /// transitive dependents, since nothing may outlive what it depends
    /// on.
    pub fn destroy_plan(&self, targets: &[ResourceRef]) -> Result<Plan, EngineError> {
        let state = lock(&self.store).load()?;
        for address in state.keys() {
            self.registry.adapter_for(address)?;
        }

        if targets.is_empty() {
            return Ok(plan::plan_destroy(&state)?);
        }

        let recorded_graph = recorded_graph(&state)?;
        let mut keep: BTreeSet<ResourceRef> = BTreeSet::new();
        for target in targets {
            if !state.contains_key(target) {
                return Err(ConfigError::UnknownTarget {
                    target: target.clone(),
                }
                .into());
            }
            keep.insert(target.clone());
            keep.extend(recorded_graph.dependents_of(target));
        }

        let subset: BTreeMap<ResourceRef, StateEntry> = state
            .into_iter()
            .filter(|(address, _)| keep.contains(address))
            .collect();
        Ok(plan::plan_destroy(&subset)?)
    }

    /// Execute a teardown plan.
    pub fn destroy(
        &self,
        plan: &Plan,
        progress: &dyn ProgressCallback,
    ) -> Result<ApplyReport, EngineError> {
        self.apply(&[], plan, progress)
    }

    fn run_waves(
        &self,
        waves: &[Vec<&ChangeOp>],
        order: &DependencyGraph,
        exec: &PassExec<'_>,
        pool: Option<&rayon::ThreadPool>,
    ) {
        for (index, wave) in waves.iter().enumerate() {
            if lock(&exec.fatal).is_some() {
                return;
            }
            if self.cancel.is_cancelled() {
                let mut cancelled = lock(&exec.cancelled);
                for op in waves[index..].iter().flatten() {
                    cancelled.push(op.resource.clone());
                }
                return;
            }

            let mut runnable: Vec<&ChangeOp> = Vec::new();
            for op in wave {
                match self.blocking_dependency(op, order, exec) {
                    Some(dep) => {
                        let outcome = OpOutcome::Blocked(dep.clone());
                        exec.progress.on_op_complete(op, &outcome);
                        lock(&exec.blocked).push((op.resource.clone(), dep));
                    }
                    None => runnable.push(op),
                }
            }

            match pool {
                Some(pool) if runnable.len() > 1 => pool.install(|| {
                    runnable.par_iter().for_each(|op| self.run_op(op, exec));
                }),
                _ => {
                    for op in &runnable {
                        if self.cancel.is_cancelled() {
                            lock(&exec.cancelled).push(op.resource.clone());
                            continue;
                        }
                        self.run_op(op, exec);
                    }
                }
            }
        }
    }

    /// The failed resource this operation must not run after, if any.
    ///
    /// Each phase orders its graph so predecessors must finish first: for
    /// changes those are dependencies, for destroys the teardown graph
    /// already reverses the edges so predecessors are dependents.
    fn blocking_dependency(
        &self,
        op: &ChangeOp,
        order: &DependencyGraph,
        exec: &PassExec<'_>,
    ) -> Option<ResourceRef> {
        let failed = lock(&exec.failed);
        order
            .dependencies_of(&op.resource)
            .into_iter()
            .find(|address| failed.contains_key(address))
    }

    fn run_op(&self, op: &ChangeOp, exec: &PassExec<'_>) {
        if self.cancel.is_cancelled() {
            lock(&exec.cancelled).push(op.resource.clone());
            return;
        }

        exec.progress.on_op_start(op);
        let outcome = match op.action {
            Action::Destroy => self.run_destroy(op, exec),
            _ => self.run_change(op, exec),
        };
        exec.progress.on_op_complete(op, &outcome);

        if let OpOutcome::Failed(error) = outcome {
            log::warn!("{} failed: {}", op.resource, error);
            lock(&exec.failed).insert(op.resource.clone(), error);
        }
    }

    fn run_change(&self, op: &ChangeOp, exec: &PassExec<'_>) -> OpOutcome {
        let resource = exec.catalog[&op.resource];
        let adapter = &exec.adapters[&op.resource];

        // Dependencies finished before this wave started, so a snapshot of
        // the live outputs is complete for reference resolution.
        let snapshot = lock(&exec.live).clone();
        let lookup = |attr_ref: &AttrRef| {
            snapshot
                .get(&attr_ref.resource)
                .and_then(|current| current.get(&attr_ref.attribute))
                .cloned()
        };
        let desired = match plan::resolve_attributes(&resource.attributes, &lookup) {
            Ok(desired) => desired,
            Err(unresolved) => {
                return OpOutcome::Failed(ProviderError::permanent(
                    "unresolved-reference",
                    unresolved.to_string(),
                ));
            }
        };

        let callback = ForwardRetry {
            resource: &op.resource,
            progress: exec.progress,
        };
        let prior = snapshot.get(&op.resource);
        let result = retry::with_retry(&self.options.retry, Some(&callback), || {
            match (op.action, prior) {
                (Action::Update, Some(prior)) => adapter.update(&op.resource, &desired, prior),
                _ => adapter.create(&op.resource, &desired),
            }
        });

        match result {
            Ok(observed) => {
                let entry = StateEntry {
                    resource: op.resource.clone(),
                    observed: observed.clone(),
                    dependencies: resource.dependencies(),
                };
                if let Err(error) = lock(&self.store).save(entry) {
                    // A store that cannot persist makes every further
                    // operation unsafe to record; stop the pass.
                    *lock(&exec.fatal) = Some(error);
                    self.cancel.cancel();
                    return OpOutcome::Applied;
                }
                lock(&exec.live).insert(op.resource.clone(), observed);
                lock(&exec.applied).push((op.resource.clone(), op.action));
                OpOutcome::Applied
            }
            Err(error) => OpOutcome::Failed(error),
        }
    }

    fn run_destroy(&self, op: &ChangeOp, exec: &PassExec<'_>) -> OpOutcome {
        let Some(entry) = exec.prior.get(&op.resource) else {
            return OpOutcome::Unchanged;
        };
        let adapter = &exec.adapters[&op.resource];

        let callback = ForwardRetry {
            resource: &op.resource,
            progress: exec.progress,
        };
        let result = retry::with_retry(&self.options.retry, Some(&callback), || {
            adapter.delete(&op.resource, &entry.observed)
        });

        match result {
            Ok(()) => {
                if let Err(error) = lock(&self.store).remove(&op.resource) {
                    *lock(&exec.fatal) = Some(error);
                    self.cancel.cancel();
                    return OpOutcome::Applied;
                }
                lock(&exec.live).remove(&op.resource);
                lock(&exec.applied).push((op.resource.clone(), Action::Destroy));
                OpOutcome::Applied
            }
            Err(error) => OpOutcome::Failed(error),
        }
    }
}

/// Ordering graph for a teardown set, built from recorded dependencies
/// with the edges reversed so waves come out leaves first.
fn teardown_graph(
    destroys: &[&ChangeOp],
    state: &BTreeMap<ResourceRef, StateEntry>,
) -> Result<DependencyGraph, ConfigError> {
    let set: BTreeSet<&ResourceRef> = destroys.iter().map(|op| &op.resource).collect();
    let mut reversed: BTreeMap<&ResourceRef, Vec<ResourceRef>> =
        set.iter().map(|address| (*address, Vec::new())).collect();
    for address in &set {
        if let Some(entry) = state.get(*address) {
            for dep in &entry.dependencies {
                if let Some(dependents) = reversed.get_mut(dep) {
                    dependents.push((*address).clone());
                }
            }
        }
    }

    let synthesized: Vec<Resource> = reversed
        .into_iter()
        .map(|(address, depends_on)| {
            let mut resource = Resource::new(&address.kind, &address.name);
            resource.depends_on = depends_on;
            resource
        })
        .collect();
    DependencyGraph::build(&synthesized)
}

/// Ordering graph over just the changing resources, with edges for every
/// transitive dependency between them, so unchanged resources in the
/// middle of a chain still enforce ordering.
fn change_subgraph(
    resources: &[Resource],
    changes: &[&ChangeOp],
    graph: &DependencyGraph,
) -> Result<DependencyGraph, ConfigError> {
    let set: BTreeSet<&ResourceRef> = changes.iter().map(|op| &op.resource).collect();
    let synthesized: Vec<Resource> = resources
        .iter()
        .filter(|r| set.contains(&r.address))
        .map(|r| {
            let mut synthesized = Resource::new(&r.address.kind, &r.address.name);
            synthesized.depends_on = graph
                .dependencies_of(&r.address)
                .into_iter()
                .filter(|dep| set.contains(dep))
                .collect();
            synthesized
        })
        .collect();
    DependencyGraph::build(&synthesized)
}

/// Non-reversed graph over every recorded entry, for dependent closures.
fn recorded_graph(state: &BTreeMap<ResourceRef, StateEntry>) -> Result<DependencyGraph, ConfigError> {
    let synthesized: Vec<Resource> = state
        .values()
        .map(|entry| {
            let mut resource = Resource::new(&entry.resource.kind, &entry.resource.name);
            resource.depends_on = entry
                .dependencies
                .iter()
                .filter(|dep| state.contains_key(*dep))
                .cloned()
                .collect();
            resource
        })
        .collect();
    DependencyGraph::build(&synthesized)
}

/// Group a pass's operations into the waves of an ordering graph.
fn group_waves<'a>(ops: &[&'a ChangeOp], order: &DependencyGraph) -> Vec<Vec<&'a ChangeOp>> {
    let by_address: BTreeMap<&ResourceRef, &'a ChangeOp> =
        ops.iter().map(|op| (&op.resource, *op)).collect();
    order
        .waves()
        .into_iter()
        .map(|wave| {
            wave.iter()
                .filter_map(|address| by_address.get(address).copied())
                .collect()
        })
        .filter(|wave: &Vec<_>| !wave.is_empty())
        .collect()
}
