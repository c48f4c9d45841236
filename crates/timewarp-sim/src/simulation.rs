//! The top-level simulation: actor registry, driver loop, results.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use timewarp_clock::{Envelope, Mailbox, MailboxSender, VirtualClock};
use timewarp_server::{Server, ServerHandle, ServerOptions};
use timewarp_types::{ActorId, Payload, Timestamp, TraceEvent};
use tracing::debug;

use crate::actor::{self, ActorContext};
use crate::codegen::{ActorKind, ActorView, MatchPatternView, MatchRuleView};
use crate::definition::{Definition, MatchPattern};
use crate::error::{Result, SimError};
use crate::registry::Router;
use crate::stats::{SharedStats, SimStats, shared_stats, snapshot};
use crate::trace::TraceLog;

/// Upper bound applied when a run names neither `duration` nor
/// `max_duration` (one virtual minute).
pub const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

/// Default predicate-evaluation cadence in virtual milliseconds.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 100;

// ============================================================================
// Configuration
// ============================================================================

/// Construction-time options.
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    pub trace: bool,
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a causal message trace from the start.
    pub fn with_trace(mut self) -> Self {
        self.trace = true;
        self
    }
}

/// Early-termination condition checked every `check_interval`.
pub enum TerminateWhen {
    /// Stop once the event calendar is empty and nothing is in flight.
    Quiescence,
    /// Stop once the predicate holds on a stats snapshot.
    Condition(Box<dyn Fn(&SimSnapshot) -> bool + Send>),
}

impl std::fmt::Debug for TerminateWhen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminateWhen::Quiescence => f.write_str("Quiescence"),
            TerminateWhen::Condition(_) => f.write_str("Condition(..)"),
        }
    }
}

/// Options for one `run` call.
#[derive(Debug, Default)]
pub struct RunOptions {
    duration: Option<u64>,
    max_duration: Option<u64>,
    terminate_when: Option<TerminateWhen>,
    check_interval: Option<u64>,
    trace: Option<bool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance exactly this many virtual milliseconds, then stop.
    pub fn duration(mut self, millis: u64) -> Self {
        self.duration = Some(millis);
        self
    }

    /// Hard ceiling when combined with a termination condition.
    pub fn max_duration(mut self, millis: u64) -> Self {
        self.max_duration = Some(millis);
        self
    }

    pub fn terminate_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SimSnapshot) -> bool + Send + 'static,
    {
        self.terminate_when = Some(TerminateWhen::Condition(Box::new(predicate)));
        self
    }

    /// Stop as soon as no further work can happen without new input.
    pub fn terminate_on_quiescence(mut self) -> Self {
        self.terminate_when = Some(TerminateWhen::Quiescence);
        self
    }

    /// How often, in virtual milliseconds, the condition is evaluated.
    pub fn check_interval(mut self, millis: u64) -> Self {
        self.check_interval = Some(millis);
        self
    }

    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = Some(enabled);
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    MaxDurationReached,
    ConditionMet,
    Quiescence,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Final virtual time (equals the requested duration for plain runs).
    pub actual_duration: Timestamp,
    pub terminated_early: bool,
    pub reason: TerminationReason,
    /// Wall-clock cost of the whole run.
    pub real_time_elapsed: Duration,
}

/// Point-in-time view handed to termination predicates.
#[derive(Debug, Clone)]
pub struct SimSnapshot {
    pub now: Timestamp,
    pub scheduled_events: usize,
    pub stats: SimStats,
}

impl SimSnapshot {
    pub fn actor(&self, name: &str) -> Option<&timewarp_types::ActorStats> {
        self.stats.actor(name)
    }
}

// ============================================================================
// Simulation
// ============================================================================

struct ActorSpec {
    id: ActorId,
    definition: Arc<Definition>,
    stats: SharedStats,
}

type ProcessStarter =
    Box<dyn FnOnce(VirtualClock, String) -> std::result::Result<ServerHandle, crate::error::SimError> + Send>;

struct ProcessSpec {
    name: String,
    targets: Vec<String>,
    starter: Option<ProcessStarter>,
    stats: SharedStats,
}

struct RuntimeState {
    actor_threads: Vec<JoinHandle<()>>,
    actor_senders: Vec<MailboxSender>,
    handles: Vec<ServerHandle>,
}

/// A declarative simulation of actors connected by send patterns, driven
/// over a private virtual clock.
pub struct Simulation {
    clock: VirtualClock,
    trace: TraceLog,
    actors: Vec<ActorSpec>,
    processes: Vec<ProcessSpec>,
    names: HashSet<String>,
    runtime: Option<RuntimeState>,
    summary: Option<RunSummary>,
}

impl Simulation {
    /// An empty simulation with a fresh clock at time zero.
    pub fn new(config: SimConfig) -> Self {
        Self {
            clock: VirtualClock::new(),
            trace: TraceLog::new(config.trace),
            actors: Vec::new(),
            processes: Vec::new(),
            names: HashSet::new(),
            runtime: None,
            summary: None,
        }
    }

    /// The simulation's clock, for assertions and manual advancement in
    /// tests.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Registers a synthetic actor. Fails fast on a nonsense pattern or a
    /// name collision; only callable before `run`.
    pub fn add_actor(&mut self, definition: Definition) -> Result<()> {
        self.ensure_not_started("add_actor")?;
        definition.pattern.validate()?;
        let name = definition.name.clone();
        if !self.names.insert(name.clone()) {
            return Err(SimError::DuplicateActor(name));
        }
        self.actors.push(ActorSpec {
            id: ActorId::next(),
            definition: Arc::new(definition),
            stats: shared_stats(),
        });
        Ok(())
    }

    /// Registers a real server module to run in the loop, wrapped so its
    /// timers route through the simulation clock.
    pub fn add_process<S, I, T>(
        &mut self,
        name: &str,
        module: S,
        init_arg: Payload,
        targets: I,
    ) -> Result<()>
    where
        S: Server,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ensure_not_started("add_process")?;
        if !self.names.insert(name.to_string()) {
            return Err(SimError::DuplicateActor(name.to_string()));
        }
        let starter: ProcessStarter = Box::new(move |clock, name| {
            ServerHandle::start(
                module,
                init_arg,
                ServerOptions::new().named(name).virtual_clock(clock),
            )
            .map_err(SimError::from)
        });
        self.processes.push(ProcessSpec {
            name: name.to_string(),
            targets: targets.into_iter().map(Into::into).collect(),
            starter: Some(starter),
            stats: shared_stats(),
        });
        Ok(())
    }

    /// Runs the simulation: spawns everything, drives the clock, returns
    /// the outcome. Actors stay alive afterwards until [`Simulation::stop`].
    pub fn run(&mut self, options: RunOptions) -> Result<RunSummary> {
        if self.summary.is_some() {
            return Err(SimError::Lifecycle("run already completed".to_string()));
        }
        if let Some(enabled) = options.trace {
            self.trace.set_enabled(enabled);
        }

        let started = Instant::now();
        self.spawn_all()?;

        let limit = options
            .duration
            .or(options.max_duration)
            .unwrap_or(DEFAULT_MAX_DURATION_MS);
        let check = options
            .check_interval
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MS)
            .max(1);
        let origin = self.clock.now();
        debug!(limit, check, "run started");

        let reason = loop {
            match &options.terminate_when {
                Some(TerminateWhen::Condition(predicate)) => {
                    let snap = self.snapshot();
                    match catch_unwind(AssertUnwindSafe(|| predicate(&snap))) {
                        Ok(true) => break TerminationReason::ConditionMet,
                        Ok(false) => {}
                        Err(panic) => {
                            let reason = panic_text(panic.as_ref());
                            self.stop();
                            return Err(SimError::TerminationCondition(reason));
                        }
                    }
                }
                Some(TerminateWhen::Quiescence) => {
                    if self.clock.is_quiescent() {
                        break TerminationReason::Quiescence;
                    }
                }
                None => {}
            }

            let advanced = origin.until(self.clock.now());
            let step = check.min(limit.saturating_sub(advanced));
            if step == 0 {
                break TerminationReason::MaxDurationReached;
            }
            self.clock.advance(step);
            self.clock.wait_for_quiescence();
        };

        let summary = RunSummary {
            actual_duration: self.clock.now(),
            terminated_early: !matches!(reason, TerminationReason::MaxDurationReached),
            reason,
            real_time_elapsed: started.elapsed(),
        };
        debug!(?summary, "run finished");
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Per-actor stats, aggregated by name.
    pub fn get_stats(&self) -> SimStats {
        let mut stats = SimStats::default();
        for spec in &self.actors {
            stats
                .actors
                .insert(spec.definition.name.clone(), snapshot(&spec.stats));
        }
        for process in &self.processes {
            stats
                .actors
                .insert(process.name.clone(), snapshot(&process.stats));
        }
        stats
    }

    /// The causal message trace, in delivery order.
    pub fn get_trace(&self) -> Vec<TraceEvent> {
        self.trace.snapshot()
    }

    /// The trace rendered as a JSON array for external tooling.
    pub fn trace_to_json(&self) -> serde_json::Result<String> {
        self.trace.to_json()
    }

    /// Outcome of the completed run, if any.
    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    /// Handle to a wrapped process, available once the run has spawned it.
    pub fn process(&self, name: &str) -> Option<&ServerHandle> {
        let runtime = self.runtime.as_ref()?;
        let index = self.processes.iter().position(|p| p.name == name)?;
        runtime.handles.get(index)
    }

    /// Point-in-time view: virtual now, calendar size, stats.
    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            now: self.clock.now(),
            scheduled_events: self.clock.scheduled_count(),
            stats: self.get_stats(),
        }
    }

    /// Code-generator view of the registered actors: name, kind, pattern,
    /// targets, match rules.
    pub fn actors(&self) -> Vec<ActorView> {
        let mut views: Vec<ActorView> = self
            .actors
            .iter()
            .map(|spec| ActorView {
                name: spec.definition.name.clone(),
                kind: ActorKind::Simulated,
                pattern: spec.definition.pattern.clone(),
                targets: spec.definition.targets.clone(),
                rules: spec
                    .definition
                    .rules
                    .iter()
                    .map(|rule| MatchRuleView {
                        pattern: match &rule.pattern {
                            MatchPattern::Literal(payload) => {
                                MatchPatternView::Literal(payload.clone())
                            }
                            MatchPattern::Predicate(_) => MatchPatternView::Predicate,
                        },
                        action: rule.action.clone(),
                    })
                    .collect(),
            })
            .collect();
        views.extend(self.processes.iter().map(|process| ActorView {
            name: process.name.clone(),
            kind: ActorKind::Real,
            pattern: crate::pattern::SendPattern::None,
            targets: process.targets.clone(),
            rules: Vec::new(),
        }));
        views
    }

    /// Stops every actor and wrapped process and joins their threads.
    pub fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        for sender in &runtime.actor_senders {
            sender.deliver(Envelope::shutdown());
        }
        for thread in runtime.actor_threads {
            let _ = thread.join();
        }
        for handle in &runtime.handles {
            handle.stop();
        }
        debug!("simulation stopped");
    }

    fn ensure_not_started(&self, what: &str) -> Result<()> {
        if self.runtime.is_some() || self.summary.is_some() {
            return Err(SimError::Lifecycle(format!("{what} after run")));
        }
        Ok(())
    }

    /// Starts processes, wires the router, schedules first events, spawns
    /// actor threads. First events land in the calendar before any thread
    /// can observe the clock moving.
    fn spawn_all(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Ok(());
        }

        let mut handles = Vec::with_capacity(self.processes.len());
        for process in &mut self.processes {
            let starter = process
                .starter
                .take()
                .ok_or_else(|| SimError::Lifecycle("process already started".to_string()))?;
            handles.push(starter(self.clock.clone(), process.name.clone())?);
        }

        let mailboxes: Vec<Mailbox> = self
            .actors
            .iter()
            .map(|spec| Mailbox::with_gauge(spec.id, self.clock.gauge()))
            .collect();

        let mut entries: Vec<(String, MailboxSender)> = self
            .actors
            .iter()
            .zip(&mailboxes)
            .map(|(spec, mailbox)| (spec.definition.name.clone(), mailbox.sender()))
            .collect();
        entries.extend(
            self.processes
                .iter()
                .zip(&handles)
                .map(|(process, handle)| (process.name.clone(), handle.address())),
        );
        let router = Arc::new(Router::new(entries));

        let mut actor_threads = Vec::with_capacity(self.actors.len());
        let mut actor_senders = Vec::with_capacity(self.actors.len());
        for (spec, mailbox) in self.actors.iter().zip(mailboxes) {
            self.clock.register(spec.id, mailbox.sender());
            actor_senders.push(mailbox.sender());

            let ctx = ActorContext {
                id: spec.id,
                name: spec.definition.name.clone(),
                definition: Arc::clone(&spec.definition),
                clock: self.clock.clone(),
                router: Arc::clone(&router),
                stats: Arc::clone(&spec.stats),
                trace: self.trace.clone(),
            };
            actor::schedule_first_event(&ctx)?;
            actor_threads.push(actor::spawn(ctx, mailbox)?);
        }

        self.runtime = Some(RuntimeState {
            actor_threads,
            actor_senders,
            handles,
        });
        Ok(())
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
