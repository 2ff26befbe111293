//! Stage contract and the sequential execution engine.
//!
//! Stages run strictly one after another; a stage's own work may fan out
//! internally, but the engine never overlaps two stages. On failure the
//! failing stage's `on_error` hook may supply a substitute context, in which
//! case the engine emits a recovery event (no completion event for that
//! stage) and continues; otherwise the run aborts and remaining stages never
//! start.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::core::context::PipelineContext;
use crate::core::events::{EventBus, PipelineEvent};
use crate::core::stats::StageTiming;
use crate::error::{Result, SnapError};

/// One unit of the pipeline.
///
/// `process` is the only required member; the lifecycle hooks default to
/// no-ops. `on_error` returning `Some` context is the stage's recovery path.
pub trait Stage {
    /// Stable name used in events, timings, and error wrapping.
    fn name(&self) -> &'static str;

    /// One-time setup before any stage runs (e.g. probing an external tool).
    fn on_init(&mut self, _ctx: &PipelineContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Precondition check run immediately before `process`.
    fn validate(&self, _ctx: &PipelineContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The transformation. Takes the context by value and returns the
    /// updated context (same value mutated, or a new one).
    fn process(&mut self, ctx: PipelineContext) -> Result<PipelineContext>;

    /// Recovery hook. Return `Some(substitute)` to continue the run with
    /// that context; `None` (the default) propagates the failure.
    fn on_error(&mut self, _error: &SnapError, _ctx: &PipelineContext) -> Option<PipelineContext> {
        None
    }
}

/// Ordered stage list plus the event registry.
pub struct PipelineEngine {
    stages: Vec<Box<dyn Stage>>,
    events: EventBus,
}

impl PipelineEngine {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            events: EventBus::new(),
        }
    }

    /// Listener registry; register with `on` / `once` before `execute`.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage over `ctx`. Returns the context produced by the last
    /// stage, or the first unrecovered error.
    pub fn execute(&mut self, ctx: PipelineContext) -> Result<PipelineContext> {
        let run_start = Instant::now();
        self.events.emit(&PipelineEvent::PipelineStart {
            stages: self.stages.len(),
            input_files: ctx.files.len(),
        });

        let mut ctx = ctx;

        // One-time setup pass, in order, before any processing.
        for stage in &mut self.stages {
            if let Err(err) = stage.on_init(&ctx) {
                let name = stage.name();
                self.events.emit(&PipelineEvent::PipelineError {
                    stage: name,
                    error: err.to_string(),
                });
                return Err(SnapError::stage(name, err));
            }
        }

        for index in 0..self.stages.len() {
            ctx.cancel.check()?;

            let name = self.stages[index].name();
            self.events
                .emit(&PipelineEvent::StageStart { stage: name, index });
            debug!(stage = name, index, "stage starting");

            let bytes_before = ctx.stats.loaded_bytes as i64;
            let stage_start = Instant::now();

            if let Err(err) = self.stages[index].validate(&ctx) {
                let wrapped = SnapError::stage(name, err);
                match self.try_recover(index, wrapped, ctx) {
                    Ok(recovered) => {
                        ctx = recovered;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            // `process` consumes the context; keep a recovery snapshot so a
            // failing stage can still inspect its input.
            let snapshot = snapshot_for_recovery(&ctx);
            match self.stages[index].process(ctx) {
                Ok(mut next) => {
                    next.refresh_loaded_bytes();
                    let elapsed = stage_start.elapsed();
                    let delta = next.stats.loaded_bytes as i64 - bytes_before;
                    next.stats.stage_timings.push(StageTiming {
                        stage: name,
                        elapsed,
                        loaded_bytes_delta: delta,
                    });
                    self.events.emit(&PipelineEvent::StageComplete {
                        stage: name,
                        index,
                        elapsed,
                        loaded_bytes_delta: delta,
                    });
                    debug!(stage = name, ?elapsed, files = next.files.len(), "stage complete");
                    ctx = next;
                }
                Err(err) => match self.try_recover(index, err, snapshot) {
                    Ok(recovered) => ctx = recovered,
                    Err(err) => return Err(err),
                },
            }
        }

        let elapsed = run_start.elapsed();
        self.events.emit(&PipelineEvent::PipelineComplete {
            elapsed,
            files: ctx.files.len(),
        });
        info!(?elapsed, files = ctx.files.len(), "pipeline complete");
        Ok(ctx)
    }

    /// Offer the error to the stage's recovery hook. A substitute context
    /// continues the run; anything else aborts it with the original error,
    /// source chain intact.
    fn try_recover(
        &mut self,
        index: usize,
        err: SnapError,
        ctx: PipelineContext,
    ) -> Result<PipelineContext> {
        let name = self.stages[index].name();

        // Cancellation is never offered for recovery.
        if err.is_cancelled() {
            self.events.emit(&PipelineEvent::PipelineError {
                stage: name,
                error: err.to_string(),
            });
            return Err(err);
        }

        match self.stages[index].on_error(&err, &ctx) {
            Some(substitute) => {
                warn!(stage = name, error = %err, "stage recovered with substitute context");
                self.events.emit(&PipelineEvent::StageRecovered {
                    stage: name,
                    index,
                    error: err.to_string(),
                });
                Ok(substitute)
            }
            None => {
                error!(stage = name, error = %err, "stage failed, aborting run");
                self.events.emit(&PipelineEvent::PipelineError {
                    stage: name,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

/// Clone the pieces a recovery hook needs; file contents are carried over so
/// a substitute context can keep whatever already loaded.
fn snapshot_for_recovery(ctx: &PipelineContext) -> PipelineContext {
    PipelineContext {
        base: ctx.base.clone(),
        profile: ctx.profile.clone(),
        settings: ctx.settings.clone(),
        files: ctx.files.clone(),
        stats: ctx.stats.clone(),
        vcs: ctx.vcs.clone(),
        instructions: ctx.instructions.clone(),
        cancel: ctx.cancel.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use super::*;
    use crate::core::events::EventKind;
    use crate::core::profile::Profile;
    use crate::infra::config::Settings;

    fn ctx() -> PipelineContext {
        PipelineContext::new(PathBuf::from("."), Profile::default(), Settings::new())
    }

    struct Tag {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Stage for Tag {
        fn name(&self) -> &'static str {
            self.name
        }
        fn process(&mut self, ctx: PipelineContext) -> Result<PipelineContext> {
            self.log.borrow_mut().push(self.name);
            Ok(ctx)
        }
    }

    struct Failing {
        recover: bool,
    }

    impl Stage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn process(&mut self, _ctx: PipelineContext) -> Result<PipelineContext> {
            Err(SnapError::stage("failing", anyhow::anyhow!("boom")))
        }
        fn on_error(
            &mut self,
            _error: &SnapError,
            ctx: &PipelineContext,
        ) -> Option<PipelineContext> {
            if self.recover {
                Some(snapshot_for_recovery(ctx))
            } else {
                None
            }
        }
    }

    #[test]
    fn stages_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Tag {
                name: "one",
                log: Rc::clone(&log),
            }),
            Box::new(Tag {
                name: "two",
                log: Rc::clone(&log),
            }),
        ];
        let mut engine = PipelineEngine::new(stages);
        engine.execute(ctx()).unwrap();
        assert_eq!(*log.borrow(), vec!["one", "two"]);
    }

    #[test]
    fn recovery_continues_and_emits_recovery_not_completion() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Failing { recover: true }),
            Box::new(Tag {
                name: "after",
                log: Rc::clone(&log),
            }),
        ];
        let mut engine = PipelineEngine::new(stages);

        let recoveries = Rc::new(RefCell::new(0));
        let completions = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&recoveries);
        engine
            .events_mut()
            .on(EventKind::StageRecovered, move |_| *r.borrow_mut() += 1);
        let c = Rc::clone(&completions);
        engine.events_mut().on(EventKind::StageComplete, move |e| {
            if let PipelineEvent::StageComplete { stage, .. } = e {
                c.borrow_mut().push(*stage);
            }
        });

        engine.execute(ctx()).unwrap();
        assert_eq!(*log.borrow(), vec!["after"]);
        assert_eq!(*recoveries.borrow(), 1);
        // The failing stage must not appear among completions.
        assert_eq!(*completions.borrow(), vec!["after"]);
    }

    #[test]
    fn unrecovered_failure_aborts_remaining_stages() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Failing { recover: false }),
            Box::new(Tag {
                name: "never",
                log: Rc::clone(&log),
            }),
        ];
        let mut engine = PipelineEngine::new(stages);
        let err = engine.execute(ctx()).unwrap_err();
        assert!(matches!(err, SnapError::Stage { stage: "failing", .. }));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn propagated_failure_keeps_the_original_source_chain() {
        struct IoFail;

        impl Stage for IoFail {
            fn name(&self) -> &'static str {
                "io-fail"
            }
            fn process(&mut self, _ctx: PipelineContext) -> Result<PipelineContext> {
                let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
                Err(SnapError::stage("io-fail", anyhow::Error::new(io)))
            }
        }

        let mut engine = PipelineEngine::new(vec![Box::new(IoFail)]);
        let err = engine.execute(ctx()).unwrap_err();
        let SnapError::Stage { stage, source } = &err else {
            panic!("expected Stage error, got {err:?}");
        };
        assert_eq!(*stage, "io-fail");
        // The concrete cause must survive propagation, not a stringified copy.
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn cancellation_propagates_as_distinguished_error() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Tag {
            name: "unreached",
            log: Rc::clone(&log),
        })];
        let mut engine = PipelineEngine::new(stages);

        let context = ctx();
        context.cancel.cancel();
        let err = engine.execute(context).unwrap_err();
        assert!(err.is_cancelled());
        assert!(log.borrow().is_empty());
    }
}
