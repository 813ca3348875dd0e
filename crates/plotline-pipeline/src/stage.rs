//! The stage contract: hooks around one resolved provider call.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::device::Device;
use crate::error::PipelineError;
use crate::hooks::{HookContext, HookRegistry, HookTiming};
use crate::params::{Limits, ProcessingParams};
use crate::provider::{ProviderContext, ProviderRegistry, StageKind, StagePayload};

const TRACING_TARGET: &str = "plotline_pipeline::stage";

/// What one stage run produced.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Output after `after` hooks had their say.
    pub output: StagePayload,
    /// Name of the provider that ran.
    pub provider: &'static str,
    /// Values hooks attached during the run.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Wall-clock time including hooks.
    pub duration: Duration,
}

/// One pipeline responsibility bound to the registries it reads.
#[derive(Debug, Clone, Copy)]
pub struct Stage<'a> {
    kind: StageKind,
    providers: &'a ProviderRegistry,
    hooks: &'a HookRegistry,
}

impl<'a> Stage<'a> {
    #[must_use]
    pub const fn new(
        kind: StageKind,
        providers: &'a ProviderRegistry,
        hooks: &'a HookRegistry,
    ) -> Self {
        Self {
            kind,
            providers,
            hooks,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.kind
    }

    /// Run the stage.
    ///
    /// Hook lists are captured before the first hook runs. `before` hooks
    /// may rewrite the input and the parameters the provider sees; `after`
    /// hooks may replace the output. A provider panic is reported as a
    /// provider failure rather than unwinding into the caller.
    ///
    /// # Errors
    ///
    /// - any error a hook returns, unchanged
    /// - [`PipelineError::NoProviderAvailable`] when nothing can run
    /// - the provider's failure, tagged with stage and provider name
    pub fn run(
        &self,
        input: StagePayload,
        preferences: &[String],
        params: &ProcessingParams,
        device: Device,
        limits: &Limits,
    ) -> Result<StageOutcome, PipelineError> {
        let start = web_time::Instant::now();
        let stage = self.kind;
        let point = stage.hook_point();
        let before = self.hooks.snapshot(stage, point, HookTiming::Before);
        let after = self.hooks.snapshot(stage, point, HookTiming::After);

        let mut ctx = HookContext::new(stage, input, params.clone());
        before.run(&mut ctx)?;

        let provider = self.providers.resolve(stage, preferences, device)?;
        let name = provider.name();
        ctx.provider = Some(name);
        tracing::debug!(
            target: TRACING_TARGET,
            stage = %stage,
            provider = name,
            device = %device,
            "Resolved provider"
        );

        let input = ctx.input.take().ok_or_else(|| {
            PipelineError::Internal(format!("a `before` hook of stage `{stage}` removed its input"))
        })?;
        let provider_ctx = ProviderContext {
            params: &ctx.params,
            device,
            limits,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            provider.execute(input, &provider_ctx)
        }));
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(err.into_pipeline_error(stage, name)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    target: TRACING_TARGET,
                    stage = %stage,
                    provider = name,
                    message = %message,
                    "Provider panicked"
                );
                return Err(PipelineError::ProviderExecutionFailed {
                    stage,
                    provider: name.to_owned(),
                    message: format!("provider panicked: {message}"),
                });
            }
        };

        ctx.timing = HookTiming::After;
        ctx.output = Some(output);
        after.run(&mut ctx)?;

        let output = ctx.output.take().ok_or_else(|| {
            PipelineError::Internal(format!("an `after` hook of stage `{stage}` removed its output"))
        })?;
        let duration = start.elapsed();
        tracing::debug!(
            target: TRACING_TARGET,
            stage = %stage,
            provider = name,
            elapsed_ms = duration.as_millis(),
            "Stage finished"
        );
        Ok(StageOutcome {
            output,
            provider: name,
            metadata: ctx.metadata,
            duration,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
