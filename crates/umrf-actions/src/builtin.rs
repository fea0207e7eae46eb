//! Built-in actions.
//!
//! A small set of implementations that is enough to drive graphs without
//! any external action package: `noop`, `sleep`, `set_values`, `echo` and
//! `fail`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use umrf_core::action::{Action, ActionContext, ActionError};
use umrf_core::parameters::Parameter;

use crate::config::ActionSpec;

fn config_string(config: &Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn config_u64(config: &Value, key: &str) -> Option<u64> {
    config.get(key).and_then(|v| v.as_u64())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a built-in action from a spec, or `None` for foreign kinds
pub fn build_builtin_action(spec: &ActionSpec) -> Option<Arc<dyn Action>> {
    match spec.kind.as_str() {
        "noop" => Some(Arc::new(NoopAction)),
        "sleep" => Some(Arc::new(SleepAction {
            duration_ms: config_u64(&spec.config, "duration_ms").unwrap_or(1_000),
        })),
        "set_values" => Some(Arc::new(SetValuesAction {
            values: spec
                .config
                .get("values")
                .and_then(|v| v.as_object())
                .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        })),
        "echo" => Some(Arc::new(EchoAction)),
        "fail" => Some(Arc::new(FailAction {
            message: config_string(&spec.config, "message")
                .unwrap_or_else(|| "action failed".to_string()),
        })),
        _ => None,
    }
}

/// Returns immediately with success
pub struct NoopAction;

#[async_trait]
impl Action for NoopAction {
    async fn execute(&self, _ctx: ActionContext) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Sleeps for a configured duration, polling `action_ok` in small slices so
/// a stop request is observed within one iteration.
pub struct SleepAction {
    duration_ms: u64,
}

const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[async_trait]
impl Action for SleepAction {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError> {
        let duration_ms = {
            let input = ctx.input.read().await;
            input
                .value_of("duration_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(self.duration_ms)
        };

        let mut remaining = Duration::from_millis(duration_ms);
        while ctx.action_ok() && !remaining.is_zero() {
            let slice = remaining.min(SLEEP_SLICE);
            sleep(slice).await;
            remaining -= slice;
        }
        Ok(())
    }
}

/// Writes a configured set of values into the output bag
pub struct SetValuesAction {
    values: Vec<(String, Value)>,
}

#[async_trait]
impl Action for SetValuesAction {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError> {
        let mut output = ctx.output.write().await;
        for (name, value) in &self.values {
            output.set_parameter(
                Parameter::new(name.clone(), json_type_name(value)).with_value(value.clone()),
            );
        }
        Ok(())
    }
}

/// Copies every input parameter that carries data into the output bag
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError> {
        let input = ctx.input.read().await;
        let mut output = ctx.output.write().await;
        for param in input.iter() {
            if param.has_data() {
                output.set_parameter(param.clone());
            }
        }
        Ok(())
    }
}

/// Fails with a configured message
pub struct FailAction {
    message: String,
}

#[async_trait]
impl Action for FailAction {
    async fn execute(&self, _ctx: ActionContext) -> Result<(), ActionError> {
        Err(ActionError::failed(self.message.clone()))
    }
}
