use serde::{Deserialize, Serialize};

use crate::error::ErrorObject;
use crate::id::OperationId;
use crate::kind::OperationKind;
use crate::payload::Payload;

/// One of `{START, SUCCEED, FAIL, RETRY}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    Start,
    Succeed,
    Fail,
    Retry,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUpdateOptions {
    pub next_attempt_delay_seconds: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitUpdateOptions {
    pub wait_seconds: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackUpdateOptions {
    pub timeout_seconds: Option<u32>,
    pub heartbeat_timeout_seconds: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainedInvokeUpdateOptions {
    pub function_name: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdateOptions {
    pub replay_children: bool,
}

/// The client-to-backend delta describing one change to an operation.
///
/// Updates are batched by the checkpoint batcher; this type is what flows
/// through `submit`/`Checkpoint`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationUpdate {
    pub action: UpdateAction,
    pub id: OperationId,
    pub kind: OperationKind,
    pub parent_id: Option<OperationId>,
    pub name: Option<String>,
    pub payload: Option<Payload>,
    pub error: Option<ErrorObject>,
    pub step_options: Option<StepUpdateOptions>,
    pub wait_options: Option<WaitUpdateOptions>,
    pub callback_options: Option<CallbackUpdateOptions>,
    pub chained_invoke_options: Option<ChainedInvokeUpdateOptions>,
    pub context_options: Option<ContextUpdateOptions>,
}

impl OperationUpdate {
    pub fn builder(action: UpdateAction, id: OperationId, kind: OperationKind) -> OperationUpdateBuilder {
        OperationUpdateBuilder::new(action, id, kind)
    }

    /// Approximate wire size: id length + kind length + action length +
    /// payload length + a constant header budget (~100 bytes). Deliberately
    /// an upper bound, never an exact measurement.
    pub fn approx_wire_size(&self) -> usize {
        const HEADER_BUDGET: usize = 100;
        let payload_len = self.payload.as_ref().map(|p| p.len()).unwrap_or(0);
        let error_len = self
            .error
            .as_ref()
            .map(|e| e.message.len() + e.error_type.len())
            .unwrap_or(0);
        self.id.as_str().len()
            + self.kind.name().len()
            + format!("{:?}", self.action).len()
            + payload_len
            + error_len
            + HEADER_BUDGET
    }
}

/// Fluent builder mirroring the shared `send_update` fill-in pattern:
/// callers set only the kind-specific fields they need.
pub struct OperationUpdateBuilder {
    action: UpdateAction,
    id: OperationId,
    kind: OperationKind,
    parent_id: Option<OperationId>,
    name: Option<String>,
    payload: Option<Payload>,
    error: Option<ErrorObject>,
    step_options: Option<StepUpdateOptions>,
    wait_options: Option<WaitUpdateOptions>,
    callback_options: Option<CallbackUpdateOptions>,
    chained_invoke_options: Option<ChainedInvokeUpdateOptions>,
    context_options: Option<ContextUpdateOptions>,
}

impl OperationUpdateBuilder {
    pub fn new(action: UpdateAction, id: OperationId, kind: OperationKind) -> Self {
        Self {
            action,
            id,
            kind,
            parent_id: None,
            name: None,
            payload: None,
            error: None,
            step_options: None,
            wait_options: None,
            callback_options: None,
            chained_invoke_options: None,
            context_options: None,
        }
    }

    pub fn parent_id(mut self, parent_id: Option<OperationId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn error(mut self, error: ErrorObject) -> Self {
        self.error = Some(error);
        self
    }

    pub fn step_options(mut self, options: StepUpdateOptions) -> Self {
        self.step_options = Some(options);
        self
    }

    pub fn wait_options(mut self, options: WaitUpdateOptions) -> Self {
        self.wait_options = Some(options);
        self
    }

    pub fn callback_options(mut self, options: CallbackUpdateOptions) -> Self {
        self.callback_options = Some(options);
        self
    }

    pub fn chained_invoke_options(mut self, options: ChainedInvokeUpdateOptions) -> Self {
        self.chained_invoke_options = Some(options);
        self
    }

    pub fn context_options(mut self, options: ContextUpdateOptions) -> Self {
        self.context_options = Some(options);
        self
    }

    pub fn build(self) -> OperationUpdate {
        OperationUpdate {
            action: self.action,
            id: self.id,
            kind: self.kind,
            parent_id: self.parent_id,
            name: self.name,
            payload: self.payload,
            error: self.error,
            step_options: self.step_options,
            wait_options: self.wait_options,
            callback_options: self.callback_options,
            chained_invoke_options: self.chained_invoke_options,
            context_options: self.context_options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_wire_size_is_an_upper_bound_over_empty_update() {
        let update = OperationUpdate::builder(
            UpdateAction::Start,
            OperationId::root(1),
            OperationKind::Step,
        )
        .build();
        // header budget alone dominates a field-less update.
        assert!(update.approx_wire_size() >= 100);
    }

    #[test]
    fn approx_wire_size_grows_with_payload() {
        let small = OperationUpdate::builder(
            UpdateAction::Succeed,
            OperationId::root(1),
            OperationKind::Step,
        )
        .build();
        let large = OperationUpdate::builder(
            UpdateAction::Succeed,
            OperationId::root(1),
            OperationKind::Step,
        )
        .payload(Payload::new(vec![0u8; 1000], crate::payload::Codec::Json))
        .build();
        assert!(large.approx_wire_size() > small.approx_wire_size());
    }
}
