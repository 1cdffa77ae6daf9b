//! Reasoning log storage
//!
//! Append-only sequence of reasoning, action and observation steps. Steps are
//! never edited or dropped once written; an optional observer receives each
//! one as it lands.

use crate::models::{ReasoningStep, RunEvent, StepRole};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ReasoningLog {
    steps: Vec<ReasoningStep>,
    observer: Option<UnboundedSender<RunEvent>>,
}

impl ReasoningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: UnboundedSender<RunEvent>) -> Self {
        Self {
            steps: Vec::new(),
            observer: Some(observer),
        }
    }

    pub fn reasoning(&mut self, content: impl Into<String>) -> &ReasoningStep {
        self.push(StepRole::Reasoning, content.into(), None, None, None)
    }

    pub fn action(
        &mut self,
        tool: &str,
        arguments: Value,
        content: impl Into<String>,
    ) -> &ReasoningStep {
        self.push(
            StepRole::Action,
            content.into(),
            Some(tool.to_string()),
            Some(arguments),
            None,
        )
    }

    pub fn observation(
        &mut self,
        tool: &str,
        result: Value,
        content: impl Into<String>,
    ) -> &ReasoningStep {
        self.push(
            StepRole::Observation,
            content.into(),
            Some(tool.to_string()),
            None,
            Some(result),
        )
    }

    fn push(
        &mut self,
        role: StepRole,
        content: String,
        tool: Option<String>,
        arguments: Option<Value>,
        result: Option<Value>,
    ) -> &ReasoningStep {
        let step = ReasoningStep {
            index: self.steps.len(),
            role,
            content,
            tool,
            arguments,
            result,
            created_at: Utc::now(),
        };

        debug!(index = step.index, role = %step.role, "Reasoning step appended");
        self.notify(RunEvent::Step(step.clone()));
        self.steps.push(step);

        &self.steps[self.steps.len() - 1]
    }

    /// Forward an event to the observer, if one is still listening.
    pub fn notify(&self, event: RunEvent) {
        if let Some(observer) = &self.observer {
            if observer.send(event).is_err() {
                debug!("Run observer dropped; continuing without live updates");
            }
        }
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn last(&self) -> Option<&ReasoningStep> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<ReasoningStep> {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_indices_are_sequential() {
        let mut log = ReasoningLog::new();
        log.reasoning("Need transactions first");
        log.action("fetch-transactions", json!({}), "Invoking fetch-transactions");
        log.observation("fetch-transactions", json!({"count": 3}), "Fetched 3 transactions");

        let roles: Vec<StepRole> = log.steps().iter().map(|s| s.role).collect();
        assert_eq!(
            roles,
            vec![StepRole::Reasoning, StepRole::Action, StepRole::Observation]
        );
        for (i, step) in log.steps().iter().enumerate() {
            assert_eq!(step.index, i);
        }
        assert_eq!(log.last().unwrap().result, Some(json!({"count": 3})));
    }

    #[tokio::test]
    async fn test_observer_receives_every_step() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut log = ReasoningLog::with_observer(tx);

        log.reasoning("first");
        log.reasoning("second");
        drop(log);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            if let RunEvent::Step(step) = event {
                received.push(step.content);
            }
        }
        assert_eq!(received, vec!["first", "second"]);
    }

    #[test]
    fn test_dropped_observer_does_not_break_logging() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let mut log = ReasoningLog::with_observer(tx);
        log.reasoning("still recorded");
        assert_eq!(log.len(), 1);
    }
}
