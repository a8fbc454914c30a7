//! Insights container: opaque analytic artifacts keyed by caller ids.
//!
//! No validation, expiry or persistence. `clear_ai_data` resets derived
//! analysis (predictions, insights, recommendations) and leaves the model
//! registry and performance map in place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::clock::SharedClock;
use crate::container::Container;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Loading,
    Training,
    Analyzing,
    Ready,
    Error,
    #[serde(untagged)]
    Custom(String),
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AnalysisStatus::Idle => "idle",
            AnalysisStatus::Loading => "loading",
            AnalysisStatus::Training => "training",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Ready => "ready",
            AnalysisStatus::Error => "error",
            AnalysisStatus::Custom(s) => s,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "idle" => AnalysisStatus::Idle,
            "loading" => AnalysisStatus::Loading,
            "training" => AnalysisStatus::Training,
            "analyzing" => AnalysisStatus::Analyzing,
            "ready" => AnalysisStatus::Ready,
            "error" => AnalysisStatus::Error,
            other => AnalysisStatus::Custom(other.to_string()),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Loading | AnalysisStatus::Training | AnalysisStatus::Analyzing
        )
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsState {
    pub models: BTreeMap<String, Value>,
    pub predictions: BTreeMap<String, Value>,
    pub insights: BTreeMap<String, Value>,
    pub recommendations: BTreeMap<String, Value>,
    pub model_performance: BTreeMap<String, Value>,
    pub status: AnalysisStatus,
    pub last_analysis: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsightsAction {
    SetModel { id: String, model: Value },
    RemoveModel(String),
    SetPrediction { key: String, value: Value },
    SetInsight { key: String, value: Value },
    SetRecommendation { key: String, value: Value },
    SetModelPerformance { model_id: String, metrics: Value },
    SetStatus(AnalysisStatus),
    AnalysisCompleted { at: DateTime<Utc> },
    ClearAiData,
}

pub fn reduce(state: &InsightsState, action: InsightsAction) -> InsightsState {
    let mut next = state.clone();
    match action {
        InsightsAction::SetModel { id, model } => {
            next.models.insert(id, model);
        }
        InsightsAction::RemoveModel(id) => {
            next.models.remove(&id);
        }
        InsightsAction::SetPrediction { key, value } => {
            next.predictions.insert(key, value);
        }
        InsightsAction::SetInsight { key, value } => {
            next.insights.insert(key, value);
        }
        InsightsAction::SetRecommendation { key, value } => {
            next.recommendations.insert(key, value);
        }
        InsightsAction::SetModelPerformance { model_id, metrics } => {
            next.model_performance.insert(model_id, metrics);
        }
        InsightsAction::SetStatus(status) => next.status = status,
        InsightsAction::AnalysisCompleted { at } => {
            next.status = AnalysisStatus::Ready;
            next.last_analysis = Some(at);
        }
        InsightsAction::ClearAiData => {
            next.predictions.clear();
            next.insights.clear();
            next.recommendations.clear();
        }
    }
    next
}

pub struct InsightsStore {
    state: Container<InsightsState>,
    clock: SharedClock,
}

impl InsightsStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Container::default(),
            clock,
        }
    }

    pub fn snapshot(&self) -> Arc<InsightsState> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<InsightsState>> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: InsightsAction) -> Arc<InsightsState> {
        self.state.transition(|s| reduce(s, action)).1
    }

    pub fn set_model(&self, id: impl Into<String>, model: Value) {
        self.dispatch(InsightsAction::SetModel {
            id: id.into(),
            model,
        });
    }

    pub fn remove_model(&self, id: &str) {
        self.dispatch(InsightsAction::RemoveModel(id.to_string()));
    }

    pub fn set_prediction(&self, key: impl Into<String>, value: Value) {
        self.dispatch(InsightsAction::SetPrediction {
            key: key.into(),
            value,
        });
    }

    pub fn set_insight(&self, key: impl Into<String>, value: Value) {
        self.dispatch(InsightsAction::SetInsight {
            key: key.into(),
            value,
        });
    }

    pub fn set_recommendation(&self, key: impl Into<String>, value: Value) {
        self.dispatch(InsightsAction::SetRecommendation {
            key: key.into(),
            value,
        });
    }

    pub fn set_model_performance(&self, model_id: impl Into<String>, metrics: Value) {
        self.dispatch(InsightsAction::SetModelPerformance {
            model_id: model_id.into(),
            metrics,
        });
    }

    pub fn set_status(&self, status: AnalysisStatus) {
        log::debug!("Insights status -> {}", status);
        self.dispatch(InsightsAction::SetStatus(status));
    }

    /// Mark the current analysis finished: status `ready`, stamp `last_analysis`.
    pub fn complete_analysis(&self) {
        let at = self.clock.now();
        self.dispatch(InsightsAction::AnalysisCompleted { at });
    }

    pub fn clear_ai_data(&self) {
        self.dispatch(InsightsAction::ClearAiData);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use serde_json::json;

    fn store() -> (InsightsStore, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (InsightsStore::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_last_writer_wins_per_key() {
        let (store, _) = store();
        store.set_prediction("churn:acme", json!(0.2));
        store.set_prediction("churn:acme", json!(0.4));
        store.set_prediction("churn:globex", json!(0.1));

        let s = store.snapshot();
        assert_eq!(s.predictions.len(), 2);
        assert_eq!(s.predictions["churn:acme"], json!(0.4));
    }

    #[test]
    fn test_clear_keeps_models_and_performance() {
        let (store, _) = store();
        store.set_model("churn-v2", json!({ "kind": "gbm" }));
        store.set_model_performance("churn-v2", json!({ "auc": 0.91 }));
        store.set_prediction("p", json!(1));
        store.set_insight("i", json!("revenue up"));
        store.set_recommendation("r", json!(["call acme"]));

        store.clear_ai_data();

        let s = store.snapshot();
        assert!(s.predictions.is_empty());
        assert!(s.insights.is_empty());
        assert!(s.recommendations.is_empty());
        assert_eq!(s.models["churn-v2"], json!({ "kind": "gbm" }));
        assert_eq!(s.model_performance["churn-v2"], json!({ "auc": 0.91 }));
    }

    #[test]
    fn test_status_lifecycle() {
        let (store, clock) = store();
        assert_eq!(store.snapshot().status, AnalysisStatus::Idle);
        assert!(store.snapshot().last_analysis.is_none());

        store.set_status(AnalysisStatus::Analyzing);
        assert!(store.snapshot().status.is_busy());

        store.complete_analysis();
        let s = store.snapshot();
        assert_eq!(s.status, AnalysisStatus::Ready);
        assert_eq!(s.last_analysis, Some(clock.now()));

        store.remove_model("never-registered");
        assert!(store.snapshot().models.is_empty());
    }

    #[test]
    fn test_custom_status_round_trips() {
        let status = AnalysisStatus::parse("queued");
        assert_eq!(status, AnalysisStatus::Custom("queued".into()));
        assert_eq!(status.to_string(), "queued");
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("queued"));
        assert_eq!(
            serde_json::from_value::<AnalysisStatus>(json!("training")).unwrap(),
            AnalysisStatus::Training
        );
        assert_eq!(
            serde_json::from_value::<AnalysisStatus>(json!("queued")).unwrap(),
            AnalysisStatus::Custom("queued".into())
        );
    }
}
