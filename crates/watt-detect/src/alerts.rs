//! User-defined threshold rules
//!
//! A rule fires when every sample of its device in the trailing
//! `sustained_for_secs` window satisfies the comparison and the rule is
//! out of its cooldown.

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use watt_core::{
    AlertEvent, AlertRule, AlertRuleRepo, EventRepo, NewAlertEvent, Notification, Notifier,
    RawHealthSample, RawSampleRepo, Timestamp,
};

use crate::{DetectError, DetectResult};

pub struct AlertEvaluator<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
}

impl<S> AlertEvaluator<S>
where
    S: RawSampleRepo + AlertRuleRepo + EventRepo,
{
    pub fn new(store: Arc<S>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Evaluate every active rule of `device_id`; one rule failing does not
    /// stop the rest.
    #[instrument(skip(self))]
    pub async fn evaluate_device(&self, device_id: &str, now: Timestamp) -> Vec<AlertEvent> {
        let rules = match self.store.active_rules_for_device(device_id).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Failed to load alert rules");
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for rule in &rules {
            match self.evaluate_rule(rule, now).await {
                Ok(Some(event)) => fired.push(event),
                Ok(None) => {}
                Err(e) => warn!(rule_id = rule.id, error = %e, "Alert rule evaluation failed"),
            }
        }
        fired
    }

    /// Evaluate one rule at `now`.
    ///
    /// The window is `[now - sustained_for_secs, now]`, inclusive of `now`.
    /// A sample without the rule's metric does not satisfy it.
    pub async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        now: Timestamp,
    ) -> DetectResult<Option<AlertEvent>> {
        if !rule.is_active {
            return Ok(None);
        }
        if rule.sustained_for_secs < 0 || rule.cooldown_secs < 0 {
            return Err(DetectError::InvalidRule(rule.id));
        }

        let samples = self
            .store
            .health_samples(&rule.device_id, now - rule.sustained_for_secs, now + 1)
            .await?;
        let Some(observed) = sustained_value(rule, &samples) else {
            return Ok(None);
        };

        if let Some(last) = rule.last_fired {
            if now - last < rule.cooldown_secs {
                debug!(rule_id = rule.id, last_fired = last, "Alert suppressed by cooldown");
                return Ok(None);
            }
        }

        let event = NewAlertEvent {
            rule_id: rule.id,
            device_id: rule.device_id.clone(),
            timestamp: now,
            observed_value: observed,
            message: format_message(rule, observed),
        };
        let stored = self.store.record_alert(&event).await?;
        info!(rule_id = rule.id, device_id = %rule.device_id, observed, "Alert fired");

        if let Err(e) = self.store.mark_fired(rule.id, now).await {
            error!(rule_id = rule.id, error = %e, "Failed to record alert firing time");
        }

        let notification = Notification {
            title: rule.name.clone(),
            body: stored.message.clone(),
            device_id: rule.device_id.clone(),
            url: None,
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(rule_id = rule.id, error = %e, "Alert notification failed");
        }

        Ok(Some(stored))
    }
}

/// The most recent value when every sample satisfies the rule, else `None`
fn sustained_value(rule: &AlertRule, samples: &[RawHealthSample]) -> Option<f64> {
    let mut latest: Option<(Timestamp, f64)> = None;
    for sample in samples {
        let value = sample.metric(rule.metric)?;
        if !rule.comparator.holds(value, rule.threshold) {
            return None;
        }
        if latest.map_or(true, |(ts, _)| sample.timestamp >= ts) {
            latest = Some((sample.timestamp, value));
        }
    }
    latest.map(|(_, value)| value)
}

fn format_message(rule: &AlertRule, observed: f64) -> String {
    format!(
        "{}: {} is {:.2} ({} {}) for {}s",
        rule.name,
        rule.metric.as_str(),
        observed,
        rule.comparator.symbol(),
        rule.threshold,
        rule.sustained_for_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use watt_core::memory::MemoryStore;
    use watt_core::{Comparator, Metric, NewAlertRule, NullNotifier};

    struct FailingNotifier;

    #[async_trait::async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
            anyhow::bail!("push channel down")
        }
    }

    const T0: Timestamp = 1_709_251_200;

    async fn power(store: &MemoryStore, ts: Timestamp, watts: Option<f64>) {
        store
            .append_health(&RawHealthSample {
                device_id: "plug-1".into(),
                timestamp: ts,
                power_w: watts,
                voltage_v: Some(230.0),
                current_a: None,
                power_factor: None,
                online: true,
            })
            .await
            .unwrap();
    }

    async fn high_power_rule(store: &MemoryStore, cooldown_secs: i64) -> AlertRule {
        store
            .create_rule(&NewAlertRule {
                name: "Heater left on".into(),
                device_id: "plug-1".into(),
                metric: Metric::PowerW,
                comparator: Comparator::Gt,
                threshold: 1000.0,
                sustained_for_secs: 40,
                cooldown_secs,
                is_active: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fires_when_window_fully_qualifies() {
        let store = Arc::new(MemoryStore::new());
        let rule = high_power_rule(&store, 300).await;
        for i in 0..5 {
            power(&store, T0 + i * 10, Some(1500.0 + i as f64)).await;
        }

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        let event = evaluator.evaluate_rule(&rule, T0 + 40).await.unwrap().unwrap();

        assert_eq!(event.observed_value, 1504.0);
        insta::assert_snapshot!(event.message, @"Heater left on: power_w is 1504.00 (> 1000) for 40s");
        let stored = store.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(stored.last_fired, Some(T0 + 40));
    }

    #[tokio::test]
    async fn test_one_failing_sample_blocks_firing() {
        let store = Arc::new(MemoryStore::new());
        let rule = high_power_rule(&store, 300).await;
        for (i, watts) in [1500.0, 1500.0, 900.0, 1500.0, 1500.0].into_iter().enumerate() {
            power(&store, T0 + i as i64 * 10, Some(watts)).await;
        }

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        assert!(evaluator.evaluate_rule(&rule, T0 + 40).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_metric_does_not_satisfy() {
        let store = Arc::new(MemoryStore::new());
        let rule = high_power_rule(&store, 300).await;
        power(&store, T0, Some(1500.0)).await;
        power(&store, T0 + 10, None).await;
        power(&store, T0 + 20, Some(1500.0)).await;

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        assert!(evaluator.evaluate_rule(&rule, T0 + 20).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_window_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let rule = high_power_rule(&store, 300).await;
        power(&store, T0, Some(1500.0)).await;

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        // The only sample is older than the window
        assert!(evaluator.evaluate_rule(&rule, T0 + 100).await.unwrap().is_none());
        assert!(store.recent_alert_events(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_gates_refiring() {
        let store = Arc::new(MemoryStore::new());
        high_power_rule(&store, 120).await;
        for i in 0..=20 {
            power(&store, T0 - 40 + i * 10, Some(2000.0)).await;
        }

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        assert_eq!(evaluator.evaluate_device("plug-1", T0).await.len(), 1);
        assert!(evaluator.evaluate_device("plug-1", T0 + 60).await.is_empty());
        assert_eq!(evaluator.evaluate_device("plug-1", T0 + 121).await.len(), 1);

        let events = store.recent_alert_events(Some("plug-1"), 10).await.unwrap();
        let times: Vec<_> = events.iter().map(|e| e.timestamp - T0).collect();
        assert_eq!(times, vec![121, 0]);
    }

    #[tokio::test]
    async fn test_inactive_rule_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut rule = high_power_rule(&store, 0).await;
        rule.is_active = false;
        store.update_rule(&rule).await.unwrap();
        power(&store, T0, Some(5000.0)).await;

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        assert!(evaluator.evaluate_device("plug-1", T0).await.is_empty());
        assert!(evaluator.evaluate_rule(&rule, T0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_event() {
        let store = Arc::new(MemoryStore::new());
        let rule = high_power_rule(&store, 0).await;
        power(&store, T0, Some(5000.0)).await;

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(FailingNotifier));
        assert!(evaluator.evaluate_rule(&rule, T0).await.unwrap().is_some());
        assert_eq!(store.recent_alert_events(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_window_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut rule = high_power_rule(&store, 0).await;
        rule.sustained_for_secs = -5;

        let evaluator = AlertEvaluator::new(Arc::clone(&store), Arc::new(NullNotifier));
        let err = evaluator.evaluate_rule(&rule, T0).await.unwrap_err();
        assert!(matches!(err, DetectError::InvalidRule(_)));
    }
}
