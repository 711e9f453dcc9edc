//! Metrics reducer.
//!
//! Pure `(metrics, event) -> (metrics, diff)`. Every event type maps to a
//! fixed metric effect looked up in the scenario; interventions scale the
//! technique's per-intensity delta by `intensity`. Results are clamped to
//! `[0, 1]` and the unclamped stress is reported so the state reducer can
//! detect overload.

use crate::engine::scenario::{MetricEffect, MetricLevels, MoodThresholds, Scenario};
use crate::errors::RejectionReason;
use crate::model::event::{EventKind, InterventionPayload, MetricsDiff};
use crate::model::state::{Metrics, Mood};

/// Valid intervention intensities.
pub const INTENSITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// Outcome of one metrics reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsReduction {
    pub metrics: Metrics,
    pub diff: MetricsDiff,
    /// Stress before clamping; above 1.0 means overload.
    pub raw_stress: f64,
}

/// Mood is a pure function of metrics.
#[must_use]
pub fn derive_mood(trust: f64, stress: f64, thresholds: &MoodThresholds) -> Mood {
    if trust >= thresholds.breakthrough_trust && stress <= thresholds.breakthrough_max_stress {
        Mood::Breakthrough
    } else if stress >= thresholds.anxious_stress {
        Mood::Anxious
    } else if trust <= thresholds.defensive_trust {
        Mood::Defensive
    } else {
        Mood::Calm
    }
}

/// Metrics at session start.
#[must_use]
pub fn initial_metrics(levels: MetricLevels, thresholds: &MoodThresholds) -> Metrics {
    let trust = clamp_unit(levels.trust);
    let stress = clamp_unit(levels.stress);
    Metrics {
        trust,
        stress,
        compliance: clamp_unit(levels.compliance),
        mood: derive_mood(trust, stress, thresholds),
    }
}

/// Effect of an intervention.
///
/// # Errors
///
/// Rejects intensities outside 1..=10, unknown techniques and metrics the
/// technique does not affect.
pub fn intervention_effect(
    scenario: &Scenario,
    payload: &InterventionPayload,
) -> Result<MetricEffect, RejectionReason> {
    if !INTENSITY_RANGE.contains(&payload.intensity) {
        return Err(RejectionReason::IntensityOutOfRange(payload.intensity));
    }
    let technique = scenario
        .technique(&payload.technique_id)
        .ok_or_else(|| RejectionReason::UnknownTechnique(payload.technique_id.clone()))?;
    let per_intensity = technique.per_intensity(payload.target_metric).ok_or_else(|| {
        RejectionReason::UnsupportedMetric {
            technique_id: payload.technique_id.clone(),
            metric: payload.target_metric.as_str(),
        }
    })?;

    Ok(MetricEffect::single(
        payload.target_metric,
        per_intensity * f64::from(payload.intensity),
    ))
}

/// Fixed metric effect of `kind` under `scenario`.
///
/// # Errors
///
/// Returns the rejection for unknown techniques, nodes, choices or items.
pub fn effect_of(scenario: &Scenario, kind: &EventKind) -> Result<MetricEffect, RejectionReason> {
    match kind {
        EventKind::InterventionTriggered(payload) => intervention_effect(scenario, payload),
        EventKind::DialogueChoice(payload) => {
            let node = scenario
                .node(&payload.node_id)
                .ok_or_else(|| RejectionReason::UnknownNode(payload.node_id.clone()))?;
            let choice = node
                .choice(&payload.choice_id)
                .ok_or_else(|| RejectionReason::UnknownChoice(payload.choice_id.clone()))?;
            Ok(choice.effect)
        }
        EventKind::ItemInteraction(payload) => {
            let item = scenario
                .item(&payload.item_id)
                .ok_or_else(|| RejectionReason::UnknownItem(payload.item_id.clone()))?;
            Ok(item
                .rule(payload.action)
                .map(|rule| rule.effect)
                .unwrap_or_default())
        }
        EventKind::SessionInit(_)
        | EventKind::PlayerJoined(_)
        | EventKind::ConnectionLost(_)
        | EventKind::SessionTerminated(_)
        | EventKind::ActivityChanged(_)
        | EventKind::SurrenderRequested(_)
        | EventKind::StateUpdate(_)
        | EventKind::GameOver(_) => Ok(MetricEffect::default()),
    }
}

/// Apply an additive effect, clamp and recompute mood.
#[must_use]
pub fn apply_effect(
    metrics: &Metrics,
    effect: MetricEffect,
    thresholds: &MoodThresholds,
) -> MetricsReduction {
    let raw_stress = metrics.stress + effect.stress;
    let trust = clamp_unit(metrics.trust + effect.trust);
    let stress = clamp_unit(raw_stress);
    let compliance = clamp_unit(metrics.compliance + effect.compliance);

    MetricsReduction {
        metrics: Metrics {
            trust,
            stress,
            compliance,
            mood: derive_mood(trust, stress, thresholds),
        },
        diff: MetricsDiff {
            stress_delta: stress - metrics.stress,
            trust_delta: trust - metrics.trust,
        },
        raw_stress,
    }
}

/// Reduce `metrics` by one validated event.
///
/// # Errors
///
/// See [`effect_of`].
pub fn reduce_metrics(
    scenario: &Scenario,
    metrics: &Metrics,
    kind: &EventKind,
) -> Result<MetricsReduction, RejectionReason> {
    let effect = effect_of(scenario, kind)?;
    Ok(apply_effect(metrics, effect, scenario.mood_thresholds()))
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::scenario::fixture_library;
    use crate::model::event::{DialogueChoicePayload, TargetMetric};

    const THRESHOLDS: MoodThresholds = MoodThresholds {
        anxious_stress: 0.7,
        defensive_trust: 0.3,
        breakthrough_trust: 0.8,
        breakthrough_max_stress: 0.3,
    };

    fn metrics(trust: f64, stress: f64, compliance: f64) -> Metrics {
        Metrics {
            trust,
            stress,
            compliance,
            mood: derive_mood(trust, stress, &THRESHOLDS),
        }
    }

    fn intervention(technique: &str, intensity: u8, metric: TargetMetric) -> EventKind {
        EventKind::InterventionTriggered(InterventionPayload {
            technique_id: technique.to_string(),
            intensity,
            target_metric: metric,
        })
    }

    #[test]
    fn test_mood_derivation_order() {
        assert_eq!(derive_mood(0.9, 0.1, &THRESHOLDS), Mood::Breakthrough);
        assert_eq!(derive_mood(0.9, 0.8, &THRESHOLDS), Mood::Anxious);
        assert_eq!(derive_mood(0.2, 0.8, &THRESHOLDS), Mood::Anxious);
        assert_eq!(derive_mood(0.2, 0.4, &THRESHOLDS), Mood::Defensive);
        assert_eq!(derive_mood(0.5, 0.4, &THRESHOLDS), Mood::Calm);
    }

    #[test]
    fn test_intervention_scales_with_intensity() {
        let scenario = fixture_library().get("first-session").unwrap();
        let start = metrics(0.5, 0.5, 0.5);

        let result = reduce_metrics(
            &scenario,
            &start,
            &intervention("BREATHING_EXERCISE", 5, TargetMetric::Stress),
        )
        .unwrap();

        assert!((result.metrics.stress - 0.35).abs() < 1e-9);
        assert!((result.diff.stress_delta + 0.15).abs() < 1e-9);
        assert_eq!(result.diff.trust_delta, 0.0);
        assert_eq!(result.metrics.trust, 0.5);
    }

    #[test]
    fn test_overload_reports_raw_stress() {
        let scenario = fixture_library().get("first-session").unwrap();
        let start = metrics(0.5, 0.95, 0.5);

        let result = reduce_metrics(
            &scenario,
            &start,
            &intervention("CONFRONTATION", 9, TargetMetric::Stress),
        )
        .unwrap();

        assert!(result.raw_stress > 1.0);
        assert_eq!(result.metrics.stress, 1.0);
        assert!((result.diff.stress_delta - 0.05).abs() < 1e-9);
        assert_eq!(result.metrics.mood, Mood::Anxious);
    }

    #[test]
    fn test_intervention_rejections() {
        let scenario = fixture_library().get("first-session").unwrap();
        let start = metrics(0.5, 0.5, 0.5);

        assert_eq!(
            reduce_metrics(&scenario, &start, &intervention("CONFRONTATION", 0, TargetMetric::Stress))
                .unwrap_err(),
            RejectionReason::IntensityOutOfRange(0)
        );
        assert_eq!(
            reduce_metrics(&scenario, &start, &intervention("CONFRONTATION", 11, TargetMetric::Stress))
                .unwrap_err(),
            RejectionReason::IntensityOutOfRange(11)
        );
        assert_eq!(
            reduce_metrics(&scenario, &start, &intervention("HYPNOSIS", 3, TargetMetric::Stress))
                .unwrap_err(),
            RejectionReason::UnknownTechnique("HYPNOSIS".to_string())
        );
        assert!(matches!(
            reduce_metrics(&scenario, &start, &intervention("CONFRONTATION", 3, TargetMetric::Trust))
                .unwrap_err(),
            RejectionReason::UnsupportedMetric { metric: "TRUST", .. }
        ));
    }

    #[test]
    fn test_dialogue_choice_effect() {
        let scenario = fixture_library().get("first-session").unwrap();
        let start = metrics(0.5, 0.95, 0.5);

        let result = reduce_metrics(
            &scenario,
            &start,
            &EventKind::DialogueChoice(DialogueChoicePayload {
                node_id: "N1".to_string(),
                choice_id: "C1".to_string(),
            }),
        )
        .unwrap();

        assert!((result.metrics.trust - 0.55).abs() < 1e-9);
        assert_eq!(result.metrics.stress, 0.95);
    }

    #[test]
    fn test_outputs_stay_in_unit_range() {
        let extremes = [-5.0, -1.0, -0.3, 0.0, 0.3, 1.0, 5.0];
        for start in [0.0, 0.25, 0.5, 1.0] {
            for delta in extremes {
                let effect = MetricEffect {
                    trust: delta,
                    stress: -delta,
                    compliance: delta,
                };
                let result = apply_effect(&metrics(start, start, start), effect, &THRESHOLDS);
                for value in [
                    result.metrics.trust,
                    result.metrics.stress,
                    result.metrics.compliance,
                ] {
                    assert!((0.0..=1.0).contains(&value), "{value} out of range");
                }
            }
        }
    }

    #[test]
    fn test_presence_events_have_no_effect() {
        let scenario = fixture_library().get("first-session").unwrap();
        let start = metrics(0.5, 0.5, 0.5);

        let result = reduce_metrics(
            &scenario,
            &start,
            &EventKind::PlayerJoined(crate::model::event::PlayerJoinedPayload {
                seat: crate::model::state::Seat::Doctor,
            }),
        )
        .unwrap();

        assert_eq!(result.metrics, start);
        assert_eq!(result.diff, MetricsDiff::default());
    }
}
