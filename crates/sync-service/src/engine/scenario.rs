//! Read-only scenario tables.
//!
//! A scenario supplies the narrative node graph, item definitions and unlock
//! conditions, intervention techniques, mood thresholds and terminal
//! thresholds. Scenarios are loaded once at startup from a JSON library file
//! and shared between session actors as `Arc<Scenario>`.

use crate::model::event::{ItemAction, Outcome, TargetMetric};
use crate::model::state::ItemKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario library {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse scenario library: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid scenario {scenario_id}: {message}")]
    Invalid {
        scenario_id: String,
        message: String,
    },
}

/// Starting levels; mood is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricLevels {
    pub trust: f64,
    pub stress: f64,
    pub compliance: f64,
}

/// Mood derivation thresholds, evaluated in order:
/// breakthrough, anxious, defensive, otherwise calm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodThresholds {
    pub anxious_stress: f64,
    pub defensive_trust: f64,
    pub breakthrough_trust: f64,
    pub breakthrough_max_stress: f64,
}

/// Loss thresholds. Stress overload (raw stress above 1.0) is always a loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalThresholds {
    #[serde(default)]
    pub trust_floor: Option<f64>,
    #[serde(default)]
    pub compliance_floor: Option<f64>,
}

/// Additive metric deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEffect {
    #[serde(default)]
    pub trust: f64,
    #[serde(default)]
    pub stress: f64,
    #[serde(default)]
    pub compliance: f64,
}

impl MetricEffect {
    /// Effect touching a single metric.
    #[must_use]
    pub fn single(metric: TargetMetric, delta: f64) -> Self {
        let mut effect = Self::default();
        match metric {
            TargetMetric::Trust => effect.trust = delta,
            TargetMetric::Stress => effect.stress = delta,
            TargetMetric::Compliance => effect.compliance = delta,
        }
        effect
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceDefinition {
    pub id: String,
    pub next_node: String,
    #[serde(default)]
    pub effect: MetricEffect,
    #[serde(default)]
    pub sets_flags: Vec<String>,
    #[serde(default)]
    pub requires_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChoiceDefinition>,
    /// Reaching this node ends the session.
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl NodeDefinition {
    #[must_use]
    pub fn choice(&self, choice_id: &str) -> Option<&ChoiceDefinition> {
        self.choices.iter().find(|choice| choice.id == choice_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum UnlockCondition {
    NodeReached { node_id: String },
    FlagSet { flag: String },
}

impl UnlockCondition {
    /// Value recorded as the item's `unlockedBy`.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            UnlockCondition::NodeReached { node_id } => node_id,
            UnlockCondition::FlagSet { flag } => flag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRule {
    pub action: ItemAction,
    #[serde(default)]
    pub effect: MetricEffect,
    #[serde(default)]
    pub sets_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// `None` means visible from the start.
    #[serde(default)]
    pub unlock: Option<UnlockCondition>,
    #[serde(default)]
    pub interactions: Vec<InteractionRule>,
}

impl ItemDefinition {
    #[must_use]
    pub fn rule(&self, action: ItemAction) -> Option<&InteractionRule> {
        self.interactions.iter().find(|rule| rule.action == action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueEffect {
    pub metric: TargetMetric,
    pub per_intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueDefinition {
    pub id: String,
    pub effects: Vec<TechniqueEffect>,
}

impl TechniqueDefinition {
    /// Delta per intensity point for `metric`, if the technique affects it.
    #[must_use]
    pub fn per_intensity(&self, metric: TargetMetric) -> Option<f64> {
        self.effects
            .iter()
            .find(|effect| effect.metric == metric)
            .map(|effect| effect.per_intensity)
    }
}

/// Serialized form of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    pub id: String,
    pub start_node: String,
    pub initial_metrics: MetricLevels,
    pub mood: MoodThresholds,
    #[serde(default)]
    pub terminal: TerminalThresholds,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
    #[serde(default)]
    pub techniques: Vec<TechniqueDefinition>,
}

/// A validated scenario with lookup tables.
#[derive(Debug, Clone)]
pub struct Scenario {
    id: String,
    start_node: String,
    initial_metrics: MetricLevels,
    mood: MoodThresholds,
    terminal: TerminalThresholds,
    nodes: HashMap<String, NodeDefinition>,
    /// Kept in definition order; inventory order follows it.
    items: Vec<ItemDefinition>,
    techniques: HashMap<String, TechniqueDefinition>,
}

impl Scenario {
    /// Validate a definition and build its lookup tables.
    ///
    /// # Errors
    ///
    /// Returns `ScenarioError::Invalid` for dangling node references,
    /// duplicate ids or initial metrics outside `[0, 1]`.
    pub fn from_definition(definition: ScenarioDefinition) -> Result<Self, ScenarioError> {
        let invalid = |message: String| ScenarioError::Invalid {
            scenario_id: definition.id.clone(),
            message,
        };

        let levels = definition.initial_metrics;
        for (name, value) in [
            ("trust", levels.trust),
            ("stress", levels.stress),
            ("compliance", levels.compliance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("initial {name} {value} outside [0, 1]")));
            }
        }

        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            let mut choice_ids = HashSet::new();
            for choice in &node.choices {
                if !choice_ids.insert(choice.id.as_str()) {
                    return Err(invalid(format!(
                        "duplicate choice {} in node {}",
                        choice.id, node.id
                    )));
                }
            }
            if nodes.insert(node.id.clone(), node.clone()).is_some() {
                return Err(invalid(format!("duplicate node {}", node.id)));
            }
        }

        if !nodes.contains_key(&definition.start_node) {
            return Err(invalid(format!(
                "start node {} does not exist",
                definition.start_node
            )));
        }
        for node in nodes.values() {
            for choice in &node.choices {
                if !nodes.contains_key(&choice.next_node) {
                    return Err(invalid(format!(
                        "choice {} in node {} leads to unknown node {}",
                        choice.id, node.id, choice.next_node
                    )));
                }
            }
        }

        let mut item_ids = HashSet::new();
        for item in &definition.items {
            if !item_ids.insert(item.id.as_str()) {
                return Err(invalid(format!("duplicate item {}", item.id)));
            }
            if let Some(UnlockCondition::NodeReached { node_id }) = &item.unlock {
                if !nodes.contains_key(node_id) {
                    return Err(invalid(format!(
                        "item {} unlocks at unknown node {node_id}",
                        item.id
                    )));
                }
            }
        }

        let mut techniques = HashMap::with_capacity(definition.techniques.len());
        for technique in &definition.techniques {
            if techniques
                .insert(technique.id.clone(), technique.clone())
                .is_some()
            {
                return Err(invalid(format!("duplicate technique {}", technique.id)));
            }
        }

        Ok(Self {
            id: definition.id,
            start_node: definition.start_node,
            initial_metrics: definition.initial_metrics,
            mood: definition.mood,
            terminal: definition.terminal,
            nodes,
            items: definition.items,
            techniques,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn start_node(&self) -> &str {
        &self.start_node
    }

    #[must_use]
    pub fn initial_metrics(&self) -> MetricLevels {
        self.initial_metrics
    }

    #[must_use]
    pub fn mood_thresholds(&self) -> &MoodThresholds {
        &self.mood
    }

    #[must_use]
    pub fn terminal_thresholds(&self) -> &TerminalThresholds {
        &self.terminal
    }

    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(node_id)
    }

    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<&ItemDefinition> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.iter()
    }

    #[must_use]
    pub fn technique(&self, technique_id: &str) -> Option<&TechniqueDefinition> {
        self.techniques.get(technique_id)
    }
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    scenarios: Vec<ScenarioDefinition>,
}

/// All scenarios known to this instance, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ScenarioLibrary {
    scenarios: HashMap<String, Arc<Scenario>>,
}

impl ScenarioLibrary {
    /// Parse a library document: `{ "scenarios": [ ... ] }`.
    ///
    /// # Errors
    ///
    /// Returns `ScenarioError` if the JSON is malformed, any scenario fails
    /// validation, or two scenarios share an id.
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let file: LibraryFile = serde_json::from_str(json)?;
        let mut library = Self::default();
        for definition in file.scenarios {
            library.insert(Scenario::from_definition(definition)?)?;
        }
        Ok(library)
    }

    /// Load a library document from disk.
    ///
    /// # Errors
    ///
    /// Returns `ScenarioError::Io` if the file cannot be read, or any error
    /// from [`ScenarioLibrary::from_json`].
    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Add one scenario.
    ///
    /// # Errors
    ///
    /// Returns `ScenarioError::Invalid` if the id is already present.
    pub fn insert(&mut self, scenario: Scenario) -> Result<(), ScenarioError> {
        if self.scenarios.contains_key(scenario.id()) {
            return Err(ScenarioError::Invalid {
                scenario_id: scenario.id().to_string(),
                message: "duplicate scenario id".to_string(),
            });
        }
        self.scenarios
            .insert(scenario.id().to_string(), Arc::new(scenario));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, scenario_id: &str) -> Option<Arc<Scenario>> {
        self.scenarios.get(scenario_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

/// Scenario library shipped in `fixtures/` for unit tests.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn fixture_library() -> ScenarioLibrary {
    ScenarioLibrary::from_json(include_str!("../../fixtures/scenarios.json"))
        .expect("fixture scenario library is valid")
}
