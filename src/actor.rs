//! # Stage: Actor Configuration Model
//!
//! ## Responsibility
//! Represent one configurable, role-bound actor (base persona + overrides +
//! score) and derive its effective behaviour for a cycle.
//!
//! ## Guarantees
//! - Merge is shallow: a set override field replaces the base field entirely
//! - `performance_score` is always clamped to `[0.0, 1.0]`
//! - Selection is deterministic: highest score wins, ties broken by id
//!
//! ## NOT Responsible For
//! - Persisting overrides (that belongs to `store`, via evolution-apply)
//! - Deciding *which* overrides to propose (that belongs to `analyst`)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Role an actor plays in the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Scores actors and proposes evolution.
    Analyst,
    /// Produces briefs.
    Strategist,
    /// Admission-control gate.
    Editor,
    /// Drafts articles.
    Writer,
    /// Rewrites drafts.
    Refiner,
    /// Adds CTA and FAQ structure.
    Optimizer,
    /// Gathers research signals.
    Researcher,
}

impl Role {
    /// Lowercase label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::Strategist => "strategist",
            Self::Editor => "editor",
            Self::Writer => "writer",
            Self::Refiner => "refiner",
            Self::Optimizer => "optimizer",
            Self::Researcher => "researcher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour settings shared by base personas, overrides and patches.
///
/// Every field is optional so the same shape serves as a partial patch.
/// The named fields are the ones the core branches on; `extra` carries
/// provider- or UI-specific settings the core never reads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorConfig {
    /// System prompt prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Voice / tone label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    /// 0.0 (cautious) – 1.0 (bold); drives generation temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertiveness: Option<f64>,
    /// Relative change applied to target length (e.g. `-0.1` = 10% shorter).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count_bias: Option<f64>,
    /// Partners never featured by this actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avoided_carriers: Option<Vec<String>>,
    /// CTA blocks per 1000 words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density_target: Option<f64>,
    /// Opaque settings; key-by-key replace on merge.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BehaviorConfig {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Shallow merge: each field set in `overrides` replaces the `base` field.
///
/// Nested values (the carrier list, `extra` values) are replaced whole, never
/// merged element-wise. `extra` keys absent from `overrides` fall through.
pub fn merge(base: &BehaviorConfig, overrides: &BehaviorConfig) -> BehaviorConfig {
    let mut extra = base.extra.clone();
    for (k, v) in &overrides.extra {
        extra.insert(k.clone(), v.clone());
    }
    BehaviorConfig {
        system_prompt: overrides
            .system_prompt
            .clone()
            .or_else(|| base.system_prompt.clone()),
        tone: overrides.tone.clone().or_else(|| base.tone.clone()),
        assertiveness: overrides.assertiveness.or(base.assertiveness),
        word_count_bias: overrides.word_count_bias.or(base.word_count_bias),
        avoided_carriers: overrides
            .avoided_carriers
            .clone()
            .or_else(|| base.avoided_carriers.clone()),
        density_target: overrides.density_target.or(base.density_target),
        extra,
    }
}

/// Behaviour derived for one cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectiveConfig {
    settings: BehaviorConfig,
}

impl EffectiveConfig {
    /// Derive from a persona and its overrides.
    pub fn from_parts(base: &BehaviorConfig, overrides: &BehaviorConfig) -> Self {
        Self {
            settings: merge(base, overrides),
        }
    }

    /// Merge a delta in place (mid-cycle evolution pre-application).
    pub fn apply_overrides(&mut self, patch: &BehaviorConfig) {
        self.settings = merge(&self.settings, patch);
    }

    /// Underlying merged settings.
    pub fn settings(&self) -> &BehaviorConfig {
        &self.settings
    }

    /// System prompt, empty if unset.
    pub fn system_prompt(&self) -> &str {
        self.settings.system_prompt.as_deref().unwrap_or("")
    }

    /// Assertiveness clamped to `[0, 1]`, default `0.5`.
    pub fn assertiveness(&self) -> f64 {
        self.settings.assertiveness.unwrap_or(0.5).clamp(0.0, 1.0)
    }

    /// Generation temperature derived from assertiveness (0.3–0.9).
    pub fn temperature(&self) -> f32 {
        (0.3 + 0.6 * self.assertiveness()) as f32
    }

    /// Word-count bias clamped to `[-0.5, 1.0]`, default `0.0`.
    pub fn word_count_bias(&self) -> f64 {
        self.settings.word_count_bias.unwrap_or(0.0).clamp(-0.5, 1.0)
    }

    /// Target length after applying the bias; never below 100 words.
    pub fn adjusted_length(&self, target: u32) -> u32 {
        let adjusted = f64::from(target) * (1.0 + self.word_count_bias());
        (adjusted.round() as u32).max(100)
    }

    /// Whether `carrier` is on the avoided list (case-insensitive).
    pub fn avoids(&self, carrier: &str) -> bool {
        self.settings
            .avoided_carriers
            .as_ref()
            .is_some_and(|list| list.iter().any(|c| c.eq_ignore_ascii_case(carrier)))
    }

    /// CTA blocks per 1000 words, default `2.0`, never negative.
    pub fn density_target(&self) -> f64 {
        self.settings.density_target.unwrap_or(2.0).max(0.0)
    }
}

/// One configurable actor as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Actor identifier.
    pub id: String,
    /// Role in the cycle.
    pub role: Role,
    /// Base persona.
    pub base_persona: BehaviorConfig,
    /// Dynamic overrides (admin action or evolution-apply).
    pub overrides: BehaviorConfig,
    /// Score in `[0, 1]`, written by the analyst.
    pub performance_score: f64,
    /// Informational capacity slots per cycle.
    pub capacity_slots: u32,
    /// Inactive actors are never selected.
    pub is_active: bool,
}

impl Actor {
    /// Create an active actor with an empty persona and a neutral score.
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            base_persona: BehaviorConfig::default(),
            overrides: BehaviorConfig::default(),
            performance_score: 0.5,
            capacity_slots: 1,
            is_active: true,
        }
    }

    /// Builder: set the base persona.
    pub fn with_persona(mut self, persona: BehaviorConfig) -> Self {
        self.base_persona = persona;
        self
    }

    /// Builder: set the score (clamped).
    pub fn with_score(mut self, score: f64) -> Self {
        self.set_score(score);
        self
    }

    /// Builder: set the active flag.
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Set the score, clamping to `[0, 1]`. NaN becomes `0.0`.
    pub fn set_score(&mut self, score: f64) {
        self.performance_score = clamp_score(score);
    }

    /// Effective behaviour from persisted persona + overrides.
    pub fn effective(&self) -> EffectiveConfig {
        EffectiveConfig::from_parts(&self.base_persona, &self.overrides)
    }
}

/// Clamp a score to `[0, 1]`, mapping NaN to `0.0`.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Sort by score descending, ties by id ascending.
fn by_score_desc(a: &Actor, b: &Actor) -> std::cmp::Ordering {
    b.performance_score
        .partial_cmp(&a.performance_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

/// The actors loaded for one cycle, with their effective configs.
///
/// Built from a fresh store read at cycle start, so in-memory changes made
/// through [`ActorRoster::apply_overrides`] never outlive the cycle.
#[derive(Debug, Clone, Default)]
pub struct ActorRoster {
    selected: HashMap<Role, Actor>,
    writers: Vec<Actor>,
    effective: HashMap<String, EffectiveConfig>,
}

impl ActorRoster {
    /// Build from every persisted actor.
    pub fn from_actors(actors: Vec<Actor>) -> Self {
        let mut active: Vec<Actor> = actors.into_iter().filter(|a| a.is_active).collect();
        active.sort_by(by_score_desc);

        let mut selected = HashMap::new();
        for actor in &active {
            selected.entry(actor.role).or_insert_with(|| actor.clone());
        }
        let writers: Vec<Actor> = active
            .iter()
            .filter(|a| a.role == Role::Writer)
            .cloned()
            .collect();
        let effective = active
            .iter()
            .map(|a| (a.id.clone(), a.effective()))
            .collect();

        Self {
            selected,
            writers,
            effective,
        }
    }

    /// The best active actor for `role`, if any.
    pub fn select(&self, role: Role) -> Option<&Actor> {
        self.selected.get(&role)
    }

    /// Active writers sorted by score descending.
    pub fn writers(&self) -> &[Actor] {
        &self.writers
    }

    /// Ids of the actors used this cycle: one per role plus every writer.
    pub fn used_actor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.selected.values().map(|a| a.id.clone()).collect();
        ids.extend(self.writers.iter().map(|a| a.id.clone()));
        ids.sort();
        ids.dedup();
        ids
    }

    /// Effective config for an actor id; default if unknown.
    pub fn effective_for(&self, actor_id: &str) -> EffectiveConfig {
        self.effective.get(actor_id).cloned().unwrap_or_default()
    }

    /// Effective config for the selected actor of `role`; default if none.
    pub fn effective_for_role(&self, role: Role) -> EffectiveConfig {
        self.select(role)
            .map(|a| self.effective_for(&a.id))
            .unwrap_or_default()
    }

    /// Apply a patch to one actor's in-memory effective config.
    ///
    /// Returns `false` when the actor is not part of this roster.
    pub fn apply_overrides(&mut self, actor_id: &str, patch: &BehaviorConfig) -> bool {
        match self.effective.get_mut(actor_id) {
            Some(cfg) => {
                cfg.apply_overrides(patch);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn persona() -> BehaviorConfig {
        let mut extra = BTreeMap::new();
        extra.insert("layout".to_string(), json!({"columns": 2, "sidebar": true}));
        extra.insert("badge".to_string(), json!("gold"));
        BehaviorConfig {
            system_prompt: Some("You write plainly.".into()),
            tone: Some("friendly".into()),
            assertiveness: Some(0.4),
            word_count_bias: None,
            avoided_carriers: Some(vec!["Acme".into(), "Globex".into()]),
            density_target: Some(1.5),
            extra,
        }
    }

    #[test]
    fn test_merge_override_fields_win() {
        let overrides = BehaviorConfig {
            assertiveness: Some(0.9),
            tone: Some("urgent".into()),
            ..Default::default()
        };
        let merged = merge(&persona(), &overrides);
        assert_eq!(merged.assertiveness, Some(0.9));
        assert_eq!(merged.tone.as_deref(), Some("urgent"));
        assert_eq!(merged.system_prompt.as_deref(), Some("You write plainly."));
        assert_eq!(merged.density_target, Some(1.5));
    }

    #[test]
    fn test_merge_is_shallow_for_nested_values() {
        let mut extra = BTreeMap::new();
        extra.insert("layout".to_string(), json!({"columns": 3}));
        let overrides = BehaviorConfig {
            avoided_carriers: Some(vec!["Initech".into()]),
            extra,
            ..Default::default()
        };
        let merged = merge(&persona(), &overrides);
        // nested object replaced whole, not deep-merged
        assert_eq!(merged.extra.get("layout"), Some(&json!({"columns": 3})));
        assert_eq!(merged.extra.get("badge"), Some(&json!("gold")));
        assert_eq!(merged.avoided_carriers, Some(vec!["Initech".to_string()]));
    }

    #[test]
    fn test_merge_with_empty_overrides_is_base() {
        assert_eq!(merge(&persona(), &BehaviorConfig::default()), persona());
    }

    #[test]
    fn test_apply_overrides_stacks_on_effective() {
        let mut eff = EffectiveConfig::from_parts(&persona(), &BehaviorConfig::default());
        eff.apply_overrides(&BehaviorConfig {
            word_count_bias: Some(-0.2),
            ..Default::default()
        });
        assert!((eff.word_count_bias() + 0.2).abs() < 1e-9);
        assert!((eff.assertiveness() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_effective_defaults_and_clamps() {
        let eff = EffectiveConfig::default();
        assert!((eff.assertiveness() - 0.5).abs() < 1e-9);
        assert!((eff.density_target() - 2.0).abs() < 1e-9);
        assert_eq!(eff.adjusted_length(1200), 1200);

        let wild = EffectiveConfig::from_parts(
            &BehaviorConfig {
                assertiveness: Some(3.0),
                word_count_bias: Some(-5.0),
                ..Default::default()
            },
            &BehaviorConfig::default(),
        );
        assert!((wild.assertiveness() - 1.0).abs() < 1e-9);
        assert_eq!(wild.adjusted_length(1000), 500);
    }

    #[test]
    fn test_avoids_is_case_insensitive() {
        let eff = EffectiveConfig::from_parts(&persona(), &BehaviorConfig::default());
        assert!(eff.avoids("acme"));
        assert!(!eff.avoids("Initech"));
    }

    #[test]
    fn test_set_score_clamps_and_handles_nan() {
        let mut a = Actor::new("w1", Role::Writer);
        a.set_score(1.7);
        assert_eq!(a.performance_score, 1.0);
        a.set_score(-0.3);
        assert_eq!(a.performance_score, 0.0);
        a.set_score(f64::NAN);
        assert_eq!(a.performance_score, 0.0);
    }

    #[test]
    fn test_roster_selects_best_active_per_role() {
        let roster = ActorRoster::from_actors(vec![
            Actor::new("w-low", Role::Writer).with_score(0.2),
            Actor::new("w-high", Role::Writer).with_score(0.9),
            Actor::new("w-off", Role::Writer).with_score(1.0).with_active(false),
            Actor::new("ed", Role::Editor),
        ]);
        assert_eq!(roster.select(Role::Writer).map(|a| a.id.as_str()), Some("w-high"));
        assert_eq!(roster.select(Role::Editor).map(|a| a.id.as_str()), Some("ed"));
        assert!(roster.select(Role::Analyst).is_none());
        let ids: Vec<&str> = roster.writers().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["w-high", "w-low"]);
    }

    #[test]
    fn test_roster_ties_break_by_id() {
        let roster = ActorRoster::from_actors(vec![
            Actor::new("b", Role::Writer).with_score(0.5),
            Actor::new("a", Role::Writer).with_score(0.5),
        ]);
        let ids: Vec<&str> = roster.writers().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_roster_apply_overrides_is_in_memory_only() {
        let actor = Actor::new("w1", Role::Writer).with_persona(persona());
        let mut roster = ActorRoster::from_actors(vec![actor.clone()]);
        assert!(roster.apply_overrides(
            "w1",
            &BehaviorConfig {
                assertiveness: Some(0.8),
                ..Default::default()
            }
        ));
        assert!((roster.effective_for("w1").assertiveness() - 0.8).abs() < 1e-9);
        // reloading from the persisted actor discards the change
        let fresh = ActorRoster::from_actors(vec![actor]);
        assert!((fresh.effective_for("w1").assertiveness() - 0.4).abs() < 1e-9);
        assert!(!roster.apply_overrides("ghost", &BehaviorConfig::default()));
    }

    #[test]
    fn test_behavior_config_serde_skips_unset_fields() {
        let patch = BehaviorConfig {
            assertiveness: Some(0.7),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).expect("test: serialize");
        assert_eq!(json, json!({"assertiveness": 0.7}));
    }

    #[test]
    fn test_used_actor_ids_cover_selected_roles_and_every_writer() {
        let roster = ActorRoster::from_actors(vec![
            Actor::new("w1", Role::Writer).with_score(0.9),
            Actor::new("w2", Role::Writer).with_score(0.4),
            Actor::new("e1", Role::Editor),
            Actor::new("e2", Role::Editor).with_active(false),
        ]);
        assert_eq!(roster.used_actor_ids(), vec!["e1", "w1", "w2"]);
    }
}
