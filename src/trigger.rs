//! Insert triggers as application logic.
//!
//! A [`TriggerSet`] maps an inserted row to the [`Effect`]s it causes: flag
//! flips on the owning workflow record and notifications. It does no I/O; the
//! store applies the effects inside the inserting transaction and publishes
//! the notifications only after that transaction commits.

use crate::bus::{Notification, Topic};
use crate::workflow::{Capability, WorkflowId};

/// Kinds of rows that fire triggers on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Artist,
    Track,
    Play,
}

impl EntityKind {
    /// Topic announcing an insert of this kind.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Artist => Topic::ArtistInserted,
            Self::Track => Topic::TrackInserted,
            Self::Play => Topic::PlayInserted,
        }
    }
}

/// Side effect of an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Set `<capability>_required` on the workflow record.
    Require {
        workflow_id: WorkflowId,
        capability: Capability,
    },
    /// Queue a notification for publication after commit.
    Emit(Notification),
}

/// One registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerRule {
    pub entity: EntityKind,
    /// Capability this insert makes required, if any.
    pub capability: Option<Capability>,
}

/// The registered triggers.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    rules: Vec<TriggerRule>,
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl TriggerSet {
    /// No triggers at all: inserts neither flip flags nor notify.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Artists require genre lookup, tracks require alternate-source
    /// resolution, plays only notify.
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(EntityKind::Artist, Some(Capability::GENRE))
            .with_rule(EntityKind::Track, Some(Capability::ALTERNATE_SOURCE))
            .with_rule(EntityKind::Play, None)
    }

    /// Register another trigger.
    pub fn with_rule(mut self, entity: EntityKind, capability: Option<Capability>) -> Self {
        self.rules.push(TriggerRule { entity, capability });
        self
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// Every capability a workflow record tracks, in registration order.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        for cap in self.rules.iter().filter_map(|r| r.capability) {
            if !caps.contains(&cap) {
                caps.push(cap);
            }
        }
        caps
    }

    /// The entity whose insert makes a capability required.
    pub fn entity_for(&self, capability: Capability) -> Option<EntityKind> {
        self.rules
            .iter()
            .find(|r| r.capability == Some(capability))
            .map(|r| r.entity)
    }

    /// Effects of inserting `row`.
    ///
    /// Flag flips come first, then a single insert notification. Rows without
    /// an owning workflow only notify.
    pub fn fire(
        &self,
        entity: EntityKind,
        workflow_id: Option<WorkflowId>,
        row: serde_json::Value,
    ) -> Vec<Effect> {
        let matching: Vec<&TriggerRule> =
            self.rules.iter().filter(|r| r.entity == entity).collect();
        if matching.is_empty() {
            return Vec::new();
        }

        let mut effects: Vec<Effect> = match workflow_id {
            Some(workflow_id) => matching
                .iter()
                .filter_map(|r| r.capability)
                .map(|capability| Effect::Require {
                    workflow_id,
                    capability,
                })
                .collect(),
            None => Vec::new(),
        };

        effects.push(Effect::Emit(Notification::new(entity.topic(), row)));
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artist_insert_requires_genre_then_notifies() {
        let triggers = TriggerSet::standard();
        let id = WorkflowId::new();
        let effects = triggers.fire(EntityKind::Artist, Some(id), json!({"id": 7}));

        assert_eq!(
            effects,
            vec![
                Effect::Require {
                    workflow_id: id,
                    capability: Capability::GENRE
                },
                Effect::Emit(Notification::new(Topic::ArtistInserted, json!({"id": 7}))),
            ]
        );
    }

    #[test]
    fn test_play_insert_only_notifies() {
        let effects = TriggerSet::standard().fire(EntityKind::Play, Some(WorkflowId::new()), json!({}));
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Emit(n) if n.topic == Topic::PlayInserted));
    }

    #[test]
    fn test_seeded_row_without_workflow_only_notifies() {
        let effects = TriggerSet::standard().fire(EntityKind::Artist, None, json!({}));
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Emit(_)));
    }

    #[test]
    fn test_custom_capability_extends_set() {
        let lyrics = Capability::new("lyrics");
        let triggers = TriggerSet::standard().with_rule(EntityKind::Track, Some(lyrics));

        assert_eq!(
            triggers.capabilities(),
            vec![Capability::GENRE, Capability::ALTERNATE_SOURCE, lyrics]
        );
        assert_eq!(triggers.entity_for(lyrics), Some(EntityKind::Track));

        let effects = triggers.fire(EntityKind::Track, Some(WorkflowId::new()), json!({}));
        let requires = effects
            .iter()
            .filter(|e| matches!(e, Effect::Require { .. }))
            .count();
        let emits = effects.len() - requires;
        assert_eq!(requires, 2);
        assert_eq!(emits, 1);
    }

    #[test]
    fn test_empty_set_does_nothing() {
        let triggers = TriggerSet::empty();
        assert!(triggers.fire(EntityKind::Artist, Some(WorkflowId::new()), json!({})).is_empty());
        assert!(triggers.capabilities().is_empty());
        assert_eq!(triggers.entity_for(Capability::GENRE), None);
    }
}
