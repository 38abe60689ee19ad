//! Additive, sourced, durationed stat modifiers and the derived-stat recompute.

use serde::{Deserialize, Serialize};

use super::state::BeastInstance;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Stat {
    Attack,
    Health,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModifierSource {
    Base,
    BuffZone,
    Ability,
    Magic,
    Habitat,
    Equipment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ModifierDuration {
    Permanent,
    EndOfTurn,
    Turns { remaining: u8 },
}

impl Default for ModifierDuration {
    fn default() -> Self {
        ModifierDuration::Permanent
    }
}

impl ModifierDuration {
    pub fn turns(count: u8) -> Self {
        ModifierDuration::Turns { remaining: count }
    }

    /// Advances one end-of-turn step. Returns `false` once expired.
    pub fn tick(&mut self) -> bool {
        match self {
            ModifierDuration::Permanent => true,
            ModifierDuration::EndOfTurn => false,
            ModifierDuration::Turns { remaining } => {
                *remaining = remaining.saturating_sub(1);
                *remaining > 0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatModifier {
    pub source: ModifierSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
    pub stat: Stat,
    pub value: i16,
    #[serde(default)]
    pub duration: ModifierDuration,
}

impl StatModifier {
    pub fn new(source: ModifierSource, stat: Stat, value: i16, duration: ModifierDuration) -> Self {
        Self {
            source,
            source_id: None,
            stat,
            value,
            duration,
        }
    }

    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }
}

/// A status, immunity or flag that expires like a modifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lasting<T> {
    pub value: T,
    #[serde(default)]
    pub duration: ModifierDuration,
}

impl<T> Lasting<T> {
    pub fn new(value: T, duration: ModifierDuration) -> Self {
        Self { value, duration }
    }
}

fn age<T>(entries: &mut Vec<Lasting<T>>) {
    entries.retain_mut(|entry| entry.duration.tick());
}

impl BeastInstance {
    pub fn add_modifier(&mut self, modifier: StatModifier) {
        self.modifiers.push(modifier);
        self.recompute_stats();
    }

    /// Pushes without recomputing. Callers batching several changes recompute once at the end.
    pub(crate) fn push_modifier(&mut self, modifier: StatModifier) {
        self.modifiers.push(modifier);
    }

    /// Drops every modifier from `source` and leaves derived stats stale.
    pub(crate) fn strip_modifiers(&mut self, source: ModifierSource) {
        self.modifiers.retain(|modifier| modifier.source != source);
    }

    /// Drops every modifier from `source` (optionally only one source id). Returns how many went.
    pub fn remove_modifiers_by_source(
        &mut self,
        source: ModifierSource,
        source_id: Option<u32>,
    ) -> usize {
        let before = self.modifiers.len();
        self.modifiers.retain(|modifier| {
            let same_source = modifier.source == source;
            let same_id = source_id.map_or(true, |id| modifier.source_id == Some(id));
            !(same_source && same_id)
        });
        let removed = before - self.modifiers.len();
        if removed > 0 {
            self.recompute_stats();
        }
        removed
    }

    /// End-of-turn aging for modifiers, statuses, immunities, restrictions and flags.
    pub fn update_end_of_turn(&mut self) {
        self.modifiers
            .retain_mut(|modifier| modifier.duration.tick());
        age(&mut self.statuses);
        age(&mut self.immunities);
        age(&mut self.targeting);
        age(&mut self.attack_flags);
        self.temporary_health = 0;
        self.recompute_stats();
    }

    pub fn modifier_total(&self, stat: Stat) -> i16 {
        self.modifiers
            .iter()
            .filter(|modifier| modifier.stat == stat)
            .fold(0i16, |total, modifier| total.saturating_add(modifier.value))
    }

    /// Rederives attack and max health. Keeps the health percentage across a max change.
    pub fn recompute_stats(&mut self) {
        self.current_attack = self
            .base_attack
            .saturating_add(self.modifier_total(Stat::Attack))
            .max(0);

        let old_max = self.max_health.max(1);
        let new_max = self
            .base_health
            .saturating_add(self.modifier_total(Stat::Health))
            .max(1);

        if new_max != old_max {
            let current = self.current_health.max(0) as i32;
            let scaled = (current * new_max as i32 + old_max as i32 / 2) / old_max as i32;
            // A living beast is never killed by a recompute.
            let floor = if current > 0 { 1 } else { 0 };
            self.current_health = scaled.max(floor) as i16;
        }
        self.max_health = new_max;
        self.current_health = self.current_health.clamp(0, self.max_health);
    }

    /// Permanent growth of base stats from a level-up; current health rises by the same amount.
    pub(crate) fn grow_base_stats(&mut self, attack: i16, health: i16) {
        self.base_attack = self.base_attack.saturating_add(attack).max(0);
        self.base_health = self.base_health.saturating_add(health).max(1);
        self.current_attack = self
            .base_attack
            .saturating_add(self.modifier_total(Stat::Attack))
            .max(0);
        self.max_health = self
            .base_health
            .saturating_add(self.modifier_total(Stat::Health))
            .max(1);
        self.current_health = self
            .current_health
            .saturating_add(health)
            .clamp(0, self.max_health);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Affinity, Card, StatusKind};

    fn beast(attack: i16, health: i16) -> BeastInstance {
        BeastInstance::new(1, Card::bloom(10, "Thornback", Affinity::Forest, 2, attack, health), 0)
    }

    #[test]
    fn modifiers_add_to_derived_stats() {
        let mut beast = beast(2, 3);
        beast.add_modifier(StatModifier::new(
            ModifierSource::Ability,
            Stat::Attack,
            2,
            ModifierDuration::Permanent,
        ));
        beast.add_modifier(StatModifier::new(
            ModifierSource::Magic,
            Stat::Health,
            3,
            ModifierDuration::Permanent,
        ));
        assert_eq!(beast.current_attack, 4);
        assert_eq!(beast.max_health, 6);
        assert_eq!(beast.current_health, 6);
        assert_eq!(beast.base_attack, 2, "base stats are untouched by modifiers");
    }

    #[test]
    fn attack_never_goes_negative_and_max_health_floors_at_one() {
        let mut beast = beast(2, 3);
        beast.add_modifier(StatModifier::new(
            ModifierSource::Magic,
            Stat::Attack,
            -5,
            ModifierDuration::Permanent,
        ));
        beast.add_modifier(StatModifier::new(
            ModifierSource::Magic,
            Stat::Health,
            -9,
            ModifierDuration::Permanent,
        ));
        assert_eq!(beast.current_attack, 0);
        assert_eq!(beast.max_health, 1);
        assert_eq!(beast.current_health, 1);
    }

    #[test]
    fn removing_a_source_round_trips_stats() {
        let mut beast = beast(3, 4);
        beast.take_damage(1);
        let (attack, max_health, health) =
            (beast.current_attack, beast.max_health, beast.current_health);

        for value in [1, 2] {
            beast.add_modifier(
                StatModifier::new(ModifierSource::BuffZone, Stat::Attack, value, ModifierDuration::Permanent)
                    .with_source_id(77),
            );
            beast.add_modifier(
                StatModifier::new(ModifierSource::BuffZone, Stat::Health, value, ModifierDuration::Permanent)
                    .with_source_id(77),
            );
        }
        assert_eq!(beast.current_attack, attack + 3);
        assert_eq!(beast.max_health, max_health + 3);

        let removed = beast.remove_modifiers_by_source(ModifierSource::BuffZone, None);
        assert_eq!(removed, 4);
        assert_eq!(beast.current_attack, attack);
        assert_eq!(beast.max_health, max_health);
        assert_eq!(beast.current_health, health);
    }

    #[test]
    fn remove_by_source_id_leaves_other_ids() {
        let mut beast = beast(1, 1);
        beast.add_modifier(
            StatModifier::new(ModifierSource::BuffZone, Stat::Attack, 1, ModifierDuration::Permanent)
                .with_source_id(1),
        );
        beast.add_modifier(
            StatModifier::new(ModifierSource::BuffZone, Stat::Attack, 2, ModifierDuration::Permanent)
                .with_source_id(2),
        );
        beast.remove_modifiers_by_source(ModifierSource::BuffZone, Some(1));
        assert_eq!(beast.current_attack, 3);
    }

    #[test]
    fn health_percentage_survives_max_change() {
        let mut beast = beast(1, 4);
        beast.take_damage(2);
        beast.add_modifier(StatModifier::new(
            ModifierSource::Habitat,
            Stat::Health,
            4,
            ModifierDuration::Permanent,
        ));
        assert_eq!(beast.max_health, 8);
        assert_eq!(beast.current_health, 4, "half health stays half health");
    }

    #[test]
    fn end_of_turn_modifier_expires_on_next_sweep() {
        let mut beast = beast(2, 2);
        beast.add_modifier(StatModifier::new(
            ModifierSource::Ability,
            Stat::Attack,
            3,
            ModifierDuration::EndOfTurn,
        ));
        assert_eq!(beast.modifiers.len(), 1);
        assert_eq!(beast.current_attack, 5);

        beast.update_end_of_turn();
        assert!(beast.modifiers.is_empty());
        assert_eq!(beast.current_attack, 2);
    }

    #[test]
    fn turn_limited_modifiers_count_down() {
        let mut beast = beast(2, 2);
        beast.add_modifier(StatModifier::new(
            ModifierSource::Magic,
            Stat::Attack,
            1,
            ModifierDuration::turns(2),
        ));
        beast.update_end_of_turn();
        assert_eq!(beast.current_attack, 3);
        beast.update_end_of_turn();
        assert_eq!(beast.current_attack, 2);
    }

    #[test]
    fn statuses_age_with_modifiers() {
        let mut beast = beast(2, 2);
        beast
            .statuses
            .push(Lasting::new(StatusKind::CannotAttack, ModifierDuration::EndOfTurn));
        beast.temporary_health = 3;
        beast.update_end_of_turn();
        assert!(!beast.has_status(StatusKind::CannotAttack));
        assert_eq!(beast.temporary_health, 0);
    }

    #[test]
    fn base_growth_raises_current_health_too() {
        let mut beast = beast(2, 3);
        beast.take_damage(1);
        beast.grow_base_stats(1, 2);
        assert_eq!(beast.base_attack, 3);
        assert_eq!(beast.max_health, 5);
        assert_eq!(beast.current_health, 4);
    }
}
