use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::effects::Ability;
use super::state::{BeastInstance, MAX_LEVEL, MIN_LEVEL};

/// Levels at which an ability upgrade may unlock, ascending.
pub const MILESTONE_LEVELS: [u8; 3] = [4, 7, 9];

/// Cumulative XP needed to reach each level, index 0 = level 1.
pub const DEFAULT_XP_THRESHOLDS: [u32; MAX_LEVEL as usize] = [0, 2, 5, 9, 14, 20, 27, 35, 44];

/// Cumulative stat bonus at each level, index 0 = level 1.
pub const DEFAULT_STAT_CURVE: [StatGain; MAX_LEVEL as usize] = [
    StatGain::new(0, 0),
    StatGain::new(1, 1),
    StatGain::new(1, 2),
    StatGain::new(2, 3),
    StatGain::new(3, 4),
    StatGain::new(3, 5),
    StatGain::new(4, 6),
    StatGain::new(5, 7),
    StatGain::new(6, 9),
];

pub static DEFAULT_LEVELING: Lazy<LevelingConfig> = Lazy::new(LevelingConfig::default);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatGain {
    pub attack: i16,
    pub health: i16,
}

impl StatGain {
    pub const fn new(attack: i16, health: i16) -> Self {
        Self { attack, health }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityUpgrade {
    pub level: u8,
    pub ability: Ability,
}

/// Per-card leveling overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelingConfig {
    #[serde(default = "default_thresholds")]
    pub xp_thresholds: [u32; MAX_LEVEL as usize],
    #[serde(default = "default_curve")]
    pub stat_curve: [StatGain; MAX_LEVEL as usize],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ability_upgrades: Vec<AbilityUpgrade>,
}

fn default_thresholds() -> [u32; MAX_LEVEL as usize] {
    DEFAULT_XP_THRESHOLDS
}

fn default_curve() -> [StatGain; MAX_LEVEL as usize] {
    DEFAULT_STAT_CURVE
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            xp_thresholds: DEFAULT_XP_THRESHOLDS,
            stat_curve: DEFAULT_STAT_CURVE,
            ability_upgrades: Vec::new(),
        }
    }
}

impl LevelingConfig {
    pub fn with_upgrade(mut self, level: u8, ability: Ability) -> Self {
        self.ability_upgrades.push(AbilityUpgrade { level, ability });
        self
    }

    pub fn threshold(&self, level: u8) -> u32 {
        let index = level.clamp(MIN_LEVEL, MAX_LEVEL) as usize - 1;
        self.xp_thresholds[index]
    }

    pub fn cumulative_bonus(&self, level: u8) -> StatGain {
        let index = level.clamp(MIN_LEVEL, MAX_LEVEL) as usize - 1;
        self.stat_curve[index]
    }

    /// Highest milestone upgrade unlocked at `level`; 9 supersedes 7 supersedes 4.
    pub fn active_upgrade(&self, level: u8) -> Option<&Ability> {
        let mut active = None;
        for milestone in MILESTONE_LEVELS {
            if milestone > level {
                break;
            }
            if let Some(upgrade) = self
                .ability_upgrades
                .iter()
                .find(|upgrade| upgrade.level == milestone)
            {
                active = Some(&upgrade.ability);
            }
        }
        active
    }
}

/// XP accumulation and level-up application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelingSystem {
    pub xp_per_nectar: u32,
    pub combat_victory_xp: u32,
}

impl Default for LevelingSystem {
    fn default() -> Self {
        Self {
            xp_per_nectar: 1,
            combat_victory_xp: 1,
        }
    }
}

impl LevelingSystem {
    pub fn new(xp_per_nectar: u32, combat_victory_xp: u32) -> Self {
        Self {
            xp_per_nectar,
            combat_victory_xp,
        }
    }

    /// Cumulative XP needed for the next level, `None` at max level.
    pub fn xp_requirement(&self, beast: &BeastInstance) -> Option<u32> {
        if beast.level >= MAX_LEVEL {
            return None;
        }
        Some(beast.leveling().threshold(beast.level + 1))
    }

    pub fn can_level_up(&self, beast: &BeastInstance) -> bool {
        self.xp_requirement(beast)
            .map_or(false, |required| beast.xp >= required)
    }

    /// Levels up as many times as the accumulated XP allows. Returns each level reached.
    pub fn level_up(&self, beast: &mut BeastInstance) -> Vec<u8> {
        let mut reached = Vec::new();
        while self.can_level_up(beast) {
            let config = beast.leveling();
            let next = beast.level + 1;
            let before = config.cumulative_bonus(beast.level);
            let after = config.cumulative_bonus(next);
            let upgrade = config.active_upgrade(next).cloned();

            beast.grow_base_stats(after.attack - before.attack, after.health - before.health);
            beast.level = next;
            if upgrade.is_some() {
                beast.upgraded_ability = upgrade;
            }
            debug!(
                "beast {} ({}) reached level {}",
                beast.instance_id, beast.card.name, next
            );
            reached.push(next);
        }
        reached
    }

    pub fn gain_xp(&self, beast: &mut BeastInstance, amount: u32) -> Vec<u8> {
        if beast.level >= MAX_LEVEL {
            return Vec::new();
        }
        beast.xp = beast.xp.saturating_add(amount);
        self.level_up(beast)
    }

    pub fn xp_for_nectar(&self, nectar: u8) -> u32 {
        nectar as u32 * self.xp_per_nectar
    }
}
