//! 游戏核心逻辑模块（状态、修正值、效果、升级、规则引擎与对局控制）。

pub mod controller;
pub mod effects;
pub mod leveling;
pub mod modifiers;
pub mod rules;
pub mod state;

#[cfg(test)]
pub(crate) mod fixtures;

pub use controller::{
    check_battle_end, start_match, BattleController, BattleResult, CardCatalog, MatchConfig,
    VictoryReason,
};
pub use effects::{
    Ability, AbilityCost, CardEffect, DamageAmount, EffectCondition, EffectContext, EffectEngine,
    EffectKind, EffectOrigin, EffectTrigger, HealAmount, Resource, SearchFilter, TargetSelector,
};
pub use leveling::{LevelingConfig, LevelingSystem, StatGain};
pub use modifiers::{ModifierDuration, ModifierSource, Stat, StatModifier};
pub use rules::{
    AttackAction, AttackOutcome, FeedNectarAction, PlayCardAction, PlayOutcome, RuleEngine,
    RuleError, RulesConfig, UseAbilityAction,
};
pub use state::{
    opponent_of, Affinity, BeastInstance, BeastRef, Card, CardId, CardVariant, CounterKind,
    GameEvent, GamePhase, IntegrityError, InstanceId, MatchState, Player, PlayerId, TargetRef,
};
