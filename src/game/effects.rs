use std::collections::BTreeMap;
use std::str::FromStr;

use log::{debug, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::modifiers::{Lasting, ModifierDuration, ModifierSource, Stat, StatModifier};
use super::rules::RuleError;
use super::state::{
    opponent_of, Affinity, AttackFlag, BeastInstance, BeastRef, Card, CardId, CardVariant,
    CounterKind, GameEvent, Immunity, InstanceId, MatchState, Player, PlayerId, StatusKind,
    TargetRef, TargetingRestriction, FIELD_SLOTS,
};

/// Nested trigger resolution stops past this depth.
const MAX_TRIGGER_DEPTH: u8 = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EffectTrigger {
    OnSummon,
    OnAttack,
    OnDamage,
    OnDestroy,
    StartOfTurn,
    EndOfTurn,
    Activated,
    Passive,
}

impl Default for EffectTrigger {
    fn default() -> Self {
        EffectTrigger::OnSummon
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TargetSelector {
    #[serde(rename = "self")]
    SelfBeast,
    DirectTarget,
    Attacker,
    AllAllies,
    AllEnemies,
    AdjacentAllies,
    AdjacentEnemies,
    RandomEnemy,
    DamagedEnemies,
    WiltingEnemies,
    HighestAttackEnemy,
    LowestHealthEnemy,
    OpponentGardener,
    PlayerGardener,
}

impl TargetSelector {
    /// Selectors that pick one beast and therefore respect untargetability.
    pub fn is_single_target(&self) -> bool {
        matches!(
            self,
            TargetSelector::DirectTarget
                | TargetSelector::RandomEnemy
                | TargetSelector::HighestAttackEnemy
                | TargetSelector::LowestHealthEnemy
        )
    }
}

impl FromStr for TargetSelector {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "self" => Ok(TargetSelector::SelfBeast),
            "direct-target" | "target" => Ok(TargetSelector::DirectTarget),
            "attacker" => Ok(TargetSelector::Attacker),
            "all-allies" => Ok(TargetSelector::AllAllies),
            "all-enemies" => Ok(TargetSelector::AllEnemies),
            "adjacent-allies" => Ok(TargetSelector::AdjacentAllies),
            "adjacent-enemies" => Ok(TargetSelector::AdjacentEnemies),
            "random-enemy" => Ok(TargetSelector::RandomEnemy),
            "damaged-enemies" => Ok(TargetSelector::DamagedEnemies),
            "wilting-enemies" => Ok(TargetSelector::WiltingEnemies),
            "highest-attack-enemy" => Ok(TargetSelector::HighestAttackEnemy),
            "lowest-health-enemy" => Ok(TargetSelector::LowestHealthEnemy),
            "opponent-gardener" => Ok(TargetSelector::OpponentGardener),
            "player-gardener" => Ok(TargetSelector::PlayerGardener),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EffectCondition {
    HasCounter { counter: CounterKind },
    HealthBelow { threshold: i16 },
    HealthAbove { threshold: i16 },
    IsDamaged,
    IsWilting,
    AffinityIs { affinity: Affinity },
    AffinityIsNot { affinity: Affinity },
    CostAtLeast { cost: u8 },
    CostAtMost { cost: u8 },
}

impl EffectCondition {
    pub fn holds_for_beast(&self, beast: &BeastInstance) -> bool {
        match *self {
            EffectCondition::HasCounter { counter } => beast.counter(counter) > 0,
            EffectCondition::HealthBelow { threshold } => beast.current_health < threshold,
            EffectCondition::HealthAbove { threshold } => beast.current_health > threshold,
            EffectCondition::IsDamaged => beast.is_damaged(),
            EffectCondition::IsWilting => beast.is_wilting(),
            EffectCondition::AffinityIs { affinity } => beast.card.affinity == Some(affinity),
            EffectCondition::AffinityIsNot { affinity } => beast.card.affinity != Some(affinity),
            EffectCondition::CostAtLeast { cost } => beast.card.cost >= cost,
            EffectCondition::CostAtMost { cost } => beast.card.cost <= cost,
        }
    }

    /// Only health-based conditions apply to a gardener.
    pub fn holds_for_player(&self, player: &Player) -> bool {
        match *self {
            EffectCondition::HealthBelow { threshold } => player.health < threshold,
            EffectCondition::HealthAbove { threshold } => player.health > threshold,
            EffectCondition::IsDamaged => player.health < player.max_health,
            EffectCondition::IsWilting => player.health == 1,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DamageAmount {
    Flat { amount: i16 },
    SourceAttack,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum HealAmount {
    Flat { amount: i16 },
    Full,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Resource {
    Nectar { amount: u8 },
    ExtraSummon { amount: u8 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SearchFilter {
    Any,
    Variant { variant: CardVariant },
    Affinity { affinity: Affinity },
    MaxCost { cost: u8 },
}

impl SearchFilter {
    pub fn matches(&self, card: &Card) -> bool {
        match *self {
            SearchFilter::Any => true,
            SearchFilter::Variant { variant } => card.variant == variant,
            SearchFilter::Affinity { affinity } => card.affinity == Some(affinity),
            SearchFilter::MaxCost { cost } => card.cost <= cost,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EffectKind {
    ModifyStat {
        stat: Stat,
        value: i16,
        #[serde(default)]
        duration: ModifierDuration,
    },
    Damage {
        amount: DamageAmount,
    },
    Heal {
        amount: HealAmount,
    },
    Draw {
        count: u8,
    },
    AddCounter {
        counter: CounterKind,
        count: u8,
    },
    RemoveCounter {
        counter: CounterKind,
        count: u8,
    },
    AddHabitatCounter {
        counter: CounterKind,
        count: u8,
    },
    GrantImmunity {
        immunity: Immunity,
        #[serde(default)]
        duration: ModifierDuration,
    },
    GrantUntargetable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_cost: Option<u8>,
        #[serde(default)]
        duration: ModifierDuration,
    },
    GrantAttackFlag {
        flag: AttackFlag,
        #[serde(default)]
        duration: ModifierDuration,
    },
    Reposition {
        slot: u8,
    },
    GainResource {
        resource: Resource,
    },
    PreventAttack {
        #[serde(default)]
        duration: ModifierDuration,
    },
    PreventAbilities {
        #[serde(default)]
        duration: ModifierDuration,
    },
    SearchDeck {
        filter: SearchFilter,
        count: u8,
    },
    Destroy,
    GrantTemporaryHealth {
        amount: i16,
    },
}

/// One step of an ability: what happens, to whom, and when it is allowed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardEffect {
    pub kind: EffectKind,
    pub target: TargetSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EffectCondition>,
}

impl CardEffect {
    pub fn new(kind: EffectKind, target: TargetSelector) -> Self {
        Self {
            kind,
            target,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: EffectCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn damage(amount: i16, target: TargetSelector) -> Self {
        Self::new(
            EffectKind::Damage {
                amount: DamageAmount::Flat { amount },
            },
            target,
        )
    }

    pub fn heal(amount: i16, target: TargetSelector) -> Self {
        Self::new(
            EffectKind::Heal {
                amount: HealAmount::Flat { amount },
            },
            target,
        )
    }

    pub fn modify(stat: Stat, value: i16, duration: ModifierDuration, target: TargetSelector) -> Self {
        Self::new(
            EffectKind::ModifyStat {
                stat,
                value,
                duration,
            },
            target,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AbilityCost {
    Nectar { amount: u8 },
    Discard { count: u8 },
    RemoveHabitatCounters { counter: CounterKind, count: u8 },
}

/// Trigger, optional activation cost and an ordered effect list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ability {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub trigger: EffectTrigger,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub costs: Vec<AbilityCost>,
    #[serde(default)]
    pub effects: Vec<CardEffect>,
}

impl Ability {
    pub fn new(name: impl Into<String>, trigger: EffectTrigger) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            trigger,
            costs: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_cost(mut self, cost: AbilityCost) -> Self {
        self.costs.push(cost);
        self
    }

    pub fn with_effect(mut self, effect: CardEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// What kind of card produced an effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EffectOrigin {
    Ability,
    Magic,
    Trap,
    Buff,
    Habitat,
}

impl EffectOrigin {
    pub fn modifier_source(&self) -> ModifierSource {
        match self {
            EffectOrigin::Ability => ModifierSource::Ability,
            EffectOrigin::Magic | EffectOrigin::Trap => ModifierSource::Magic,
            EffectOrigin::Buff => ModifierSource::BuffZone,
            EffectOrigin::Habitat => ModifierSource::Habitat,
        }
    }

    fn blocked_by(&self) -> Option<Immunity> {
        match self {
            EffectOrigin::Ability => Some(Immunity::Abilities),
            EffectOrigin::Magic => Some(Immunity::Magic),
            EffectOrigin::Trap => Some(Immunity::Trap),
            EffectOrigin::Buff | EffectOrigin::Habitat => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectContext {
    pub trigger: EffectTrigger,
    pub origin: EffectOrigin,
    pub controller: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_card: Option<CardId>,
    #[serde(default)]
    pub source_cost: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker: Option<InstanceId>,
}

impl EffectContext {
    pub fn new(trigger: EffectTrigger, origin: EffectOrigin, controller: PlayerId) -> Self {
        Self {
            trigger,
            origin,
            controller,
            source: None,
            source_card: None,
            source_cost: 0,
            target: None,
            attacker: None,
        }
    }

    pub fn for_beast(trigger: EffectTrigger, controller: PlayerId, beast: &BeastInstance) -> Self {
        Self {
            source: Some(beast.instance_id),
            source_card: Some(beast.card.id),
            source_cost: beast.card.cost,
            ..Self::new(trigger, EffectOrigin::Ability, controller)
        }
    }

    pub fn for_card(
        trigger: EffectTrigger,
        origin: EffectOrigin,
        controller: PlayerId,
        card: &Card,
    ) -> Self {
        Self {
            source_card: Some(card.id),
            source_cost: card.cost,
            ..Self::new(trigger, origin, controller)
        }
    }

    pub fn with_target(mut self, target: Option<TargetRef>) -> Self {
        self.target = target;
        self
    }

    pub fn with_attacker(mut self, attacker: Option<InstanceId>) -> Self {
        self.attacker = attacker;
        self
    }
}

/// Resolves ability effect lists against the match state.
pub struct EffectEngine {
    rng: SmallRng,
    depth: u8,
}

impl Default for EffectEngine {
    fn default() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            depth: 0,
        }
    }
}

impl EffectEngine {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            depth: 0,
        }
    }

    pub fn rng_mut(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Pays the ability's costs, then runs every effect. A failed cost aborts with nothing applied.
    pub fn resolve_ability(
        &mut self,
        state: &mut MatchState,
        ability: &Ability,
        ctx: &EffectContext,
    ) -> Result<Vec<GameEvent>, RuleError> {
        let mut events = Self::pay_costs(state, ctx.controller, &ability.costs)?;
        events.push(GameEvent::AbilityResolved {
            player_id: ctx.controller,
            card_id: ctx.source_card.unwrap_or_default(),
            trigger: ability.trigger,
        });
        self.resolve_effects(state, &ability.effects, ctx, &mut events);
        Ok(events)
    }

    pub fn resolve_effects(
        &mut self,
        state: &mut MatchState,
        effects: &[CardEffect],
        ctx: &EffectContext,
        events: &mut Vec<GameEvent>,
    ) {
        for effect in effects {
            let targets =
                self.resolve_targets(state, effect.target, effect.condition.as_ref(), ctx);
            if targets.is_empty() {
                debug!("{:?} resolved no targets for {:?}", effect.target, effect.kind);
                continue;
            }
            for target in targets {
                self.apply_effect(state, &effect.kind, target, ctx, events);
            }
        }
    }

    /// Fires every ability of one beast bound to `trigger`.
    pub fn fire_trigger(
        &mut self,
        state: &mut MatchState,
        instance_id: InstanceId,
        trigger: EffectTrigger,
        target: Option<TargetRef>,
        attacker: Option<InstanceId>,
    ) -> Vec<GameEvent> {
        if self.depth >= MAX_TRIGGER_DEPTH {
            warn!("trigger depth exceeded, dropping {trigger:?} of instance {instance_id}");
            return Vec::new();
        }
        let Some(at) = state.locate(instance_id) else {
            warn!("{trigger:?} fired for missing instance {instance_id}");
            return Vec::new();
        };
        let Some(beast) = state.beast(at) else {
            return Vec::new();
        };
        let abilities = beast.triggered_abilities(trigger);
        if abilities.is_empty() {
            return Vec::new();
        }
        let ctx = EffectContext::for_beast(trigger, at.player, beast)
            .with_target(target)
            .with_attacker(attacker);

        self.depth += 1;
        let mut events = Vec::new();
        for ability in &abilities {
            match self.resolve_ability(state, ability, &ctx) {
                Ok(mut resolved) => events.append(&mut resolved),
                Err(err) => debug!("{} not resolved: {err}", ability.name),
            }
        }
        self.depth -= 1;
        events
    }

    /// Routes a beast at or below zero health through on-destroy, then clears its slot.
    pub fn destroy_if_dead(
        &mut self,
        state: &mut MatchState,
        instance_id: InstanceId,
        killer: Option<InstanceId>,
    ) -> Vec<GameEvent> {
        let Some(at) = state.locate(instance_id) else {
            return Vec::new();
        };
        match state.beast_mut(at) {
            Some(beast) if beast.current_health <= 0 && !beast.destroying => {
                beast.destroying = true;
            }
            _ => return Vec::new(),
        }

        let mut events =
            self.fire_trigger(state, instance_id, EffectTrigger::OnDestroy, None, killer);

        if let Some(at) = state.locate(instance_id) {
            let player = state.player_mut(at.player);
            if let Some(beast) = player.field[at.slot as usize].take() {
                debug!("{} destroyed in slot {}", beast.card.name, at.slot);
                events.push(GameEvent::BeastDestroyed {
                    player_id: at.player,
                    slot: at.slot,
                    card_id: beast.card.id,
                });
                player.graveyard.push(beast.card);
            }
        }
        events
    }

    /// Shared cost-payment routine: validates every cost before paying any.
    pub fn pay_costs(
        state: &mut MatchState,
        controller: PlayerId,
        costs: &[AbilityCost],
    ) -> Result<Vec<GameEvent>, RuleError> {
        let mut nectar = 0u8;
        let mut discard = 0u8;
        let mut habitat_counters: BTreeMap<CounterKind, u8> = BTreeMap::new();
        for cost in costs {
            match *cost {
                AbilityCost::Nectar { amount } => nectar = nectar.saturating_add(amount),
                AbilityCost::Discard { count } => discard = discard.saturating_add(count),
                AbilityCost::RemoveHabitatCounters { counter, count } => {
                    let entry = habitat_counters.entry(counter).or_insert(0);
                    *entry = entry.saturating_add(count);
                }
            }
        }

        let player = state.player(controller);
        if player.nectar < nectar {
            return Err(RuleError::NotEnoughNectar {
                required: nectar,
                available: player.nectar,
            });
        }
        if player.hand.len() < discard as usize {
            return Err(RuleError::NotEnoughCards {
                required: discard,
                available: player.hand.len(),
            });
        }
        for (&counter, &count) in &habitat_counters {
            let available = state
                .habitat
                .as_ref()
                .map_or(0, |habitat| habitat.counter(counter));
            if available < count {
                return Err(RuleError::NotEnoughHabitatCounters {
                    counter,
                    required: count,
                    available,
                });
            }
        }

        let mut events = Vec::new();
        let player = state.player_mut(controller);
        if nectar > 0 {
            player.nectar -= nectar;
            events.push(GameEvent::NectarSpent {
                player_id: controller,
                amount: nectar,
            });
        }
        for _ in 0..discard {
            if let Some(card) = player.hand.pop() {
                events.push(GameEvent::CardDiscarded {
                    player_id: controller,
                    card_id: card.id,
                });
                player.graveyard.push(card);
            }
        }
        if let Some(habitat) = state.habitat.as_mut() {
            for (counter, count) in habitat_counters {
                if let Some(current) = habitat.counters.get_mut(&counter) {
                    *current -= count;
                    if *current == 0 {
                        habitat.counters.remove(&counter);
                    }
                }
                events.push(GameEvent::CountersChanged {
                    player_id: controller,
                    slot: None,
                    counter,
                    delta: -(count as i16),
                });
            }
        }
        Ok(events)
    }

    /// The one target-resolution routine shared by abilities, magic, traps, buffs and habitats.
    pub fn resolve_targets(
        &mut self,
        state: &MatchState,
        selector: TargetSelector,
        condition: Option<&EffectCondition>,
        ctx: &EffectContext,
    ) -> Vec<TargetRef> {
        let controller = ctx.controller;
        let enemy = opponent_of(controller);
        let source = ctx.source.and_then(|id| state.locate(id));

        let living = |player: PlayerId| -> Vec<TargetRef> {
            state
                .player(player)
                .living_beasts()
                .map(|beast| TargetRef::beast(BeastRef::new(player, beast.slot)))
                .collect()
        };
        let neighbours = |player: PlayerId, centre: u8| -> Vec<TargetRef> {
            [centre.checked_sub(1), centre.checked_add(1)]
                .into_iter()
                .flatten()
                .filter(|slot| (*slot as usize) < FIELD_SLOTS)
                .map(|slot| BeastRef::new(player, slot))
                .filter(|at| state.living_beast(*at).is_some())
                .map(TargetRef::beast)
                .collect()
        };

        let candidates: Vec<TargetRef> = match selector {
            TargetSelector::SelfBeast => source
                .filter(|at| state.living_beast(*at).is_some())
                .map(TargetRef::beast)
                .into_iter()
                .collect(),
            TargetSelector::DirectTarget => ctx
                .target
                .filter(|target| match target.as_beast() {
                    Some(at) => state.living_beast(at).is_some(),
                    None => true,
                })
                .into_iter()
                .collect(),
            TargetSelector::Attacker => ctx
                .attacker
                .and_then(|id| state.locate(id))
                .filter(|at| state.living_beast(*at).is_some())
                .map(TargetRef::beast)
                .into_iter()
                .collect(),
            TargetSelector::AllAllies => living(controller),
            TargetSelector::AllEnemies
            | TargetSelector::RandomEnemy
            | TargetSelector::DamagedEnemies
            | TargetSelector::WiltingEnemies
            | TargetSelector::HighestAttackEnemy
            | TargetSelector::LowestHealthEnemy => living(enemy),
            TargetSelector::AdjacentAllies => {
                let centre = source
                    .filter(|at| at.player == controller)
                    .or_else(|| {
                        ctx.target
                            .and_then(|target| target.as_beast())
                            .filter(|at| at.player == controller)
                    });
                centre.map_or_else(Vec::new, |at| neighbours(controller, at.slot))
            }
            TargetSelector::AdjacentEnemies => {
                let centre = ctx
                    .target
                    .and_then(|target| target.as_beast())
                    .filter(|at| at.player == enemy)
                    .or(source);
                centre.map_or_else(Vec::new, |at| neighbours(enemy, at.slot))
            }
            TargetSelector::OpponentGardener => vec![TargetRef::Player { player: enemy }],
            TargetSelector::PlayerGardener => vec![TargetRef::Player { player: controller }],
        };

        let source_beast = source.and_then(|at| state.beast(at));
        let mut targets: Vec<TargetRef> = candidates
            .into_iter()
            .filter(|target| match target.as_beast() {
                Some(at) => {
                    let Some(beast) = state.beast(at) else {
                        return false;
                    };
                    if let Some(condition) = condition {
                        if !condition.holds_for_beast(beast) {
                            return false;
                        }
                    }
                    if at.player != controller {
                        if let Some(immunity) = ctx.origin.blocked_by() {
                            if beast.is_immune(immunity) {
                                return false;
                            }
                        }
                        if selector.is_single_target() && beast.is_untargetable_by(ctx.source_cost)
                        {
                            return false;
                        }
                    }
                    true
                }
                None => condition.map_or(true, |condition| match source_beast {
                    Some(beast) => condition.holds_for_beast(beast),
                    None => condition.holds_for_player(state.player(target.player())),
                }),
            })
            .collect();

        let beast_of = |target: &TargetRef| target.as_beast().and_then(|at| state.beast(at));
        match selector {
            TargetSelector::DamagedEnemies => {
                targets.retain(|target| beast_of(target).map_or(false, BeastInstance::is_damaged))
            }
            TargetSelector::WiltingEnemies => {
                targets.retain(|target| beast_of(target).map_or(false, BeastInstance::is_wilting))
            }
            TargetSelector::RandomEnemy => {
                targets = targets.choose(&mut self.rng).copied().into_iter().collect();
            }
            TargetSelector::HighestAttackEnemy => {
                targets = targets
                    .iter()
                    .copied()
                    .filter_map(|target| beast_of(&target).map(|beast| (target, beast)))
                    .max_by(|(_, a), (_, b)| {
                        a.current_attack
                            .cmp(&b.current_attack)
                            .then(b.slot.cmp(&a.slot))
                    })
                    .map(|(target, _)| target)
                    .into_iter()
                    .collect();
            }
            TargetSelector::LowestHealthEnemy => {
                targets = targets
                    .iter()
                    .copied()
                    .filter_map(|target| beast_of(&target).map(|beast| (target, beast)))
                    .min_by_key(|(_, beast)| beast.current_health)
                    .map(|(target, _)| target)
                    .into_iter()
                    .collect();
            }
            _ => {}
        }
        targets
    }

    fn apply_effect(
        &mut self,
        state: &mut MatchState,
        kind: &EffectKind,
        target: TargetRef,
        ctx: &EffectContext,
        events: &mut Vec<GameEvent>,
    ) {
        match target {
            TargetRef::Player { player } => self.apply_to_player(state, kind, player, ctx, events),
            TargetRef::Beast { player, slot } => {
                self.apply_to_beast(state, kind, BeastRef::new(player, slot), ctx, events)
            }
        }
    }

    fn source_attack(state: &MatchState, ctx: &EffectContext) -> i16 {
        ctx.source
            .and_then(|id| state.locate(id))
            .and_then(|at| state.beast(at))
            .map_or(0, |beast| beast.current_attack)
    }

    fn damage_value(state: &MatchState, amount: DamageAmount, ctx: &EffectContext) -> i16 {
        match amount {
            DamageAmount::Flat { amount } => amount,
            DamageAmount::SourceAttack => Self::source_attack(state, ctx),
        }
    }

    fn apply_to_player(
        &mut self,
        state: &mut MatchState,
        kind: &EffectKind,
        player_id: PlayerId,
        ctx: &EffectContext,
        events: &mut Vec<GameEvent>,
    ) {
        match *kind {
            EffectKind::Damage { amount } => {
                let amount = Self::damage_value(state, amount, ctx);
                let taken = state.player_mut(player_id).take_damage(amount);
                if taken > 0 {
                    events.push(GameEvent::PlayerDamaged {
                        player_id,
                        amount: taken,
                    });
                }
            }
            EffectKind::Heal { amount } => {
                let player = state.player_mut(player_id);
                let amount = match amount {
                    HealAmount::Flat { amount } => amount,
                    HealAmount::Full => player.max_health,
                };
                let healed = player.heal(amount);
                if healed > 0 {
                    events.push(GameEvent::PlayerHealed {
                        player_id,
                        amount: healed,
                    });
                }
            }
            EffectKind::Draw { count } => {
                let player = state.player_mut(player_id);
                for _ in 0..count {
                    match player.draw() {
                        Some(card_id) => events.push(GameEvent::CardDrawn { player_id, card_id }),
                        None => break,
                    }
                }
            }
            EffectKind::GainResource { resource } => {
                let player = state.player_mut(player_id);
                match resource {
                    Resource::Nectar { amount } => {
                        player.gain_nectar(amount);
                        events.push(GameEvent::NectarGained { player_id, amount });
                    }
                    Resource::ExtraSummon { amount } => {
                        player.extra_summons = player.extra_summons.saturating_add(amount);
                    }
                }
            }
            EffectKind::SearchDeck { filter, count } => {
                let player = state.player_mut(player_id);
                let picks: Vec<usize> = (0..player.deck.len())
                    .rev()
                    .filter(|&index| filter.matches(&player.deck[index]))
                    .take(count as usize)
                    .collect();
                // Indices are descending, so earlier removals never shift later ones.
                for index in picks {
                    let card = player.deck.remove(index);
                    events.push(GameEvent::CardSearched {
                        player_id,
                        card_id: card.id,
                    });
                    player.hand.push(card);
                }
            }
            EffectKind::AddHabitatCounter { counter, count } => {
                if let Some(habitat) = state.habitat.as_mut() {
                    let entry = habitat.counters.entry(counter).or_insert(0);
                    *entry = entry.saturating_add(count);
                    events.push(GameEvent::CountersChanged {
                        player_id,
                        slot: None,
                        counter,
                        delta: count as i16,
                    });
                }
            }
            _ => debug!("{kind:?} has no effect on a gardener"),
        }
    }

    fn apply_to_beast(
        &mut self,
        state: &mut MatchState,
        kind: &EffectKind,
        at: BeastRef,
        ctx: &EffectContext,
        events: &mut Vec<GameEvent>,
    ) {
        let (instance_id, alive) = match state.beast(at) {
            Some(beast) => (beast.instance_id, beast.is_alive()),
            None => return,
        };
        if !alive {
            return;
        }
        let player_id = at.player;
        let slot = at.slot;

        match *kind {
            EffectKind::ModifyStat {
                stat,
                value,
                duration,
            } => {
                let mut modifier =
                    StatModifier::new(ctx.origin.modifier_source(), stat, value, duration);
                modifier.source_id = ctx.source_card;
                if let Some(beast) = state.beast_mut(at) {
                    beast.add_modifier(modifier);
                }
                events.push(GameEvent::StatModified {
                    player_id,
                    slot,
                    stat,
                    value,
                });
            }
            EffectKind::Damage { amount } => {
                let amount = Self::damage_value(state, amount, ctx);
                let taken = match state.beast_mut(at) {
                    Some(beast) => beast.take_damage(amount),
                    None => return,
                };
                if taken > 0 {
                    events.push(GameEvent::BeastDamaged {
                        player_id,
                        slot,
                        amount: taken,
                    });
                    let mut triggered = self.fire_trigger(
                        state,
                        instance_id,
                        EffectTrigger::OnDamage,
                        None,
                        ctx.source,
                    );
                    events.append(&mut triggered);
                }
                let mut destroyed = self.destroy_if_dead(state, instance_id, ctx.source);
                events.append(&mut destroyed);
            }
            EffectKind::Heal { amount } => {
                if let Some(beast) = state.beast_mut(at) {
                    let amount = match amount {
                        HealAmount::Flat { amount } => amount,
                        HealAmount::Full => beast.max_health,
                    };
                    let healed = beast.heal(amount);
                    if healed > 0 {
                        events.push(GameEvent::BeastHealed {
                            player_id,
                            slot,
                            amount: healed,
                        });
                    }
                }
            }
            EffectKind::AddCounter { counter, count } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast.add_counter(counter, count);
                    events.push(GameEvent::CountersChanged {
                        player_id,
                        slot: Some(slot),
                        counter,
                        delta: count as i16,
                    });
                }
            }
            EffectKind::RemoveCounter { counter, count } => {
                if let Some(beast) = state.beast_mut(at) {
                    let removed = beast.remove_counter(counter, count);
                    if removed > 0 {
                        events.push(GameEvent::CountersChanged {
                            player_id,
                            slot: Some(slot),
                            counter,
                            delta: -(removed as i16),
                        });
                    }
                }
            }
            EffectKind::GrantImmunity { immunity, duration } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast.immunities.push(Lasting::new(immunity, duration));
                    events.push(GameEvent::StatusApplied { player_id, slot });
                }
            }
            EffectKind::GrantUntargetable { min_cost, duration } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast
                        .targeting
                        .push(Lasting::new(TargetingRestriction { min_cost }, duration));
                    events.push(GameEvent::StatusApplied { player_id, slot });
                }
            }
            EffectKind::GrantAttackFlag { flag, duration } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast.attack_flags.push(Lasting::new(flag, duration));
                    events.push(GameEvent::StatusApplied { player_id, slot });
                }
            }
            EffectKind::PreventAttack { duration } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast
                        .statuses
                        .push(Lasting::new(StatusKind::CannotAttack, duration));
                    events.push(GameEvent::StatusApplied { player_id, slot });
                }
            }
            EffectKind::PreventAbilities { duration } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast
                        .statuses
                        .push(Lasting::new(StatusKind::CannotUseAbilities, duration));
                    events.push(GameEvent::StatusApplied { player_id, slot });
                }
            }
            EffectKind::GrantTemporaryHealth { amount } => {
                if let Some(beast) = state.beast_mut(at) {
                    beast.temporary_health = beast.temporary_health.saturating_add(amount.max(0));
                    events.push(GameEvent::StatusApplied { player_id, slot });
                }
            }
            EffectKind::Reposition { slot: to } => {
                if to as usize >= FIELD_SLOTS || to == slot {
                    return;
                }
                let field = &mut state.player_mut(player_id).field;
                field.swap(slot as usize, to as usize);
                for (index, occupant) in field.iter_mut().enumerate() {
                    if let Some(beast) = occupant {
                        beast.slot = index as u8;
                    }
                }
                events.push(GameEvent::BeastMoved {
                    player_id,
                    from: slot,
                    to,
                });
            }
            EffectKind::Destroy => {
                match state.beast_mut(at) {
                    Some(beast) if !beast.is_immune(Immunity::Destroy) => beast.current_health = 0,
                    _ => return,
                }
                let mut destroyed = self.destroy_if_dead(state, instance_id, ctx.source);
                events.append(&mut destroyed);
            }
            EffectKind::Draw { .. }
            | EffectKind::GainResource { .. }
            | EffectKind::SearchDeck { .. }
            | EffectKind::AddHabitatCounter { .. } => {
                self.apply_to_player(state, kind, player_id, ctx, events)
            }
        }
    }
}
