use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    effects::{EffectContext, EffectEngine, EffectKind, EffectOrigin, EffectTrigger},
    leveling::LevelingSystem,
    modifiers::{ModifierDuration, ModifierSource, StatModifier},
    state::{
        opponent_of, ActiveBuff, AttackFlag, BeastInstance, BeastRef, Card, CardId, CardVariant,
        CounterKind, GameEvent, Habitat, InstanceId, IntegrityError, MatchState, Player,
        PlayerId, StatusKind, TargetRef, FIELD_SLOTS, MAX_LEVEL, MAX_NECTAR,
    },
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RulesConfig {
    pub max_nectar: u8,
    pub xp_per_nectar: u32,
    /// Bloom plays allowed per turn before extra summons; `None` is unlimited.
    pub summons_per_turn: Option<u8>,
    pub combat_victory_xp: u32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_nectar: MAX_NECTAR,
            xp_per_nectar: 1,
            summons_per_turn: None,
            combat_victory_xp: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayCardAction {
    pub player_id: PlayerId,
    pub hand_index: usize,
    #[serde(default)]
    pub target: Option<TargetRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttackAction {
    pub player_id: PlayerId,
    pub attacker_slot: u8,
    /// `None` attacks the opposing gardener.
    #[serde(default)]
    pub target_slot: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UseAbilityAction {
    pub player_id: PlayerId,
    pub slot: u8,
    #[serde(default)]
    pub target: Option<TargetRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedNectarAction {
    pub player_id: PlayerId,
    pub slot: u8,
    pub amount: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum RuleError {
    #[error("Battle is already over")]
    BattleOver,
    #[error("Not this player's turn")]
    NotPlayerTurn,
    #[error("Invalid card index")]
    InvalidCardIndex { index: usize },
    #[error("Not enough nectar")]
    NotEnoughNectar { required: u8, available: u8 },
    #[error("Field is full")]
    FieldFull,
    #[error("Trap zone is full")]
    TrapZoneFull,
    #[error("Buff zone is full")]
    BuffZoneFull,
    #[error("No summons left this turn")]
    SummonLimitReached,
    #[error("No beast in that slot")]
    InvalidSlot { slot: u8 },
    #[error("Invalid target")]
    InvalidTarget,
    #[error("Beast has summoning sickness")]
    SummoningSickness,
    #[error("Beast cannot attack")]
    AttackPrevented,
    #[error("Opponent still has beasts on the field")]
    OpponentHasBeasts,
    #[error("No activated ability")]
    NoActivatedAbility,
    #[error("Ability already used this turn")]
    AbilityAlreadyUsed,
    #[error("Beast cannot use abilities")]
    AbilitiesPrevented,
    #[error("Not enough cards to discard")]
    NotEnoughCards { required: u8, available: usize },
    #[error("Not enough habitat counters")]
    NotEnoughHabitatCounters {
        counter: CounterKind,
        required: u8,
        available: u8,
    },
    #[error("Beast is already at max level")]
    MaxLevel,
    #[error("State integrity violated: {error:?}")]
    IntegrityViolation { error: IntegrityError },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayOutcome {
    pub card_id: CardId,
    pub variant: CardVariant,
    pub events: Vec<GameEvent>,
    /// A face-down enemy trap sprung by this play.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap: Option<Card>,
}

impl PlayOutcome {
    pub fn is_trap(&self) -> bool {
        self.variant == CardVariant::Trap
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttackOutcome {
    /// Damage the attacker dealt to its target.
    pub damage: i16,
    pub events: Vec<GameEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap: Option<Card>,
}

/// Authoritative transition functions over a [`MatchState`].
#[derive(Default)]
pub struct RuleEngine {
    effects: EffectEngine,
    leveling: LevelingSystem,
    config: RulesConfig,
}

impl RuleEngine {
    pub fn new(config: RulesConfig) -> Self {
        Self {
            effects: EffectEngine::default(),
            leveling: LevelingSystem::new(config.xp_per_nectar, config.combat_victory_xp),
            config,
        }
    }

    pub fn with_seed(config: RulesConfig, seed: u64) -> Self {
        Self {
            effects: EffectEngine::with_seed(seed),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn leveling(&self) -> &LevelingSystem {
        &self.leveling
    }

    fn ensure_in_progress(state: &MatchState) -> Result<(), RuleError> {
        if state.players.iter().any(|player| player.health <= 0) {
            return Err(RuleError::BattleOver);
        }
        Ok(())
    }

    fn ensure_turn_owner(state: &MatchState, player_id: PlayerId) -> Result<(), RuleError> {
        if state.active_player != player_id {
            return Err(RuleError::NotPlayerTurn);
        }
        Ok(())
    }

    pub fn ensure_integrity(state: &MatchState) -> Result<(), RuleError> {
        state
            .integrity_check()
            .map_err(|error| RuleError::IntegrityViolation { error })
    }

    fn validate_target(state: &MatchState, target: TargetRef) -> Result<(), RuleError> {
        if target.player() > 1 {
            return Err(RuleError::InvalidTarget);
        }
        if let Some(at) = target.as_beast() {
            if at.slot as usize >= FIELD_SLOTS || state.living_beast(at).is_none() {
                return Err(RuleError::InvalidTarget);
            }
        }
        Ok(())
    }

    fn can_summon(&self, player: &Player) -> bool {
        self.config.summons_per_turn.map_or(true, |limit| {
            player.summons_this_turn < limit.saturating_add(player.extra_summons)
        })
    }

    /// Validates everything up front; a rejected play leaves the state untouched.
    pub fn play_card(
        &mut self,
        state: &mut MatchState,
        action: PlayCardAction,
    ) -> Result<PlayOutcome, RuleError> {
        Self::ensure_in_progress(state)?;
        Self::ensure_turn_owner(state, action.player_id)?;

        let player_id = action.player_id;
        let player = state.player(player_id);
        let card = player
            .hand
            .get(action.hand_index)
            .ok_or(RuleError::InvalidCardIndex {
                index: action.hand_index,
            })?;
        if player.nectar < card.cost {
            return Err(RuleError::NotEnoughNectar {
                required: card.cost,
                available: player.nectar,
            });
        }
        match card.variant {
            CardVariant::Bloom => {
                player.open_field_slot().ok_or(RuleError::FieldFull)?;
                if !self.can_summon(player) {
                    return Err(RuleError::SummonLimitReached);
                }
            }
            CardVariant::Trap => {
                player.open_trap_slot().ok_or(RuleError::TrapZoneFull)?;
            }
            CardVariant::Buff => {
                player.open_buff_slot().ok_or(RuleError::BuffZoneFull)?;
            }
            CardVariant::Magic | CardVariant::Habitat => {}
        }
        if let Some(target) = action.target {
            Self::validate_target(state, target)?;
        }

        let player = state.player_mut(player_id);
        let card = player.hand.remove(action.hand_index);
        player.nectar -= card.cost;

        let mut events = Vec::new();
        if card.cost > 0 {
            events.push(GameEvent::NectarSpent {
                player_id,
                amount: card.cost,
            });
        }
        events.push(GameEvent::CardPlayed {
            player_id,
            card_id: card.id,
            variant: card.variant,
        });
        debug!("player {player_id} plays {} ({:?})", card.name, card.variant);

        let card_id = card.id;
        let variant = card.variant;
        let mut trap = None;
        match variant {
            CardVariant::Bloom => {
                trap = self.summon(state, player_id, card, action.target, &mut events);
            }
            CardVariant::Magic => self.cast_magic(state, player_id, card, action.target, &mut events),
            CardVariant::Trap => Self::set_trap(state, player_id, card, &mut events),
            CardVariant::Buff => self.activate_buff(state, player_id, card, &mut events),
            CardVariant::Habitat => {
                self.set_habitat(state, player_id, card, action.target, &mut events)
            }
        }

        state.record_events(&events);
        Ok(PlayOutcome {
            card_id,
            variant,
            events,
            trap,
        })
    }

    fn summon(
        &mut self,
        state: &mut MatchState,
        player_id: PlayerId,
        card: Card,
        target: Option<TargetRef>,
        events: &mut Vec<GameEvent>,
    ) -> Option<Card> {
        let Some(slot) = state.player(player_id).open_field_slot() else {
            warn!("field filled up before {} could be summoned", card.name);
            state.player_mut(player_id).graveyard.push(card);
            return None;
        };
        let instance_id = state.allocate_instance_id();
        let card_id = card.id;
        let player = state.player_mut(player_id);
        player.field[slot as usize] = Some(BeastInstance::new(instance_id, card, slot));
        player.summons_this_turn = player.summons_this_turn.saturating_add(1);
        events.push(GameEvent::BeastSummoned {
            player_id,
            slot,
            instance_id,
            card_id,
        });

        self.reapply_field_modifiers(state);
        let mut triggered =
            self.effects
                .fire_trigger(state, instance_id, EffectTrigger::OnSummon, target, None);
        events.append(&mut triggered);

        self.spring_trap(
            state,
            opponent_of(player_id),
            EffectTrigger::OnSummon,
            instance_id,
            events,
        )
    }

    fn cast_magic(
        &mut self,
        state: &mut MatchState,
        player_id: PlayerId,
        card: Card,
        target: Option<TargetRef>,
        events: &mut Vec<GameEvent>,
    ) {
        let ctx = EffectContext::for_card(
            EffectTrigger::OnSummon,
            EffectOrigin::Magic,
            player_id,
            &card,
        )
        .with_target(target);
        for ability in &card.abilities {
            match self.effects.resolve_ability(state, ability, &ctx) {
                Ok(mut resolved) => events.append(&mut resolved),
                Err(err) => debug!("{} fizzled: {err}", ability.name),
            }
        }
        state.player_mut(player_id).graveyard.push(card);
    }

    fn set_trap(state: &mut MatchState, player_id: PlayerId, card: Card, events: &mut Vec<GameEvent>) {
        let player = state.player_mut(player_id);
        match player.open_trap_slot() {
            Some(slot) => {
                player.traps[slot] = Some(card);
                events.push(GameEvent::TrapSet {
                    player_id,
                    slot: slot as u8,
                });
            }
            None => player.graveyard.push(card),
        }
    }

    fn activate_buff(
        &mut self,
        state: &mut MatchState,
        player_id: PlayerId,
        card: Card,
        events: &mut Vec<GameEvent>,
    ) {
        let player = state.player_mut(player_id);
        let Some(slot) = player.open_buff_slot() else {
            player.graveyard.push(card);
            return;
        };
        events.push(GameEvent::BuffActivated {
            player_id,
            card_id: card.id,
        });
        player.buffs[slot] = Some(ActiveBuff {
            turns_remaining: card.duration_turns,
            card,
        });
        self.reapply_field_modifiers(state);
    }

    fn set_habitat(
        &mut self,
        state: &mut MatchState,
        player_id: PlayerId,
        card: Card,
        target: Option<TargetRef>,
        events: &mut Vec<GameEvent>,
    ) {
        if let Some(old) = state.habitat.take() {
            debug!("habitat {} replaced by {}", old.card.name, card.name);
            state.player_mut(old.owner).graveyard.push(old.card);
        }
        events.push(GameEvent::HabitatChanged {
            player_id,
            card_id: card.id,
        });
        let ctx = EffectContext::for_card(
            EffectTrigger::OnSummon,
            EffectOrigin::Habitat,
            player_id,
            &card,
        )
        .with_target(target);
        let on_play: Vec<_> = card.abilities_for(EffectTrigger::OnSummon).cloned().collect();
        state.habitat = Some(Habitat::new(card, player_id));
        self.reapply_field_modifiers(state);

        for ability in &on_play {
            match self.effects.resolve_ability(state, ability, &ctx) {
                Ok(mut resolved) => events.append(&mut resolved),
                Err(err) => debug!("{} fizzled: {err}", ability.name),
            }
        }
    }

    /// Resolves and discards the first face-down trap of `owner` keyed to `trigger`.
    fn spring_trap(
        &mut self,
        state: &mut MatchState,
        owner: PlayerId,
        trigger: EffectTrigger,
        intruder: InstanceId,
        events: &mut Vec<GameEvent>,
    ) -> Option<Card> {
        let player = state.player_mut(owner);
        let index = player.traps.iter().position(|trap| {
            trap.as_ref()
                .map_or(false, |card| card.abilities_for(trigger).next().is_some())
        })?;
        let card = player.traps[index].take()?;
        events.push(GameEvent::TrapTriggered {
            player_id: owner,
            card_id: card.id,
        });
        debug!("trap {} sprung by instance {intruder}", card.name);

        let ctx = EffectContext::for_card(trigger, EffectOrigin::Trap, owner, &card)
            .with_target(state.locate(intruder).map(TargetRef::beast))
            .with_attacker(Some(intruder));
        for ability in card.abilities_for(trigger) {
            match self.effects.resolve_ability(state, ability, &ctx) {
                Ok(mut resolved) => events.append(&mut resolved),
                Err(err) => debug!("{} fizzled: {err}", ability.name),
            }
        }
        state.player_mut(owner).graveyard.push(card.clone());
        Some(card)
    }

    /// Clears every buff-zone and habitat modifier, then applies them again from scratch.
    /// Stats are recomputed once per beast at the end, so an unchanged net bonus leaves
    /// current health where it was.
    pub fn reapply_field_modifiers(&mut self, state: &mut MatchState) {
        for player in state.players.iter_mut() {
            for beast in player.field.iter_mut().flatten() {
                beast.strip_modifiers(ModifierSource::BuffZone);
                beast.strip_modifiers(ModifierSource::Habitat);
            }
        }
        self.push_buff_modifiers(state);
        Self::push_habitat_modifiers(state);

        for player in state.players.iter_mut() {
            for beast in player.field.iter_mut().flatten() {
                beast.recompute_stats();
            }
        }
    }

    fn push_buff_modifiers(&mut self, state: &mut MatchState) {
        let buffs: Vec<(PlayerId, Card)> = state
            .players
            .iter()
            .flat_map(|player| {
                player
                    .buffs
                    .iter()
                    .flatten()
                    .map(move |buff| (player.id, buff.card.clone()))
            })
            .collect();
        for (owner, card) in &buffs {
            let ctx = EffectContext::for_card(EffectTrigger::Passive, EffectOrigin::Buff, *owner, card);
            for effect in card
                .abilities_for(EffectTrigger::Passive)
                .flat_map(|ability| ability.effects.iter())
            {
                let EffectKind::ModifyStat { stat, value, .. } = effect.kind else {
                    debug!("buff {} has a non-stat passive {:?}", card.name, effect.kind);
                    continue;
                };
                let targets =
                    self.effects
                        .resolve_targets(state, effect.target, effect.condition.as_ref(), &ctx);
                for at in targets.iter().filter_map(TargetRef::as_beast) {
                    if let Some(beast) = state.beast_mut(at) {
                        beast.push_modifier(
                            StatModifier::new(
                                ModifierSource::BuffZone,
                                stat,
                                value,
                                ModifierDuration::Permanent,
                            )
                            .with_source_id(card.id),
                        );
                    }
                }
            }
        }
    }

    fn push_habitat_modifiers(state: &mut MatchState) {
        let Some(habitat) = state.habitat.as_ref().map(|habitat| habitat.card.clone()) else {
            return;
        };
        for effect in habitat
            .abilities_for(EffectTrigger::Passive)
            .flat_map(|ability| ability.effects.iter())
        {
            let EffectKind::ModifyStat { stat, value, .. } = effect.kind else {
                continue;
            };
            for player in state.players.iter_mut() {
                for beast in player.field.iter_mut().flatten() {
                    let passes = effect
                        .condition
                        .as_ref()
                        .map_or(true, |condition| condition.holds_for_beast(beast));
                    if passes && beast.is_alive() {
                        beast.push_modifier(
                            StatModifier::new(
                                ModifierSource::Habitat,
                                stat,
                                value,
                                ModifierDuration::Permanent,
                            )
                            .with_source_id(habitat.id),
                        );
                    }
                }
            }
        }
    }

    pub fn attack(
        &mut self,
        state: &mut MatchState,
        action: AttackAction,
        on_trap: &mut dyn FnMut(&Card),
    ) -> Result<AttackOutcome, RuleError> {
        match action.target_slot {
            Some(target_slot) => self.attack_beast(
                state,
                action.player_id,
                action.attacker_slot,
                target_slot,
                on_trap,
            ),
            None => self.attack_player(state, action.player_id, action.attacker_slot, on_trap),
        }
    }

    fn ready_attacker(
        state: &MatchState,
        player_id: PlayerId,
        attacker_slot: u8,
    ) -> Result<InstanceId, RuleError> {
        Self::ensure_in_progress(state)?;
        Self::ensure_turn_owner(state, player_id)?;
        let attacker = state
            .living_beast(BeastRef::new(player_id, attacker_slot))
            .ok_or(RuleError::InvalidSlot {
                slot: attacker_slot,
            })?;
        if attacker.summoning_sick {
            return Err(RuleError::SummoningSickness);
        }
        if attacker.has_status(StatusKind::CannotAttack) {
            return Err(RuleError::AttackPrevented);
        }
        Ok(attacker.instance_id)
    }

    /// On-attack trigger followed by the defending side's attack trap.
    fn attack_prelude(
        &mut self,
        state: &mut MatchState,
        attacker_id: InstanceId,
        target: TargetRef,
        on_trap: &mut dyn FnMut(&Card),
        events: &mut Vec<GameEvent>,
    ) -> Option<Card> {
        let mut triggered = self.effects.fire_trigger(
            state,
            attacker_id,
            EffectTrigger::OnAttack,
            Some(target),
            None,
        );
        events.append(&mut triggered);

        let trap = self.spring_trap(
            state,
            target.player(),
            EffectTrigger::OnAttack,
            attacker_id,
            events,
        );
        if let Some(card) = &trap {
            on_trap(card);
        }
        trap
    }

    fn living_position(state: &MatchState, instance_id: InstanceId) -> Option<BeastRef> {
        state
            .locate(instance_id)
            .filter(|at| state.living_beast(*at).is_some())
    }

    fn strike(
        state: &mut MatchState,
        from: BeastRef,
        to: BeastRef,
        events: &mut Vec<GameEvent>,
    ) -> i16 {
        let damage = state.beast(from).map_or(0, BeastInstance::strike_damage);
        let taken = state
            .beast_mut(to)
            .map_or(0, |beast| beast.take_damage(damage));
        if taken > 0 {
            events.push(GameEvent::BeastDamaged {
                player_id: to.player,
                slot: to.slot,
                amount: taken,
            });
        }
        taken
    }

    pub fn attack_beast(
        &mut self,
        state: &mut MatchState,
        player_id: PlayerId,
        attacker_slot: u8,
        target_slot: u8,
        on_trap: &mut dyn FnMut(&Card),
    ) -> Result<AttackOutcome, RuleError> {
        let attacker_id = Self::ready_attacker(state, player_id, attacker_slot)?;
        let enemy = opponent_of(player_id);
        let defender_id = state
            .living_beast(BeastRef::new(enemy, target_slot))
            .map(|beast| beast.instance_id)
            .ok_or(RuleError::InvalidTarget)?;

        let mut events = vec![GameEvent::AttackDeclared {
            player_id,
            attacker_slot,
            target_slot: Some(target_slot),
        }];
        let trap = self.attack_prelude(
            state,
            attacker_id,
            TargetRef::beast(BeastRef::new(enemy, target_slot)),
            on_trap,
            &mut events,
        );

        let mut damage = 0;
        if let (Some(attacker_at), Some(defender_at)) = (
            Self::living_position(state, attacker_id),
            Self::living_position(state, defender_id),
        ) {
            let (attacker_taken, defender_taken) =
                Self::exchange_blows(state, attacker_at, defender_at, &mut events);
            damage = defender_taken;

            if defender_taken > 0 {
                let mut triggered = self.effects.fire_trigger(
                    state,
                    defender_id,
                    EffectTrigger::OnDamage,
                    None,
                    Some(attacker_id),
                );
                events.append(&mut triggered);
            }
            if attacker_taken > 0 {
                let mut triggered = self.effects.fire_trigger(
                    state,
                    attacker_id,
                    EffectTrigger::OnDamage,
                    None,
                    Some(defender_id),
                );
                events.append(&mut triggered);
            }

            // Target is processed before the attacker when both fall.
            let mut destroyed = self
                .effects
                .destroy_if_dead(state, defender_id, Some(attacker_id));
            events.append(&mut destroyed);
            let mut destroyed = self
                .effects
                .destroy_if_dead(state, attacker_id, Some(defender_id));
            events.append(&mut destroyed);

            let attacker_alive = Self::living_position(state, attacker_id).is_some();
            let defender_alive = Self::living_position(state, defender_id).is_some();
            if attacker_alive && !defender_alive {
                self.award_combat_xp(state, attacker_id, &mut events);
            } else if defender_alive && !attacker_alive {
                self.award_combat_xp(state, defender_id, &mut events);
            }
        }

        if let Some(beast) = state.instance_mut(attacker_id) {
            beast.summoning_sick = true;
        }

        state.record_events(&events);
        Ok(AttackOutcome {
            damage,
            events,
            trap,
        })
    }

    /// Trades blows honoring strikes-first and cannot-be-countered. Returns damage taken
    /// by (attacker, defender).
    fn exchange_blows(
        state: &mut MatchState,
        attacker_at: BeastRef,
        defender_at: BeastRef,
        events: &mut Vec<GameEvent>,
    ) -> (i16, i16) {
        let (attacker_first, uncounterable) = state.beast(attacker_at).map_or((false, false), |b| {
            (
                b.has_attack_flag(AttackFlag::StrikesFirst),
                b.has_attack_flag(AttackFlag::CannotBeCountered),
            )
        });
        let defender_first = state
            .beast(defender_at)
            .map_or(false, |b| b.has_attack_flag(AttackFlag::StrikesFirst));
        let still_standing =
            |state: &MatchState, at: BeastRef| state.beast(at).map_or(false, |b| b.current_health > 0);

        if attacker_first && !defender_first {
            let dealt = Self::strike(state, attacker_at, defender_at, events);
            let countered = if !uncounterable && still_standing(state, defender_at) {
                Self::strike(state, defender_at, attacker_at, events)
            } else {
                0
            };
            (countered, dealt)
        } else if defender_first && !attacker_first && !uncounterable {
            let countered = Self::strike(state, defender_at, attacker_at, events);
            let dealt = if still_standing(state, attacker_at) {
                Self::strike(state, attacker_at, defender_at, events)
            } else {
                0
            };
            (countered, dealt)
        } else {
            // Simultaneous: both strike values are read before either lands.
            let attack = state.beast(attacker_at).map_or(0, BeastInstance::strike_damage);
            let counter = if uncounterable {
                0
            } else {
                state.beast(defender_at).map_or(0, BeastInstance::strike_damage)
            };
            let dealt = state
                .beast_mut(defender_at)
                .map_or(0, |beast| beast.take_damage(attack));
            let countered = state
                .beast_mut(attacker_at)
                .map_or(0, |beast| beast.take_damage(counter));
            if dealt > 0 {
                events.push(GameEvent::BeastDamaged {
                    player_id: defender_at.player,
                    slot: defender_at.slot,
                    amount: dealt,
                });
            }
            if countered > 0 {
                events.push(GameEvent::BeastDamaged {
                    player_id: attacker_at.player,
                    slot: attacker_at.slot,
                    amount: countered,
                });
            }
            (countered, dealt)
        }
    }

    pub fn attack_player(
        &mut self,
        state: &mut MatchState,
        player_id: PlayerId,
        attacker_slot: u8,
        on_trap: &mut dyn FnMut(&Card),
    ) -> Result<AttackOutcome, RuleError> {
        let attacker_id = Self::ready_attacker(state, player_id, attacker_slot)?;
        let enemy = opponent_of(player_id);
        if state.player(enemy).has_living_beasts() {
            return Err(RuleError::OpponentHasBeasts);
        }

        let mut events = vec![GameEvent::AttackDeclared {
            player_id,
            attacker_slot,
            target_slot: None,
        }];
        let trap = self.attack_prelude(
            state,
            attacker_id,
            TargetRef::Player { player: enemy },
            on_trap,
            &mut events,
        );

        let mut damage = 0;
        if let Some(at) = Self::living_position(state, attacker_id) {
            let strike = state.beast(at).map_or(0, BeastInstance::strike_damage);
            damage = state.player_mut(enemy).take_damage(strike);
            if damage > 0 {
                events.push(GameEvent::PlayerDamaged {
                    player_id: enemy,
                    amount: damage,
                });
            }
            if let Some(beast) = state.beast_mut(at) {
                beast.summoning_sick = true;
            }
        }

        state.record_events(&events);
        Ok(AttackOutcome {
            damage,
            events,
            trap,
        })
    }

    fn award_combat_xp(
        &mut self,
        state: &mut MatchState,
        instance_id: InstanceId,
        events: &mut Vec<GameEvent>,
    ) {
        let amount = self.leveling.combat_victory_xp;
        self.award_xp(state, instance_id, amount, events);
    }

    fn award_xp(
        &mut self,
        state: &mut MatchState,
        instance_id: InstanceId,
        amount: u32,
        events: &mut Vec<GameEvent>,
    ) {
        let Some(at) = state.locate(instance_id) else {
            return;
        };
        let Some(beast) = state.beast_mut(at) else {
            return;
        };
        if amount == 0 || beast.level >= MAX_LEVEL {
            return;
        }
        let levels = self.leveling.gain_xp(beast, amount);
        events.push(GameEvent::XpGained {
            player_id: at.player,
            slot: at.slot,
            amount,
        });
        events.extend(levels.into_iter().map(|level| GameEvent::LeveledUp {
            player_id: at.player,
            slot: at.slot,
            level,
        }));
    }

    pub fn use_ability(
        &mut self,
        state: &mut MatchState,
        action: UseAbilityAction,
    ) -> Result<Vec<GameEvent>, RuleError> {
        Self::ensure_in_progress(state)?;
        Self::ensure_turn_owner(state, action.player_id)?;
        if let Some(target) = action.target {
            Self::validate_target(state, target)?;
        }
        let beast = state
            .living_beast(BeastRef::new(action.player_id, action.slot))
            .ok_or(RuleError::InvalidSlot { slot: action.slot })?;
        if beast.summoning_sick {
            return Err(RuleError::SummoningSickness);
        }
        if beast.ability_used {
            return Err(RuleError::AbilityAlreadyUsed);
        }
        if beast.has_status(StatusKind::CannotUseAbilities) {
            return Err(RuleError::AbilitiesPrevented);
        }
        let ability = beast
            .triggered_abilities(EffectTrigger::Activated)
            .into_iter()
            .next()
            .ok_or(RuleError::NoActivatedAbility)?;
        let instance_id = beast.instance_id;
        let ctx = EffectContext::for_beast(EffectTrigger::Activated, action.player_id, beast)
            .with_target(action.target);

        let events = self.effects.resolve_ability(state, &ability, &ctx)?;
        if let Some(beast) = state.instance_mut(instance_id) {
            beast.ability_used = true;
        }
        state.record_events(&events);
        Ok(events)
    }

    /// Sacrifices nectar into XP for one beast.
    pub fn feed_nectar(
        &mut self,
        state: &mut MatchState,
        action: FeedNectarAction,
    ) -> Result<Vec<GameEvent>, RuleError> {
        Self::ensure_in_progress(state)?;
        Self::ensure_turn_owner(state, action.player_id)?;
        let at = BeastRef::new(action.player_id, action.slot);
        let beast = state
            .living_beast(at)
            .ok_or(RuleError::InvalidSlot { slot: action.slot })?;
        if beast.level >= MAX_LEVEL {
            return Err(RuleError::MaxLevel);
        }
        let instance_id = beast.instance_id;
        let available = state.player(action.player_id).nectar;
        if action.amount == 0 || available < action.amount {
            return Err(RuleError::NotEnoughNectar {
                required: action.amount.max(1),
                available,
            });
        }

        state.player_mut(action.player_id).nectar -= action.amount;
        let mut events = vec![GameEvent::NectarSpent {
            player_id: action.player_id,
            amount: action.amount,
        }];
        let xp = self.leveling.xp_for_nectar(action.amount);
        self.award_xp(state, instance_id, xp, &mut events);
        state.record_events(&events);
        Ok(events)
    }

    fn field_instances(state: &MatchState, player_id: PlayerId) -> Vec<InstanceId> {
        state
            .player(player_id)
            .living_beasts()
            .map(|beast| beast.instance_id)
            .collect()
    }

    /// Fires start-of-turn abilities of the player's beasts and of their habitat.
    pub fn start_of_turn(&mut self, state: &mut MatchState, player_id: PlayerId) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for instance_id in Self::field_instances(state, player_id) {
            let mut triggered = self.effects.fire_trigger(
                state,
                instance_id,
                EffectTrigger::StartOfTurn,
                None,
                None,
            );
            events.append(&mut triggered);
        }

        let habitat = state
            .habitat
            .as_ref()
            .filter(|habitat| habitat.owner == player_id)
            .map(|habitat| habitat.card.clone());
        if let Some(card) = habitat {
            let ctx = EffectContext::for_card(
                EffectTrigger::StartOfTurn,
                EffectOrigin::Habitat,
                player_id,
                &card,
            );
            for ability in card.abilities_for(EffectTrigger::StartOfTurn) {
                match self.effects.resolve_ability(state, ability, &ctx) {
                    Ok(mut resolved) => events.append(&mut resolved),
                    Err(err) => debug!("{} skipped: {err}", ability.name),
                }
            }
        }
        state.record_events(&events);
        events
    }

    /// Ages modifiers on both fields, fires end-of-turn abilities, then ages the player's buffs.
    pub fn end_of_turn(&mut self, state: &mut MatchState, player_id: PlayerId) -> Vec<GameEvent> {
        for player in state.players.iter_mut() {
            for beast in player.field.iter_mut().flatten() {
                beast.update_end_of_turn();
            }
        }

        let mut events = Vec::new();
        for instance_id in Self::field_instances(state, player_id) {
            let mut triggered =
                self.effects
                    .fire_trigger(state, instance_id, EffectTrigger::EndOfTurn, None, None);
            events.append(&mut triggered);
        }

        let mut expired = false;
        let player = state.player_mut(player_id);
        for slot in player.buffs.iter_mut() {
            let Some(buff) = slot else { continue };
            let Some(turns) = buff.turns_remaining.as_mut() else {
                continue;
            };
            *turns = turns.saturating_sub(1);
            if *turns == 0 {
                if let Some(buff) = slot.take() {
                    events.push(GameEvent::BuffExpired {
                        player_id,
                        card_id: buff.card.id,
                    });
                    player.graveyard.push(buff.card);
                    expired = true;
                }
            }
        }
        if expired {
            self.reapply_field_modifiers(state);
        }

        state.record_events(&events);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::effects::{
        Ability, AbilityCost, CardEffect, EffectCondition, Resource, TargetSelector,
    };
    use crate::game::fixtures::{blank_state, bloom, place};
    use crate::game::modifiers::Stat;
    use crate::game::state::{Affinity, Immunity};
    use crate::game::modifiers::Lasting;

    fn engine() -> RuleEngine {
        RuleEngine::with_seed(RulesConfig::default(), 11)
    }

    fn no_trap() -> impl FnMut(&Card) {
        |_card: &Card| {}
    }

    fn play(index: usize) -> PlayCardAction {
        PlayCardAction {
            player_id: 0,
            hand_index: index,
            target: None,
        }
    }

    fn fight(attacker_slot: u8, target_slot: Option<u8>) -> AttackAction {
        AttackAction {
            player_id: 0,
            attacker_slot,
            target_slot,
        }
    }

    fn last_gasp(amount: i16) -> Ability {
        Ability::new("Last Gasp", EffectTrigger::OnDestroy)
            .with_effect(CardEffect::damage(amount, TargetSelector::OpponentGardener))
    }

    #[test]
    fn full_field_rejects_bloom_without_mutation() {
        let mut rules = engine();
        let mut state = blank_state();
        for slot in 0..3 {
            place(&mut state, 0, slot, bloom(slot as u32 + 1, 1, 1));
        }
        state.players[0].hand.push(bloom(9, 2, 2));
        state.players[0].nectar = 5;
        let before = state.clone();

        let err = rules.play_card(&mut state, play(0)).expect_err("field is full");
        assert_eq!(err, RuleError::FieldFull);
        assert_eq!(err.to_string(), "Field is full");
        assert_eq!(state, before);
    }

    #[test]
    fn unaffordable_card_is_rejected() {
        let mut rules = engine();
        let mut state = blank_state();
        state.players[0].nectar = 1;
        state.players[0]
            .hand
            .push(Card::bloom(4, "Oakheart", Affinity::Forest, 3, 3, 4));
        let before = state.clone();

        let err = rules.play_card(&mut state, play(0)).expect_err("too expensive");
        assert_eq!(err.to_string(), "Not enough nectar");
        assert_eq!(state, before);
    }

    #[test]
    fn bad_hand_index_is_rejected() {
        let mut rules = engine();
        let mut state = blank_state();
        let err = rules.play_card(&mut state, play(3)).expect_err("empty hand");
        assert_eq!(err, RuleError::InvalidCardIndex { index: 3 });
    }

    #[test]
    fn bloom_enters_sick_and_pays_cost() {
        let mut rules = engine();
        let mut state = blank_state();
        state.players[0].nectar = 2;
        state.players[0].hand.push(bloom(5, 2, 2));

        let outcome = rules.play_card(&mut state, play(0)).expect("bloom fits");
        assert!(!outcome.is_trap());
        assert_eq!(state.players[0].nectar, 1);
        assert_eq!(state.players[0].summons_this_turn, 1);
        let beast = state.players[0].beast(0).expect("summoned");
        assert!(beast.summoning_sick);
        assert!(state.history.iter().any(|e| matches!(e, GameEvent::BeastSummoned { .. })));
    }

    #[test]
    fn summon_limit_honours_extra_summons() {
        let config = RulesConfig {
            summons_per_turn: Some(1),
            ..RulesConfig::default()
        };
        let mut rules = RuleEngine::with_seed(config, 3);
        let mut state = blank_state();
        state.players[0].nectar = 5;
        state.players[0].hand = vec![bloom(1, 1, 1), bloom(2, 1, 1), bloom(3, 1, 1)];

        rules.play_card(&mut state, play(0)).expect("first summon");
        assert_eq!(
            rules.play_card(&mut state, play(0)),
            Err(RuleError::SummonLimitReached)
        );
        state.players[0].extra_summons = 1;
        rules.play_card(&mut state, play(0)).expect("extra summon");
    }

    #[test]
    fn extra_summon_effect_raises_the_allowance() {
        let config = RulesConfig {
            summons_per_turn: Some(1),
            ..RulesConfig::default()
        };
        let mut rules = RuleEngine::with_seed(config, 3);
        let mut state = blank_state();
        state.players[0].nectar = 5;
        let second_wind = Card::new(22, "Second Wind", CardVariant::Magic, 1).with_ability(
            Ability::new("Wind", EffectTrigger::OnSummon).with_effect(CardEffect::new(
                EffectKind::GainResource {
                    resource: Resource::ExtraSummon { amount: 1 },
                },
                TargetSelector::PlayerGardener,
            )),
        );
        state.players[0].hand = vec![bloom(1, 1, 1), second_wind, bloom(2, 1, 1)];

        rules.play_card(&mut state, play(0)).expect("first summon");
        assert_eq!(
            rules.play_card(&mut state, play(1)),
            Err(RuleError::SummonLimitReached)
        );
        rules.play_card(&mut state, play(0)).expect("magic");
        assert_eq!(state.players[0].extra_summons, 1);
        rules.play_card(&mut state, play(0)).expect("extra summon");
        assert_eq!(state.players[0].summons_this_turn, 2);
    }

    #[test]
    fn mutual_destruction_runs_target_on_destroy_first() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 2, 2).with_ability(last_gasp(1)));
        place(&mut state, 1, 0, bloom(2, 2, 2).with_ability(last_gasp(2)));

        let outcome = rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("attack resolves");

        assert!(state.players[0].field[0].is_none());
        assert!(state.players[1].field[0].is_none());
        assert_eq!(state.players[0].graveyard.len(), 1);
        assert_eq!(state.players[1].graveyard.len(), 1);
        assert_eq!(state.players[0].health, 28, "defender's last gasp hit the attacker's gardener");
        assert_eq!(state.players[1].health, 29);

        let order: Vec<PlayerId> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                GameEvent::BeastDestroyed { player_id, .. } => Some(*player_id),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn sick_beasts_cannot_attack() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 2, 2));
        state.players[0].field[0]
            .as_mut()
            .expect("beast")
            .summoning_sick = true;
        let err = rules
            .attack(&mut state, fight(0, None), &mut no_trap())
            .expect_err("sick");
        assert_eq!(err.to_string(), "Beast has summoning sickness");
    }

    #[test]
    fn gardener_is_shielded_by_living_beasts() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 4, 2));
        place(&mut state, 1, 1, bloom(2, 1, 1));
        assert_eq!(
            rules.attack(&mut state, fight(0, None), &mut no_trap()),
            Err(RuleError::OpponentHasBeasts)
        );

        state.players[1].field[1] = None;
        let outcome = rules
            .attack(&mut state, fight(0, None), &mut no_trap())
            .expect("open field");
        assert_eq!(outcome.damage, 4);
        assert_eq!(state.players[1].health, 26);
        assert!(
            state.players[0].beast(0).expect("attacker").summoning_sick,
            "attacking marks the beast as having acted"
        );
    }

    #[test]
    fn strikes_first_kills_before_counter() {
        let mut rules = engine();
        let mut state = blank_state();
        let id = place(&mut state, 0, 0, bloom(1, 3, 2));
        place(&mut state, 1, 0, bloom(2, 5, 3));
        state
            .beast_mut(BeastRef::new(0, 0))
            .expect("attacker")
            .attack_flags
            .push(Lasting::new(AttackFlag::StrikesFirst, ModifierDuration::Permanent));

        rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("attack");
        assert!(state.players[1].field[0].is_none());
        let at = state.locate(id).expect("attacker survives");
        assert_eq!(state.beast(at).expect("attacker").current_health, 2);
    }

    #[test]
    fn uncounterable_attacker_takes_no_damage() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 2));
        place(&mut state, 1, 0, bloom(2, 5, 3));
        state
            .beast_mut(BeastRef::new(0, 0))
            .expect("attacker")
            .attack_flags
            .push(Lasting::new(AttackFlag::CannotBeCountered, ModifierDuration::Permanent));

        let outcome = rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("attack");
        assert_eq!(outcome.damage, 1);
        assert_eq!(state.players[0].beast(0).expect("attacker").current_health, 2);
        assert_eq!(state.players[1].beast(0).expect("defender").current_health, 2);
    }

    #[test]
    fn combat_damage_fires_on_damage_for_both_sides() {
        let mut rules = engine();
        let mut state = blank_state();
        let thorns = |amount| {
            Ability::new("Thorns", EffectTrigger::OnDamage)
                .with_effect(CardEffect::damage(amount, TargetSelector::OpponentGardener))
        };
        place(&mut state, 0, 0, bloom(1, 1, 5).with_ability(thorns(2)));
        place(&mut state, 1, 0, bloom(2, 1, 5).with_ability(thorns(1)));

        rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("attack");
        assert_eq!(state.players[1].health, 28, "attacker's thorns");
        assert_eq!(state.players[0].health, 29, "defender's thorns");
    }

    #[test]
    fn damage_multiplier_scales_every_strike() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 2, 5));
        place(&mut state, 1, 0, bloom(2, 1, 8));
        state
            .beast_mut(BeastRef::new(0, 0))
            .expect("attacker")
            .attack_flags
            .push(Lasting::new(
                AttackFlag::DamageMultiplier { factor: 3 },
                ModifierDuration::Permanent,
            ));

        let outcome = rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("beast attack");
        assert_eq!(outcome.damage, 6);
        assert_eq!(state.players[1].beast(0).expect("defender").current_health, 2);
        assert_eq!(state.players[0].beast(0).expect("attacker").current_health, 4);

        state.players[1].field[0] = None;
        state
            .beast_mut(BeastRef::new(0, 0))
            .expect("attacker")
            .summoning_sick = false;
        let outcome = rules
            .attack(&mut state, fight(0, None), &mut no_trap())
            .expect("gardener attack");
        assert_eq!(outcome.damage, 6);
        assert_eq!(state.players[1].health, 24);
    }

    #[test]
    fn prevented_beast_cannot_attack() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 3));
        place(&mut state, 1, 0, bloom(2, 3, 3));
        state.players[0].hand.push(
            Card::new(21, "Tangleroot", CardVariant::Magic, 0).with_ability(
                Ability::new("Bind", EffectTrigger::OnSummon).with_effect(CardEffect::new(
                    EffectKind::PreventAttack {
                        duration: ModifierDuration::Permanent,
                    },
                    TargetSelector::DirectTarget,
                )),
            ),
        );
        rules
            .play_card(
                &mut state,
                PlayCardAction {
                    target: Some(TargetRef::Beast { player: 1, slot: 0 }),
                    ..play(0)
                },
            )
            .expect("magic");

        state.active_player = 1;
        let strike_back = AttackAction {
            player_id: 1,
            attacker_slot: 0,
            target_slot: Some(0),
        };
        assert_eq!(
            rules.attack(&mut state, strike_back, &mut no_trap()),
            Err(RuleError::AttackPrevented)
        );
        assert_eq!(state.players[0].beast(0).expect("beast").current_health, 3);
    }

    #[test]
    fn damage_immunity_holds_in_combat() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 3, 3));
        place(&mut state, 1, 0, bloom(2, 1, 2));
        state
            .beast_mut(BeastRef::new(1, 0))
            .expect("defender")
            .immunities
            .push(Lasting::new(Immunity::Damage, ModifierDuration::Permanent));

        let outcome = rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("attack");
        assert_eq!(outcome.damage, 0);
        assert_eq!(state.players[1].beast(0).expect("defender").current_health, 2);
        assert_eq!(state.players[0].beast(0).expect("attacker").current_health, 2);
        assert_eq!(state.players[0].beast(0).expect("attacker").xp, 0);
    }

    #[test]
    fn attack_trap_fires_and_is_discarded() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 3, 3));
        place(&mut state, 1, 0, bloom(2, 1, 5));
        let snare = Card::new(40, "Bramble Snare", CardVariant::Trap, 1).with_ability(
            Ability::new("Snap", EffectTrigger::OnAttack)
                .with_effect(CardEffect::damage(3, TargetSelector::Attacker)),
        );
        state.players[1].traps[0] = Some(snare);

        let mut sprung = Vec::new();
        let outcome = rules
            .attack(&mut state, fight(0, Some(0)), &mut |card: &Card| sprung.push(card.id))
            .expect("attack");
        assert_eq!(sprung, vec![40]);
        assert_eq!(outcome.trap.map(|card| card.id), Some(40));
        assert!(state.players[1].traps[0].is_none());
        assert_eq!(state.players[1].graveyard.len(), 1);
        assert!(state.players[0].field[0].is_none(), "attacker died to the trap");
        assert_eq!(
            state.players[1].beast(0).expect("defender").current_health,
            5,
            "no blows were exchanged"
        );
    }

    #[test]
    fn summon_trap_hits_the_new_beast() {
        let mut rules = engine();
        let mut state = blank_state();
        state.players[0].nectar = 3;
        state.players[0].hand.push(bloom(1, 2, 4));
        let frost = Card::new(41, "Frost Lily", CardVariant::Trap, 1).with_ability(
            Ability::new("Chill", EffectTrigger::OnSummon)
                .with_effect(CardEffect::damage(1, TargetSelector::DirectTarget)),
        );
        state.players[1].traps[2] = Some(frost);

        let outcome = rules.play_card(&mut state, play(0)).expect("summon");
        assert_eq!(outcome.trap.map(|card| card.id), Some(41));
        assert_eq!(state.players[0].beast(0).expect("beast").current_health, 3);
    }

    #[test]
    fn combat_victory_grants_xp() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 3, 3));
        place(&mut state, 1, 0, bloom(2, 1, 1));
        let outcome = rules
            .attack(&mut state, fight(0, Some(0)), &mut no_trap())
            .expect("attack");
        assert_eq!(state.players[0].beast(0).expect("victor").xp, 1);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::XpGained { amount: 1, .. })));
    }

    #[test]
    fn activated_ability_pays_and_locks_for_the_turn() {
        let mut rules = engine();
        let mut state = blank_state();
        let sage = bloom(1, 1, 3).with_ability(
            Ability::new("Sap Burst", EffectTrigger::Activated)
                .with_cost(AbilityCost::Nectar { amount: 2 })
                .with_effect(CardEffect::damage(2, TargetSelector::OpponentGardener)),
        );
        place(&mut state, 0, 0, sage);
        state.players[0].nectar = 3;
        let action = UseAbilityAction {
            player_id: 0,
            slot: 0,
            target: None,
        };

        rules.use_ability(&mut state, action.clone()).expect("ability");
        assert_eq!(state.players[0].nectar, 1);
        assert_eq!(state.players[1].health, 28);
        assert_eq!(
            rules.use_ability(&mut state, action).map(|_| ()),
            Err(RuleError::AbilityAlreadyUsed)
        );
    }

    #[test]
    fn ability_without_nectar_changes_nothing() {
        let mut rules = engine();
        let mut state = blank_state();
        let sage = bloom(1, 1, 3).with_ability(
            Ability::new("Sap Burst", EffectTrigger::Activated)
                .with_cost(AbilityCost::Nectar { amount: 2 })
                .with_effect(CardEffect::damage(2, TargetSelector::OpponentGardener)),
        );
        place(&mut state, 0, 0, sage);
        let before = state.clone();
        let err = rules
            .use_ability(
                &mut state,
                UseAbilityAction {
                    player_id: 0,
                    slot: 0,
                    target: None,
                },
            )
            .expect_err("no nectar");
        assert_eq!(err.to_string(), "Not enough nectar");
        assert_eq!(state, before);
    }

    #[test]
    fn missing_ability_is_reported() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 3));
        let err = rules
            .use_ability(
                &mut state,
                UseAbilityAction {
                    player_id: 0,
                    slot: 0,
                    target: None,
                },
            )
            .expect_err("plain beast");
        assert_eq!(err.to_string(), "No activated ability");
    }

    #[test]
    fn buff_modifiers_cover_later_summons() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 1));
        state.players[0].nectar = 5;
        let banner = Card::new(30, "Sunlit Canopy", CardVariant::Buff, 1).with_ability(
            Ability::new("Canopy", EffectTrigger::Passive).with_effect(CardEffect::modify(
                Stat::Attack,
                1,
                ModifierDuration::Permanent,
                TargetSelector::AllAllies,
            )),
        );
        state.players[0].hand = vec![bloom(2, 2, 2), banner];

        rules.play_card(&mut state, play(1)).expect("buff");
        assert_eq!(state.players[0].beast(0).expect("beast").current_attack, 2);
        rules.play_card(&mut state, play(0)).expect("bloom");
        assert_eq!(state.players[0].beast(1).expect("new beast").current_attack, 3);
        assert_eq!(
            state.players[0].beast(0).expect("old beast").current_attack,
            2,
            "reapplying never stacks the same buff twice"
        );
    }

    #[test]
    fn reapplying_buffs_keeps_damage_taken() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 2));
        state.players[0].nectar = 5;
        let bark = Card::new(32, "Ironbark Ward", CardVariant::Buff, 1).with_ability(
            Ability::new("Ward", EffectTrigger::Passive).with_effect(CardEffect::modify(
                Stat::Health,
                5,
                ModifierDuration::Permanent,
                TargetSelector::AllAllies,
            )),
        );
        state.players[0].hand = vec![bloom(2, 1, 1), bloom(3, 1, 1), bark];

        rules.play_card(&mut state, play(2)).expect("buff");
        state
            .beast_mut(BeastRef::new(0, 0))
            .expect("beast")
            .take_damage(4);
        let wounded = state.players[0].beast(0).expect("beast");
        assert_eq!((wounded.current_health, wounded.max_health), (3, 7));

        rules.play_card(&mut state, play(0)).expect("first bloom");
        rules.play_card(&mut state, play(0)).expect("second bloom");
        let wounded = state.players[0].beast(0).expect("beast");
        assert_eq!(wounded.current_health, 3, "unrelated summons never heal");
        assert_eq!(wounded.max_health, 7);
        assert_eq!(state.players[0].beast(1).expect("new beast").current_health, 6);
    }

    #[test]
    fn buff_zone_capacity_is_enforced() {
        let mut rules = engine();
        let mut state = blank_state();
        state.players[0].nectar = 10;
        for id in 0..3 {
            state.players[0]
                .hand
                .push(Card::new(30 + id, "Dew Ward", CardVariant::Buff, 1));
        }
        rules.play_card(&mut state, play(0)).expect("first buff");
        rules.play_card(&mut state, play(0)).expect("second buff");
        let err = rules.play_card(&mut state, play(0)).expect_err("zone full");
        assert_eq!(err.to_string(), "Buff zone is full");
    }

    #[test]
    fn timed_buff_expires_and_strips_its_modifiers() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 1));
        state.players[0].nectar = 1;
        let rally = Card::new(31, "Rally Pollen", CardVariant::Buff, 1)
            .with_duration(1)
            .with_ability(Ability::new("Rally", EffectTrigger::Passive).with_effect(
                CardEffect::modify(Stat::Attack, 2, ModifierDuration::Permanent, TargetSelector::AllAllies),
            ));
        state.players[0].hand.push(rally);
        rules.play_card(&mut state, play(0)).expect("buff");
        assert_eq!(state.players[0].beast(0).expect("beast").current_attack, 3);

        let events = rules.end_of_turn(&mut state, 0);
        assert!(events.iter().any(|e| matches!(e, GameEvent::BuffExpired { card_id: 31, .. })));
        assert_eq!(state.players[0].buff_count(), 0);
        assert_eq!(state.players[0].beast(0).expect("beast").current_attack, 1);
    }

    #[test]
    fn magic_resolves_then_goes_to_graveyard() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 1, 0, bloom(2, 1, 3));
        place(&mut state, 1, 1, bloom(3, 1, 1));
        state.players[0].nectar = 2;
        state.players[0].hand.push(
            Card::new(20, "Ember Rain", CardVariant::Magic, 2).with_ability(
                Ability::new("Rain", EffectTrigger::OnSummon)
                    .with_effect(CardEffect::damage(1, TargetSelector::AllEnemies)),
            ),
        );
        rules.play_card(&mut state, play(0)).expect("magic");
        assert_eq!(state.players[0].graveyard.len(), 1);
        assert_eq!(state.players[1].beast(0).expect("survivor").current_health, 2);
        assert!(state.players[1].field[1].is_none());
    }

    #[test]
    fn magic_immunity_blocks_enemy_spells() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 1, 0, bloom(2, 1, 3));
        state
            .beast_mut(BeastRef::new(1, 0))
            .expect("enemy")
            .immunities
            .push(Lasting::new(Immunity::Magic, ModifierDuration::Permanent));
        state.players[0].hand.push(
            Card::new(20, "Ember Rain", CardVariant::Magic, 0).with_ability(
                Ability::new("Rain", EffectTrigger::OnSummon)
                    .with_effect(CardEffect::damage(1, TargetSelector::AllEnemies)),
            ),
        );
        rules.play_card(&mut state, play(0)).expect("magic");
        assert_eq!(state.players[1].beast(0).expect("enemy").current_health, 3);
    }

    #[test]
    fn habitat_replaces_and_applies_to_both_fields() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 1, 1));
        let mut enemy = bloom(2, 1, 1);
        enemy.affinity = Some(Affinity::Fire);
        place(&mut state, 1, 0, enemy);
        state.players[0].nectar = 4;
        let grove = |id| {
            Card::new(id, "Deep Grove", CardVariant::Habitat, 2).with_ability(
                Ability::new("Rooted", EffectTrigger::Passive).with_effect(
                    CardEffect::modify(Stat::Health, 2, ModifierDuration::Permanent, TargetSelector::AllAllies)
                        .with_condition(EffectCondition::AffinityIs {
                            affinity: Affinity::Forest,
                        }),
                ),
            )
        };
        state.players[0].hand = vec![grove(60), grove(61)];

        rules.play_card(&mut state, play(1)).expect("first habitat");
        assert_eq!(state.players[0].beast(0).expect("forest").max_health, 3);
        assert_eq!(state.players[1].beast(0).expect("fire").max_health, 1);

        rules.play_card(&mut state, play(0)).expect("second habitat");
        assert_eq!(state.habitat.as_ref().map(|h| h.card.id), Some(60));
        assert_eq!(state.players[0].graveyard.len(), 1);
        assert_eq!(state.players[0].beast(0).expect("forest").max_health, 3);
    }

    #[test]
    fn feeding_nectar_levels_the_beast() {
        let mut rules = engine();
        let mut state = blank_state();
        place(&mut state, 0, 0, bloom(1, 2, 2));
        state.players[0].nectar = 5;
        let events = rules
            .feed_nectar(
                &mut state,
                FeedNectarAction {
                    player_id: 0,
                    slot: 0,
                    amount: 5,
                },
            )
            .expect("feed");
        let beast = state.players[0].beast(0).expect("beast");
        assert_eq!(beast.level, 3);
        assert_eq!(state.players[0].nectar, 0);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, GameEvent::LeveledUp { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn turn_sweeps_fire_triggers_and_age_modifiers() {
        let mut rules = engine();
        let mut state = blank_state();
        let sprout = bloom(1, 1, 3)
            .with_ability(
                Ability::new("Sunrise", EffectTrigger::StartOfTurn).with_effect(CardEffect::modify(
                    Stat::Attack,
                    2,
                    ModifierDuration::EndOfTurn,
                    TargetSelector::SelfBeast,
                )),
            )
            .with_ability(
                Ability::new("Dusk", EffectTrigger::EndOfTurn)
                    .with_effect(CardEffect::heal(1, TargetSelector::PlayerGardener)),
            );
        place(&mut state, 0, 0, sprout);
        state.players[0].health = 20;

        rules.start_of_turn(&mut state, 0);
        assert_eq!(state.players[0].beast(0).expect("beast").current_attack, 3);
        rules.end_of_turn(&mut state, 0);
        assert_eq!(state.players[0].beast(0).expect("beast").current_attack, 1);
        assert_eq!(state.players[0].health, 21);
    }

    #[test]
    fn actions_out_of_turn_are_rejected() {
        let mut rules = engine();
        let mut state = blank_state();
        state.players[1].hand.push(bloom(1, 1, 1));
        let err = rules
            .play_card(
                &mut state,
                PlayCardAction {
                    player_id: 1,
                    hand_index: 0,
                    target: None,
                },
            )
            .expect_err("player 0 is active");
        assert_eq!(err, RuleError::NotPlayerTurn);
    }
}
