use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::effects::{Ability, EffectTrigger};
use super::leveling::{LevelingConfig, DEFAULT_LEVELING};
use super::modifiers::{Lasting, Stat, StatModifier};

pub const FIELD_SLOTS: usize = 3;
pub const TRAP_SLOTS: usize = 3;
pub const BUFF_SLOTS: usize = 2;
pub const MAX_NECTAR: u8 = 10;
pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 9;
pub const DEFAULT_PLAYER_HEALTH: i16 = 30;

/// Catalog identifier of a card definition.
pub type CardId = u32;
/// Identifier of a beast while it is in play.
pub type InstanceId = u32;
/// Seat index, 0 or 1.
pub type PlayerId = u8;

pub fn opponent_of(player_id: PlayerId) -> PlayerId {
    if player_id == 0 {
        1
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Affinity {
    Forest,
    Water,
    Fire,
    Sky,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardVariant {
    Bloom,
    Magic,
    Trap,
    Buff,
    Habitat,
}

impl Default for CardVariant {
    fn default() -> Self {
        CardVariant::Bloom
    }
}

/// Typed, stackable marker placed on beasts or on the habitat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CounterKind {
    Growth,
    Spore,
    Pollen,
    Thorn,
    Frost,
    Burn,
}

/// Immutable catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    #[serde(default)]
    pub variant: CardVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    pub cost: u8,
    #[serde(default)]
    pub attack: i16,
    #[serde(default)]
    pub health: i16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abilities: Vec<Ability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leveling: Option<LevelingConfig>,
    /// Buff cards only: turns the buff stays active, `None` for the whole match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_turns: Option<u8>,
}

impl Card {
    pub fn new(id: CardId, name: impl Into<String>, variant: CardVariant, cost: u8) -> Self {
        Self {
            id,
            name: name.into(),
            variant,
            affinity: None,
            cost,
            attack: 0,
            health: 0,
            abilities: Vec::new(),
            leveling: None,
            duration_turns: None,
        }
    }

    pub fn bloom(
        id: CardId,
        name: impl Into<String>,
        affinity: Affinity,
        cost: u8,
        attack: i16,
        health: i16,
    ) -> Self {
        Self {
            affinity: Some(affinity),
            attack,
            health,
            ..Self::new(id, name, CardVariant::Bloom, cost)
        }
    }

    pub fn with_ability(mut self, ability: Ability) -> Self {
        self.abilities.push(ability);
        self
    }

    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn with_leveling(mut self, leveling: LevelingConfig) -> Self {
        self.leveling = Some(leveling);
        self
    }

    pub fn with_duration(mut self, turns: u8) -> Self {
        self.duration_turns = Some(turns);
        self
    }

    pub fn abilities_for(&self, trigger: EffectTrigger) -> impl Iterator<Item = &Ability> {
        self.abilities
            .iter()
            .filter(move |ability| ability.trigger == trigger)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusKind {
    CannotAttack,
    CannotUseAbilities,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Immunity {
    /// Ignores all damage, combat included.
    Damage,
    Destroy,
    Magic,
    Trap,
    Abilities,
}

/// Blocks single-target selection by the opposing side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetingRestriction {
    /// Only sources costing at least this much are blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cost: Option<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AttackFlag {
    StrikesFirst,
    CannotBeCountered,
    DamageMultiplier { factor: u8 },
}

/// A beast in play, created from a Bloom card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeastInstance {
    pub instance_id: InstanceId,
    pub card: Card,
    pub level: u8,
    #[serde(default)]
    pub xp: u32,
    pub base_attack: i16,
    pub base_health: i16,
    pub current_attack: i16,
    pub current_health: i16,
    pub max_health: i16,
    pub slot: u8,
    /// Also set once the beast has attacked this turn.
    pub summoning_sick: bool,
    #[serde(default)]
    pub ability_used: bool,
    #[serde(default)]
    pub temporary_health: i16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<CounterKind, u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<StatModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<Lasting<StatusKind>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub immunities: Vec<Lasting<Immunity>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targeting: Vec<Lasting<TargetingRestriction>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attack_flags: Vec<Lasting<AttackFlag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgraded_ability: Option<Ability>,
    #[serde(skip)]
    pub(crate) destroying: bool,
}

impl BeastInstance {
    pub fn new(instance_id: InstanceId, card: Card, slot: u8) -> Self {
        let attack = card.attack.max(0);
        let health = card.health.max(1);
        Self {
            instance_id,
            card,
            level: MIN_LEVEL,
            xp: 0,
            base_attack: attack,
            base_health: health,
            current_attack: attack,
            current_health: health,
            max_health: health,
            slot,
            summoning_sick: true,
            ability_used: false,
            temporary_health: 0,
            counters: BTreeMap::new(),
            modifiers: Vec::new(),
            statuses: Vec::new(),
            immunities: Vec::new(),
            targeting: Vec::new(),
            attack_flags: Vec::new(),
            upgraded_ability: None,
            destroying: false,
        }
    }

    pub fn card_id(&self) -> CardId {
        self.card.id
    }

    pub fn is_alive(&self) -> bool {
        self.current_health > 0 && !self.destroying
    }

    pub fn is_damaged(&self) -> bool {
        self.current_health < self.max_health
    }

    pub fn is_wilting(&self) -> bool {
        self.current_health == 1
    }

    pub fn leveling(&self) -> &LevelingConfig {
        self.card.leveling.as_ref().unwrap_or(&DEFAULT_LEVELING)
    }

    pub fn counter(&self, kind: CounterKind) -> u8 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }

    pub fn add_counter(&mut self, kind: CounterKind, count: u8) {
        let entry = self.counters.entry(kind).or_insert(0);
        *entry = entry.saturating_add(count);
    }

    /// Returns how many counters were actually removed.
    pub fn remove_counter(&mut self, kind: CounterKind, count: u8) -> u8 {
        let Some(current) = self.counters.get_mut(&kind) else {
            return 0;
        };
        let removed = count.min(*current);
        *current -= removed;
        if *current == 0 {
            self.counters.remove(&kind);
        }
        removed
    }

    pub fn has_status(&self, kind: StatusKind) -> bool {
        self.statuses.iter().any(|status| status.value == kind)
    }

    pub fn is_immune(&self, immunity: Immunity) -> bool {
        self.immunities.iter().any(|entry| entry.value == immunity)
    }

    pub fn is_untargetable_by(&self, source_cost: u8) -> bool {
        self.targeting.iter().any(|entry| match entry.value.min_cost {
            Some(min_cost) => source_cost >= min_cost,
            None => true,
        })
    }

    pub fn has_attack_flag(&self, flag: AttackFlag) -> bool {
        self.attack_flags.iter().any(|entry| entry.value == flag)
    }

    pub fn damage_multiplier(&self) -> i16 {
        self.attack_flags
            .iter()
            .filter_map(|entry| match entry.value {
                AttackFlag::DamageMultiplier { factor } => Some(factor as i16),
                _ => None,
            })
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Damage this beast deals when it strikes.
    pub fn strike_damage(&self) -> i16 {
        self.current_attack.max(0).saturating_mul(self.damage_multiplier())
    }

    pub fn can_attack(&self) -> bool {
        self.is_alive() && !self.summoning_sick && !self.has_status(StatusKind::CannotAttack)
    }

    /// Applies damage, draining temporary health first. Returns the amount taken.
    pub fn take_damage(&mut self, amount: i16) -> i16 {
        if amount <= 0 || self.is_immune(Immunity::Damage) {
            return 0;
        }
        let absorbed = amount.min(self.temporary_health.max(0));
        self.temporary_health -= absorbed;
        let remaining = amount - absorbed;
        self.current_health = (self.current_health - remaining).max(0);
        amount
    }

    pub fn heal(&mut self, amount: i16) -> i16 {
        if amount <= 0 {
            return 0;
        }
        let before = self.current_health;
        self.current_health = self
            .current_health
            .saturating_add(amount)
            .min(self.max_health);
        self.current_health - before
    }

    /// Card abilities with the level upgrade swapped in for the ability sharing its trigger.
    pub fn abilities(&self) -> Vec<&Ability> {
        let mut list: Vec<&Ability> = self.card.abilities.iter().collect();
        if let Some(upgrade) = &self.upgraded_ability {
            match list
                .iter()
                .position(|ability| ability.trigger == upgrade.trigger)
            {
                Some(pos) => list[pos] = upgrade,
                None => list.push(upgrade),
            }
        }
        list
    }

    pub fn triggered_abilities(&self, trigger: EffectTrigger) -> Vec<Ability> {
        self.abilities()
            .into_iter()
            .filter(|ability| ability.trigger == trigger)
            .cloned()
            .collect()
    }

    pub fn stat(&self, stat: Stat) -> i16 {
        match stat {
            Stat::Attack => self.current_attack,
            Stat::Health => self.current_health,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveBuff {
    pub card: Card,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns_remaining: Option<u8>,
}

/// The single shared habitat slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Habitat {
    pub card: Card,
    pub owner: PlayerId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<CounterKind, u8>,
}

impl Habitat {
    pub fn new(card: Card, owner: PlayerId) -> Self {
        Self {
            card,
            owner,
            counters: BTreeMap::new(),
        }
    }

    pub fn counter(&self, kind: CounterKind) -> u8 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }
}

/// One side of the match: hand, deck, field and the other zones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub name: String,
    pub health: i16,
    pub max_health: i16,
    /// Draw pile; the top card is the last element.
    #[serde(default)]
    pub deck: Vec<Card>,
    #[serde(default)]
    pub hand: Vec<Card>,
    #[serde(default)]
    pub field: [Option<BeastInstance>; FIELD_SLOTS],
    #[serde(default)]
    pub traps: [Option<Card>; TRAP_SLOTS],
    #[serde(default)]
    pub buffs: [Option<ActiveBuff>; BUFF_SLOTS],
    #[serde(default)]
    pub graveyard: Vec<Card>,
    #[serde(default)]
    pub nectar: u8,
    #[serde(default)]
    pub summons_this_turn: u8,
    #[serde(default)]
    pub extra_summons: u8,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, health: i16, deck: Vec<Card>) -> Self {
        Self {
            id,
            name: name.into(),
            health,
            max_health: health,
            deck,
            hand: Vec::new(),
            field: Default::default(),
            traps: Default::default(),
            buffs: Default::default(),
            graveyard: Vec::new(),
            nectar: 0,
            summons_this_turn: 0,
            extra_summons: 0,
        }
    }

    pub fn beast(&self, slot: u8) -> Option<&BeastInstance> {
        self.field.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn beast_mut(&mut self, slot: u8) -> Option<&mut BeastInstance> {
        self.field.get_mut(slot as usize).and_then(Option::as_mut)
    }

    pub fn living_beasts(&self) -> impl Iterator<Item = &BeastInstance> {
        self.field.iter().flatten().filter(|beast| beast.is_alive())
    }

    pub fn living_slots(&self) -> Vec<u8> {
        self.living_beasts().map(|beast| beast.slot).collect()
    }

    pub fn has_living_beasts(&self) -> bool {
        self.living_beasts().next().is_some()
    }

    pub fn field_count(&self) -> usize {
        self.field.iter().flatten().count()
    }

    pub fn open_field_slot(&self) -> Option<u8> {
        self.field
            .iter()
            .position(Option::is_none)
            .map(|slot| slot as u8)
    }

    pub fn trap_count(&self) -> usize {
        self.traps.iter().flatten().count()
    }

    pub fn open_trap_slot(&self) -> Option<usize> {
        self.traps.iter().position(Option::is_none)
    }

    pub fn buff_count(&self) -> usize {
        self.buffs.iter().flatten().count()
    }

    pub fn open_buff_slot(&self) -> Option<usize> {
        self.buffs.iter().position(Option::is_none)
    }

    pub fn draw(&mut self) -> Option<CardId> {
        let card = self.deck.pop()?;
        let card_id = card.id;
        self.hand.push(card);
        Some(card_id)
    }

    pub fn gain_nectar(&mut self, amount: u8) {
        self.nectar = self.nectar.saturating_add(amount).min(MAX_NECTAR);
    }

    pub fn take_damage(&mut self, amount: i16) -> i16 {
        if amount <= 0 {
            return 0;
        }
        self.health -= amount;
        amount
    }

    pub fn heal(&mut self, amount: i16) -> i16 {
        if amount <= 0 {
            return 0;
        }
        let before = self.health;
        self.health = self.health.saturating_add(amount).min(self.max_health);
        (self.health - before).max(0)
    }

    pub fn ready_field(&mut self) {
        for beast in self.field.iter_mut().flatten() {
            beast.summoning_sick = false;
            beast.ability_used = false;
        }
    }

    /// Out of cards everywhere: nothing to draw, nothing to play, nothing fighting.
    pub fn is_decked_out(&self) -> bool {
        self.deck.is_empty() && self.hand.is_empty() && !self.has_living_beasts()
    }
}

/// A field position on one side of the match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BeastRef {
    pub player: PlayerId,
    pub slot: u8,
}

impl BeastRef {
    pub fn new(player: PlayerId, slot: u8) -> Self {
        Self { player, slot }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type")]
pub enum TargetRef {
    Beast { player: PlayerId, slot: u8 },
    Player { player: PlayerId },
}

impl TargetRef {
    pub fn beast(beast: BeastRef) -> Self {
        TargetRef::Beast {
            player: beast.player,
            slot: beast.slot,
        }
    }

    pub fn as_beast(&self) -> Option<BeastRef> {
        match *self {
            TargetRef::Beast { player, slot } => Some(BeastRef::new(player, slot)),
            TargetRef::Player { .. } => None,
        }
    }

    pub fn player(&self) -> PlayerId {
        match *self {
            TargetRef::Beast { player, .. } | TargetRef::Player { player } => player,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GamePhase {
    Start,
    Main,
    End,
}

impl Default for GamePhase {
    fn default() -> Self {
        Self::Start
    }
}

/// Everything that happened, in order, for the UI and the history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameEvent {
    TurnStarted {
        player_id: PlayerId,
        turn: u32,
    },
    CardDrawn {
        player_id: PlayerId,
        card_id: CardId,
    },
    CardPlayed {
        player_id: PlayerId,
        card_id: CardId,
        variant: CardVariant,
    },
    BeastSummoned {
        player_id: PlayerId,
        slot: u8,
        instance_id: InstanceId,
        card_id: CardId,
    },
    TrapSet {
        player_id: PlayerId,
        slot: u8,
    },
    TrapTriggered {
        player_id: PlayerId,
        card_id: CardId,
    },
    BuffActivated {
        player_id: PlayerId,
        card_id: CardId,
    },
    BuffExpired {
        player_id: PlayerId,
        card_id: CardId,
    },
    HabitatChanged {
        player_id: PlayerId,
        card_id: CardId,
    },
    AbilityResolved {
        player_id: PlayerId,
        card_id: CardId,
        trigger: EffectTrigger,
    },
    AttackDeclared {
        player_id: PlayerId,
        attacker_slot: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_slot: Option<u8>,
    },
    BeastDamaged {
        player_id: PlayerId,
        slot: u8,
        amount: i16,
    },
    BeastHealed {
        player_id: PlayerId,
        slot: u8,
        amount: i16,
    },
    PlayerDamaged {
        player_id: PlayerId,
        amount: i16,
    },
    PlayerHealed {
        player_id: PlayerId,
        amount: i16,
    },
    BeastDestroyed {
        player_id: PlayerId,
        slot: u8,
        card_id: CardId,
    },
    StatModified {
        player_id: PlayerId,
        slot: u8,
        stat: Stat,
        value: i16,
    },
    CountersChanged {
        player_id: PlayerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        slot: Option<u8>,
        counter: CounterKind,
        delta: i16,
    },
    StatusApplied {
        player_id: PlayerId,
        slot: u8,
    },
    BeastMoved {
        player_id: PlayerId,
        from: u8,
        to: u8,
    },
    XpGained {
        player_id: PlayerId,
        slot: u8,
        amount: u32,
    },
    LeveledUp {
        player_id: PlayerId,
        slot: u8,
        level: u8,
    },
    NectarGained {
        player_id: PlayerId,
        amount: u8,
    },
    NectarSpent {
        player_id: PlayerId,
        amount: u8,
    },
    CardDiscarded {
        player_id: PlayerId,
        card_id: CardId,
    },
    CardSearched {
        player_id: PlayerId,
        card_id: CardId,
    },
    TurnEnded {
        player_id: PlayerId,
    },
}

impl GameEvent {
    /// Short action string handed to the UI/animation sink.
    pub fn action_name(&self) -> &'static str {
        match self {
            GameEvent::TurnStarted { .. } => "turn-start",
            GameEvent::CardDrawn { .. } => "draw",
            GameEvent::CardPlayed { .. } => "play",
            GameEvent::BeastSummoned { .. } => "summon",
            GameEvent::TrapSet { .. } => "trap-set",
            GameEvent::TrapTriggered { .. } => "trap",
            GameEvent::BuffActivated { .. } => "buff",
            GameEvent::BuffExpired { .. } => "buff-expired",
            GameEvent::HabitatChanged { .. } => "habitat",
            GameEvent::AbilityResolved { .. } => "ability",
            GameEvent::AttackDeclared { .. } => "attack",
            GameEvent::BeastDamaged { .. } | GameEvent::PlayerDamaged { .. } => "damage",
            GameEvent::BeastHealed { .. } | GameEvent::PlayerHealed { .. } => "heal",
            GameEvent::BeastDestroyed { .. } => "destroy",
            GameEvent::StatModified { .. } => "stat",
            GameEvent::CountersChanged { .. } => "counter",
            GameEvent::StatusApplied { .. } => "status",
            GameEvent::BeastMoved { .. } => "move",
            GameEvent::XpGained { .. } => "xp",
            GameEvent::LeveledUp { .. } => "level-up",
            GameEvent::NectarGained { .. } => "nectar",
            GameEvent::NectarSpent { .. } => "nectar-spent",
            GameEvent::CardDiscarded { .. } => "discard",
            GameEvent::CardSearched { .. } => "search",
            GameEvent::TurnEnded { .. } => "turn-end",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    InvalidPlayerIndex { player_id: PlayerId },
    NectarOutOfRange { player_id: PlayerId, value: u8 },
    LevelOutOfRange { instance_id: InstanceId, level: u8 },
    HealthOutOfRange { instance_id: InstanceId, current: i16, max: i16 },
    NegativeAttack { instance_id: InstanceId, value: i16 },
    SlotMismatch { instance_id: InstanceId, slot: u8 },
    DuplicateInstance { instance_id: InstanceId },
}

/// The whole match: both players, the shared habitat and turn bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchState {
    pub players: [Player; 2],
    pub active_player: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub habitat: Option<Habitat>,
    pub turn: u32,
    #[serde(default)]
    pub phase: GamePhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<GameEvent>,
    #[serde(default)]
    next_instance_id: InstanceId,
}

impl MatchState {
    pub fn new(players: [Player; 2]) -> Self {
        Self {
            players,
            active_player: 0,
            habitat: None,
            turn: 1,
            phase: GamePhase::default(),
            history: Vec::new(),
            next_instance_id: 1,
        }
    }

    pub fn player(&self, id: PlayerId) -> &Player {
        &self.players[(id & 1) as usize]
    }

    pub fn player_mut(&mut self, id: PlayerId) -> &mut Player {
        &mut self.players[(id & 1) as usize]
    }

    pub fn beast(&self, beast: BeastRef) -> Option<&BeastInstance> {
        self.player(beast.player).beast(beast.slot)
    }

    pub fn beast_mut(&mut self, beast: BeastRef) -> Option<&mut BeastInstance> {
        self.player_mut(beast.player).beast_mut(beast.slot)
    }

    pub fn living_beast(&self, beast: BeastRef) -> Option<&BeastInstance> {
        self.beast(beast).filter(|instance| instance.is_alive())
    }

    /// Current position of an instance; slots move under repositioning.
    pub fn locate(&self, instance_id: InstanceId) -> Option<BeastRef> {
        self.players.iter().find_map(|player| {
            player
                .field
                .iter()
                .flatten()
                .find(|beast| beast.instance_id == instance_id)
                .map(|beast| BeastRef::new(player.id, beast.slot))
        })
    }

    pub fn instance_mut(&mut self, instance_id: InstanceId) -> Option<&mut BeastInstance> {
        self.players
            .iter_mut()
            .flat_map(|player| player.field.iter_mut().flatten())
            .find(|beast| beast.instance_id == instance_id)
    }

    /// Never reuses an id already on a field, even after a state was loaded without a counter.
    pub fn allocate_instance_id(&mut self) -> InstanceId {
        let highest = self
            .players
            .iter()
            .flat_map(|player| player.field.iter().flatten())
            .map(|beast| beast.instance_id)
            .max()
            .unwrap_or(0);
        let id = self.next_instance_id.max(highest + 1);
        self.next_instance_id = id + 1;
        id
    }

    pub fn record_events(&mut self, events: &[GameEvent]) {
        self.history.extend_from_slice(events);
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        if self.active_player > 1 {
            return Err(IntegrityError::InvalidPlayerIndex {
                player_id: self.active_player,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for (index, player) in self.players.iter().enumerate() {
            if player.id as usize != index {
                return Err(IntegrityError::InvalidPlayerIndex {
                    player_id: player.id,
                });
            }
            if player.nectar > MAX_NECTAR {
                return Err(IntegrityError::NectarOutOfRange {
                    player_id: player.id,
                    value: player.nectar,
                });
            }
            for (slot, beast) in player.field.iter().enumerate() {
                let Some(beast) = beast else { continue };
                if !seen.insert(beast.instance_id) {
                    return Err(IntegrityError::DuplicateInstance {
                        instance_id: beast.instance_id,
                    });
                }
                if beast.slot as usize != slot {
                    return Err(IntegrityError::SlotMismatch {
                        instance_id: beast.instance_id,
                        slot: beast.slot,
                    });
                }
                if !(MIN_LEVEL..=MAX_LEVEL).contains(&beast.level) {
                    return Err(IntegrityError::LevelOutOfRange {
                        instance_id: beast.instance_id,
                        level: beast.level,
                    });
                }
                if beast.current_health < 0 || beast.current_health > beast.max_health {
                    return Err(IntegrityError::HealthOutOfRange {
                        instance_id: beast.instance_id,
                        current: beast.current_health,
                        max: beast.max_health,
                    });
                }
                if beast.current_attack < 0 {
                    return Err(IntegrityError::NegativeAttack {
                        instance_id: beast.instance_id,
                        value: beast.current_attack,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprout() -> Card {
        Card::bloom(1, "Sprout", Affinity::Forest, 1, 2, 3)
    }

    #[test]
    fn new_beast_enters_sick_at_level_one() {
        let beast = BeastInstance::new(7, sprout(), 2);
        assert_eq!(beast.level, MIN_LEVEL);
        assert!(beast.summoning_sick, "fresh beasts cannot attack");
        assert_eq!(beast.current_health, beast.max_health);
        assert!(!beast.can_attack());
    }

    #[test]
    fn temporary_health_absorbs_damage_first() {
        let mut beast = BeastInstance::new(1, sprout(), 0);
        beast.temporary_health = 2;
        let taken = beast.take_damage(3);
        assert_eq!(taken, 3);
        assert_eq!(beast.temporary_health, 0);
        assert_eq!(beast.current_health, 2);
    }

    #[test]
    fn damage_never_drops_health_below_zero() {
        let mut beast = BeastInstance::new(1, sprout(), 0);
        beast.take_damage(10);
        assert_eq!(beast.current_health, 0);
        assert!(!beast.is_alive());
    }

    #[test]
    fn counters_stack_and_drain() {
        let mut beast = BeastInstance::new(1, sprout(), 0);
        beast.add_counter(CounterKind::Spore, 2);
        beast.add_counter(CounterKind::Spore, 1);
        assert_eq!(beast.counter(CounterKind::Spore), 3);
        assert_eq!(beast.remove_counter(CounterKind::Spore, 5), 3);
        assert!(beast.counters.is_empty());
    }

    #[test]
    fn player_zones_report_capacity() {
        let mut player = Player::new(0, "Gardener", 20, Vec::new());
        assert_eq!(player.open_field_slot(), Some(0));
        for slot in 0..FIELD_SLOTS as u8 {
            player.field[slot as usize] = Some(BeastInstance::new(slot as u32 + 1, sprout(), slot));
        }
        assert_eq!(player.open_field_slot(), None);
        assert_eq!(player.field_count(), FIELD_SLOTS);
        assert_eq!(player.open_trap_slot(), Some(0));
        assert_eq!(player.open_buff_slot(), Some(0));
    }

    #[test]
    fn nectar_is_capped() {
        let mut player = Player::new(0, "Gardener", 20, Vec::new());
        player.gain_nectar(8);
        player.gain_nectar(8);
        assert_eq!(player.nectar, MAX_NECTAR);
    }

    #[test]
    fn integrity_check_flags_health_over_max() {
        let mut state = MatchState::new([
            Player::new(0, "A", 20, Vec::new()),
            Player::new(1, "B", 20, Vec::new()),
        ]);
        let mut beast = BeastInstance::new(1, sprout(), 0);
        beast.current_health = beast.max_health + 1;
        state.players[0].field[0] = Some(beast);
        assert!(matches!(
            state.integrity_check(),
            Err(IntegrityError::HealthOutOfRange { .. })
        ));
    }

    #[test]
    fn locate_follows_instance_ids() {
        let mut state = MatchState::new([
            Player::new(0, "A", 20, Vec::new()),
            Player::new(1, "B", 20, Vec::new()),
        ]);
        let id = state.allocate_instance_id();
        state.players[1].field[2] = Some(BeastInstance::new(id, sprout(), 2));
        assert_eq!(state.locate(id), Some(BeastRef::new(1, 2)));
        assert_eq!(state.locate(id + 100), None);
    }
}
