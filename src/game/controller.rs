use std::collections::HashMap;

use log::{info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{
    rules::{
        AttackAction, AttackOutcome, FeedNectarAction, PlayCardAction, PlayOutcome, RuleEngine,
        RuleError, RulesConfig, UseAbilityAction,
    },
    state::{
        opponent_of, Card, CardId, GameEvent, GamePhase, MatchState, Player, PlayerId,
        DEFAULT_PLAYER_HEALTH, MAX_NECTAR,
    },
};

pub const STARTING_HAND: usize = 3;

/// Card-definition lookup by id.
pub trait CardCatalog {
    fn card(&self, id: CardId) -> Option<Card>;
}

impl CardCatalog for HashMap<CardId, Card> {
    fn card(&self, id: CardId) -> Option<Card> {
        self.get(&id).cloned()
    }
}

impl CardCatalog for [Card] {
    fn card(&self, id: CardId) -> Option<Card> {
        self.iter().find(|card| card.id == id).cloned()
    }
}

/// Decks, names and overrides for a new match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatchConfig {
    pub decks: [Vec<CardId>; 2],
    pub names: [String; 2],
    /// Per-seat starting health; `None` falls back to the default.
    pub health: [Option<i16>; 2],
    pub starting_hand: usize,
    pub seed: Option<u64>,
    pub rules: RulesConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            decks: [Vec::new(), Vec::new()],
            names: ["Gardener".to_string(), "Rival".to_string()],
            health: [None, None],
            starting_hand: STARTING_HAND,
            seed: None,
            rules: RulesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum VictoryReason {
    HealthDepleted { loser: PlayerId },
    DeckOut { loser: PlayerId },
    MutualDestruction,
    /// Both sides ran out of cards and beasts at once.
    MutualDeckOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BattleResult {
    /// `None` on a tie.
    pub winner: Option<PlayerId>,
    pub reason: VictoryReason,
    pub turns: u32,
    pub p1_health: i16,
    pub p2_health: i16,
}

fn build_player<C: CardCatalog + ?Sized>(
    catalog: &C,
    config: &MatchConfig,
    id: PlayerId,
    rng: &mut SmallRng,
) -> Player {
    let seat = id as usize;
    let mut deck: Vec<Card> = config.decks[seat]
        .iter()
        .filter_map(|&card_id| {
            let card = catalog.card(card_id);
            if card.is_none() {
                warn!("deck {seat} lists unknown card {card_id}, skipping");
            }
            card
        })
        .collect();
    deck.shuffle(rng);

    let health = config.health[seat].unwrap_or(DEFAULT_PLAYER_HEALTH).max(1);
    let mut player = Player::new(id, config.names[seat].clone(), health, deck);
    for _ in 0..config.starting_hand {
        if player.draw().is_none() {
            break;
        }
    }
    player
}

/// Builds both players, shuffles their decks and deals the opening hands.
pub fn start_match<C: CardCatalog + ?Sized>(
    catalog: &C,
    config: &MatchConfig,
    rng: &mut SmallRng,
) -> MatchState {
    let first = build_player(catalog, config, 0, rng);
    let second = build_player(catalog, config, 1, rng);
    info!(
        "match started: {} ({} cards) vs {} ({} cards)",
        first.name,
        first.deck.len() + first.hand.len(),
        second.name,
        second.deck.len() + second.hand.len()
    );
    MatchState::new([first, second])
}

/// Tie, then health, then deck-out. Running out together is a tie too.
pub fn check_battle_end(state: &MatchState) -> Option<BattleResult> {
    let [first, second] = &state.players;
    let (winner, reason) = match (first.health <= 0, second.health <= 0) {
        (true, true) => (None, VictoryReason::MutualDestruction),
        (true, false) => (Some(1), VictoryReason::HealthDepleted { loser: 0 }),
        (false, true) => (Some(0), VictoryReason::HealthDepleted { loser: 1 }),
        (false, false) => match (first.is_decked_out(), second.is_decked_out()) {
            (true, true) => (None, VictoryReason::MutualDeckOut),
            (true, false) => (Some(1), VictoryReason::DeckOut { loser: 0 }),
            (false, true) => (Some(0), VictoryReason::DeckOut { loser: 1 }),
            (false, false) => return None,
        },
    };
    Some(BattleResult {
        winner,
        reason,
        turns: state.turn,
        p1_health: first.health,
        p2_health: second.health,
    })
}

/// Owns the match state and turn bookkeeping; rule resolution goes through [`RuleEngine`].
pub struct BattleController {
    state: MatchState,
    rules: RuleEngine,
}

impl BattleController {
    pub fn new<C: CardCatalog + ?Sized>(catalog: &C, config: &MatchConfig) -> Self {
        let (mut rng, rules) = match config.seed {
            Some(seed) => (
                SmallRng::seed_from_u64(seed),
                RuleEngine::with_seed(config.rules, seed.wrapping_add(1)),
            ),
            None => (SmallRng::from_entropy(), RuleEngine::new(config.rules)),
        };
        let state = start_match(catalog, config, &mut rng);
        Self { state, rules }
    }

    pub fn from_state(state: MatchState, rules: RuleEngine) -> Self {
        Self { state, rules }
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MatchState {
        &mut self.state
    }

    pub fn parts_mut(&mut self) -> (&mut MatchState, &mut RuleEngine) {
        (&mut self.state, &mut self.rules)
    }

    pub fn active_player(&self) -> PlayerId {
        self.state.active_player
    }

    /// Draw one, refill nectar to the turn number, ready the field, then fire start-of-turn triggers.
    pub fn start_turn(&mut self) -> Vec<GameEvent> {
        let player_id = self.state.active_player;
        let turn = self.state.turn;
        let nectar_cap = self.rules.config().max_nectar.min(MAX_NECTAR);
        self.state.phase = GamePhase::Start;

        let mut events = vec![GameEvent::TurnStarted { player_id, turn }];
        let player = self.state.player_mut(player_id);
        if let Some(card_id) = player.draw() {
            events.push(GameEvent::CardDrawn { player_id, card_id });
        }
        let nectar = turn.min(nectar_cap as u32) as u8;
        player.nectar = nectar;
        events.push(GameEvent::NectarGained {
            player_id,
            amount: nectar,
        });
        player.ready_field();
        player.summons_this_turn = 0;
        player.extra_summons = 0;
        self.state.record_events(&events);
        info!("turn {turn}: player {player_id} starts with {nectar} nectar");

        events.extend(self.rules.start_of_turn(&mut self.state, player_id));
        self.state.phase = GamePhase::Main;
        events
    }

    /// End-of-turn sweep, then pass the turn. The counter advances after the second seat.
    pub fn end_turn(&mut self) -> Vec<GameEvent> {
        let player_id = self.state.active_player;
        self.state.phase = GamePhase::End;
        let mut events = self.rules.end_of_turn(&mut self.state, player_id);

        let ended = GameEvent::TurnEnded { player_id };
        self.state.record_events(std::slice::from_ref(&ended));
        events.push(ended);

        if player_id == 1 {
            self.state.turn += 1;
        }
        self.state.active_player = opponent_of(player_id);
        self.state.phase = GamePhase::Start;
        events
    }

    pub fn play_card(&mut self, action: PlayCardAction) -> Result<PlayOutcome, RuleError> {
        self.rules.play_card(&mut self.state, action)
    }

    pub fn attack(
        &mut self,
        action: AttackAction,
        on_trap: &mut dyn FnMut(&Card),
    ) -> Result<AttackOutcome, RuleError> {
        self.rules.attack(&mut self.state, action, on_trap)
    }

    pub fn use_ability(&mut self, action: UseAbilityAction) -> Result<Vec<GameEvent>, RuleError> {
        self.rules.use_ability(&mut self.state, action)
    }

    pub fn feed_nectar(&mut self, action: FeedNectarAction) -> Result<Vec<GameEvent>, RuleError> {
        self.rules.feed_nectar(&mut self.state, action)
    }

    pub fn check_battle_end(&self) -> Option<BattleResult> {
        check_battle_end(&self.state)
    }
}
