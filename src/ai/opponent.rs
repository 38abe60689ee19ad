use log::{debug, info};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::pacing::{PacingConfig, Scheduler};
use crate::game::{
    opponent_of, AttackAction, BeastRef, Card, CardVariant, EffectTrigger, GameEvent, InstanceId,
    MatchState, PlayCardAction, PlayerId, RuleEngine, TargetRef, TargetSelector,
};
use crate::game::state::{BUFF_SLOTS, FIELD_SLOTS, TRAP_SLOTS};

/// UI/animation sink. Nothing it does feeds back into the rules.
pub trait BattleCallbacks {
    fn on_action(&mut self, _action: &str) {}
    fn on_trap(&mut self, _card: &Card) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl BattleCallbacks for NoopCallbacks {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiTurnReport {
    /// Plays and attacks that went through.
    pub actions: usize,
    /// Set when the stop predicate cut the turn short.
    pub aborted: bool,
    pub events: Vec<GameEvent>,
}

/// Greedy card-play then random-attack turn policy.
pub struct OpponentAi {
    pacing: PacingConfig,
    rng: SmallRng,
}

impl Default for OpponentAi {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}

impl OpponentAi {
    pub fn new(pacing: PacingConfig) -> Self {
        Self {
            pacing,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(pacing: PacingConfig, seed: u64) -> Self {
        Self {
            pacing,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// Hand indices to play, last to first, tracking nectar and zone room as it goes.
    pub fn plan_card_plays(&self, state: &MatchState, ai: PlayerId) -> Vec<usize> {
        let player = state.player(ai);
        let mut nectar = player.nectar;
        let mut field = player.field_count();
        let mut traps = player.trap_count();
        let mut buffs = player.buff_count();
        let mut habitat_active = state.habitat.is_some();

        let mut plan = Vec::new();
        for (index, card) in player.hand.iter().enumerate().rev() {
            if card.cost > nectar {
                continue;
            }
            let room = match card.variant {
                CardVariant::Bloom => field < FIELD_SLOTS,
                CardVariant::Trap => traps < TRAP_SLOTS,
                CardVariant::Buff => buffs < BUFF_SLOTS,
                CardVariant::Habitat => !habitat_active,
                CardVariant::Magic => true,
            };
            if !room {
                continue;
            }
            match card.variant {
                CardVariant::Bloom => field += 1,
                CardVariant::Trap => traps += 1,
                CardVariant::Buff => buffs += 1,
                CardVariant::Habitat => habitat_active = true,
                CardVariant::Magic => {}
            }
            nectar -= card.cost;
            plan.push(index);
        }
        plan
    }

    /// A random enemy beast for cards that need a direct target, else the enemy gardener.
    fn pick_target(&mut self, state: &MatchState, ai: PlayerId, card: &Card) -> Option<TargetRef> {
        let wants_target = card
            .abilities
            .iter()
            .filter(|ability| ability.trigger == EffectTrigger::OnSummon)
            .flat_map(|ability| ability.effects.iter())
            .any(|effect| effect.target == TargetSelector::DirectTarget);
        if !wants_target {
            return None;
        }
        let enemy = opponent_of(ai);
        let slots = state.player(enemy).living_slots();
        Some(match slots.choose(&mut self.rng) {
            Some(&slot) => TargetRef::beast(BeastRef::new(enemy, slot)),
            None => TargetRef::Player { player: enemy },
        })
    }

    fn ready_attackers(state: &MatchState, ai: PlayerId) -> Vec<InstanceId> {
        state
            .player(ai)
            .living_beasts()
            .filter(|beast| beast.can_attack())
            .map(|beast| beast.instance_id)
            .collect()
    }

    /// Plays and attacks for `ai`, awaiting a pacing delay after each step.
    /// `should_stop` is consulted before and after every delay.
    pub async fn execute_turn(
        &mut self,
        state: &mut MatchState,
        rules: &mut RuleEngine,
        ai: PlayerId,
        callbacks: &mut dyn BattleCallbacks,
        scheduler: &dyn Scheduler,
        should_stop: &dyn Fn() -> bool,
    ) -> AiTurnReport {
        let mut report = AiTurnReport::default();
        let human = opponent_of(ai);
        if should_stop() {
            report.aborted = true;
            return report;
        }

        for index in self.plan_card_plays(state, ai) {
            if should_stop() {
                report.aborted = true;
                return report;
            }
            let Some(card) = state.player(ai).hand.get(index).cloned() else {
                continue;
            };
            let target = self.pick_target(state, ai, &card);
            let action = PlayCardAction {
                player_id: ai,
                hand_index: index,
                target,
            };
            match rules.play_card(state, action) {
                Ok(outcome) => {
                    report.actions += 1;
                    for event in &outcome.events {
                        callbacks.on_action(event.action_name());
                    }
                    if let Some(trap) = &outcome.trap {
                        callbacks.on_trap(trap);
                    }
                    report.events.extend(outcome.events);
                }
                Err(err) => {
                    debug!("AI could not play {}: {err}", card.name);
                    continue;
                }
            }

            if should_stop() {
                report.aborted = true;
                return report;
            }
            scheduler.delay(self.pacing.play_delay(card.variant)).await;
            if should_stop() {
                report.aborted = true;
                return report;
            }
        }

        for attacker in Self::ready_attackers(state, ai) {
            if should_stop() {
                report.aborted = true;
                return report;
            }
            if state.player(human).health <= 0 {
                break;
            }
            let Some(at) = state
                .locate(attacker)
                .filter(|at| state.beast(*at).map_or(false, |beast| beast.can_attack()))
            else {
                continue;
            };
            let target_slot = state
                .player(human)
                .living_slots()
                .choose(&mut self.rng)
                .copied();
            let action = AttackAction {
                player_id: ai,
                attacker_slot: at.slot,
                target_slot,
            };

            let result = {
                let mut on_trap = |card: &Card| callbacks.on_trap(card);
                rules.attack(state, action, &mut on_trap)
            };
            match result {
                Ok(outcome) => {
                    report.actions += 1;
                    for event in &outcome.events {
                        callbacks.on_action(event.action_name());
                    }
                    report.events.extend(outcome.events);
                }
                Err(err) => {
                    debug!("AI attack from slot {} rejected: {err}", at.slot);
                    continue;
                }
            }

            if should_stop() {
                report.aborted = true;
                return report;
            }
            if state.player(human).health <= 0 {
                info!("AI defeated player {human}");
                break;
            }
            scheduler.delay(self.pacing.attack_delay()).await;
            if should_stop() {
                report.aborted = true;
                return report;
            }
        }
        report
    }
}
