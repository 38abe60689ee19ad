//! Builders shared by the game unit tests.

use super::state::{
    Affinity, BeastInstance, Card, CardId, InstanceId, MatchState, Player, PlayerId,
    DEFAULT_PLAYER_HEALTH,
};

pub fn blank_state() -> MatchState {
    MatchState::new([
        Player::new(0, "Gardener", DEFAULT_PLAYER_HEALTH, Vec::new()),
        Player::new(1, "Rival", DEFAULT_PLAYER_HEALTH, Vec::new()),
    ])
}

/// A cost-1 Forest bloom.
pub fn bloom(id: CardId, attack: i16, health: i16) -> Card {
    Card::bloom(id, format!("Bloom {id}"), Affinity::Forest, 1, attack, health)
}

/// Puts a ready (not summoning-sick) beast straight onto the field.
pub fn place(state: &mut MatchState, player: PlayerId, slot: u8, card: Card) -> InstanceId {
    let id = state.allocate_instance_id();
    let mut beast = BeastInstance::new(id, card, slot);
    beast.summoning_sick = false;
    state.player_mut(player).field[slot as usize] = Some(beast);
    id
}
