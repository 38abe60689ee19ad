//! AI 对手模块：出牌/攻击策略与节奏控制。

pub mod opponent;
pub mod pacing;

pub use opponent::{AiTurnReport, BattleCallbacks, NoopCallbacks, OpponentAi};
pub use pacing::{ImmediateScheduler, PacingConfig, Scheduler, TimeoutScheduler};
