use std::time::Duration;

use futures::future::{self, FutureExt, LocalBoxFuture};
use gloo_timers::future::TimeoutFuture;
use serde::{Deserialize, Serialize};

use crate::game::CardVariant;

/// "Resume after a duration" primitive used to space out AI steps.
pub trait Scheduler {
    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Browser timer backed by `setTimeout`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutScheduler;

impl Scheduler for TimeoutScheduler {
    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = duration.as_millis().min(u32::MAX as u128) as u32;
        TimeoutFuture::new(millis).boxed_local()
    }
}

/// Resolves at once; for native hosts and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn delay(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
        future::ready(()).boxed_local()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PacingConfig {
    pub bloom_play_ms: u32,
    /// Non-bloom plays wait longer so their effects can be shown.
    pub effect_play_ms: u32,
    pub attack_ms: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            bloom_play_ms: 600,
            effect_play_ms: 1200,
            attack_ms: 800,
        }
    }
}

impl PacingConfig {
    pub fn play_delay(&self, variant: CardVariant) -> Duration {
        let millis = match variant {
            CardVariant::Bloom => self.bloom_play_ms,
            _ => self.effect_play_ms,
        };
        Duration::from_millis(millis as u64)
    }

    pub fn attack_delay(&self) -> Duration {
        Duration::from_millis(self.attack_ms as u64)
    }
}
