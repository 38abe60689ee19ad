pub mod ai;
pub mod game;
pub mod utils;

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use log::info;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::{Function, Promise};

pub use ai::{
    AiTurnReport, BattleCallbacks, ImmediateScheduler, NoopCallbacks, OpponentAi, PacingConfig,
    Scheduler, TimeoutScheduler,
};
pub use game::{
    check_battle_end, start_match, Ability, AttackAction, AttackOutcome, BattleController,
    BattleResult, BeastInstance, Card, CardCatalog, CardEffect, CardId, CardVariant,
    EffectContext, EffectEngine, EffectKind, EffectTrigger, FeedNectarAction, GameEvent,
    GamePhase, IntegrityError, LevelingSystem, MatchConfig, MatchState, PlayCardAction,
    PlayOutcome, Player, PlayerId, RuleEngine, RuleError, RulesConfig, StatModifier,
    UseAbilityAction, VictoryReason,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    utils::set_panic_hook();
    utils::init_logging(log::Level::Debug);
}

fn to_js_error(error: RuleError) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

/// 返回给前端的操作结果。规则错误不会抛出，而是 `success: false`。
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_trap: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage: Option<i16>,
    /// 本次操作触发的对手陷阱。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_trap: Option<Card>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RuleError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<GameEvent>,
}

impl ActionResult {
    fn ok(events: Vec<GameEvent>) -> Self {
        Self {
            success: true,
            events,
            ..Self::default()
        }
    }

    fn failed(error: RuleError) -> Self {
        Self {
            success: false,
            message: Some(error.to_string()),
            error: Some(error),
            ..Self::default()
        }
    }
}

impl From<Result<PlayOutcome, RuleError>> for ActionResult {
    fn from(result: Result<PlayOutcome, RuleError>) -> Self {
        match result {
            Ok(outcome) => {
                let is_trap = outcome.is_trap();
                let message = if is_trap { "Trap set" } else { "Card played" };
                Self {
                    message: Some(message.to_string()),
                    is_trap: Some(is_trap),
                    triggered_trap: outcome.trap,
                    ..Self::ok(outcome.events)
                }
            }
            Err(error) => Self::failed(error),
        }
    }
}

impl From<Result<AttackOutcome, RuleError>> for ActionResult {
    fn from(result: Result<AttackOutcome, RuleError>) -> Self {
        match result {
            Ok(outcome) => Self {
                damage: Some(outcome.damage),
                triggered_trap: outcome.trap,
                ..Self::ok(outcome.events)
            },
            Err(error) => Self::failed(error),
        }
    }
}

impl From<Result<Vec<GameEvent>, RuleError>> for ActionResult {
    fn from(result: Result<Vec<GameEvent>, RuleError>) -> Self {
        match result {
            Ok(events) => Self::ok(events),
            Err(error) => Self::failed(error),
        }
    }
}

fn action_result_json(result: impl Into<ActionResult>) -> Result<String, JsValue> {
    serde_json::to_string(&result.into()).map_err(serde_to_js_error)
}

/// 将 AI 每一步转发给可选的 JS 回调。回调抛出的异常只记录警告，不会中断回合。
struct JsCallbacks {
    on_action: Option<Function>,
    on_trap: Option<Function>,
}

fn report_callback_error(name: &str, error: JsValue) {
    web_sys::console::warn_2(&JsValue::from_str(&format!("{name} callback failed")), &error);
}

impl BattleCallbacks for JsCallbacks {
    fn on_action(&mut self, action: &str) {
        if let Some(callback) = &self.on_action {
            if let Err(error) = callback.call1(&JsValue::NULL, &JsValue::from_str(action)) {
                report_callback_error("onAction", error);
            }
        }
    }

    fn on_trap(&mut self, card: &Card) {
        let Some(callback) = &self.on_trap else {
            return;
        };
        let card = match to_value(card) {
            Ok(value) => value,
            Err(error) => {
                report_callback_error("onTrap", serde_to_js_error(error));
                return;
            }
        };
        if let Err(error) = callback.call1(&JsValue::NULL, &card) {
            report_callback_error("onTrap", error);
        }
    }
}

#[wasm_bindgen]
pub struct BattleEngine {
    controller: Rc<RefCell<BattleController>>,
    ai_seed: Option<u64>,
}

impl BattleEngine {
    fn controller(&self) -> Result<RefMut<'_, BattleController>, JsValue> {
        self.controller
            .try_borrow_mut()
            .map_err(|_| JsValue::from_str("battle engine is busy"))
    }
}

#[wasm_bindgen]
impl BattleEngine {
    /// `catalog_json` 为卡牌定义数组，`config_json` 为 `MatchConfig`（可省略）。
    #[wasm_bindgen(constructor)]
    pub fn new(catalog_json: &str, config_json: Option<String>) -> Result<BattleEngine, JsValue> {
        let catalog: Vec<Card> = serde_json::from_str(catalog_json).map_err(serde_to_js_error)?;
        let config: MatchConfig = match config_json {
            Some(json) => serde_json::from_str(&json).map_err(serde_to_js_error)?,
            None => MatchConfig::default(),
        };
        let controller = BattleController::new(catalog.as_slice(), &config);
        Ok(BattleEngine {
            controller: Rc::new(RefCell::new(controller)),
            ai_seed: config.seed.map(|seed| seed.wrapping_add(2)),
        })
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.controller()?.state()).map_err(serde_to_js_error)
    }

    pub fn set_state_json(&mut self, json: &str) -> Result<(), JsValue> {
        let state: MatchState = serde_json::from_str(json).map_err(serde_to_js_error)?;
        RuleEngine::ensure_integrity(&state).map_err(to_js_error)?;
        *self.controller()?.state_mut() = state;
        Ok(())
    }

    pub fn active_player(&self) -> Result<u8, JsValue> {
        Ok(self.controller()?.active_player())
    }

    pub fn start_turn(&mut self) -> Result<String, JsValue> {
        let events = self.controller()?.start_turn();
        action_result_json(ActionResult::ok(events))
    }

    pub fn end_turn(&mut self) -> Result<String, JsValue> {
        let events = self.controller()?.end_turn();
        action_result_json(ActionResult::ok(events))
    }

    pub fn play_card_json(&mut self, action_json: &str) -> Result<String, JsValue> {
        let action: PlayCardAction =
            serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let result = self.controller()?.play_card(action);
        action_result_json(result)
    }

    /// `targetSlot` 为空时直接攻击对手。`on_trap` 在攻击触发陷阱时以卡牌对象调用。
    pub fn attack_json(
        &mut self,
        action_json: &str,
        on_trap: Option<Function>,
    ) -> Result<String, JsValue> {
        let action: AttackAction = serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let mut callbacks = JsCallbacks {
            on_action: None,
            on_trap,
        };
        let mut forward = |card: &Card| callbacks.on_trap(card);
        let result = self.controller()?.attack(action, &mut forward);
        action_result_json(result)
    }

    pub fn use_ability_json(&mut self, action_json: &str) -> Result<String, JsValue> {
        let action: UseAbilityAction =
            serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let result = self.controller()?.use_ability(action);
        action_result_json(result)
    }

    pub fn feed_nectar_json(&mut self, action_json: &str) -> Result<String, JsValue> {
        let action: FeedNectarAction =
            serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let result = self.controller()?.feed_nectar(action);
        action_result_json(result)
    }

    /// 对局未结束时返回 `null`。
    pub fn check_battle_end(&self) -> Result<JsValue, JsValue> {
        let result = self.controller()?.check_battle_end();
        to_value(&result).map_err(JsValue::from)
    }

    pub fn validate_state(&self) -> Result<(), JsValue> {
        RuleEngine::ensure_integrity(self.controller()?.state()).map_err(to_js_error)
    }

    /// 执行一次完整的 AI 回合，结束或被 `should_stop` 中止时兑现 Promise（`AiTurnReport` JSON）。
    /// 回合期间引擎处于占用状态，其他调用会返回 "battle engine is busy"。
    pub fn ai_execute_turn(
        &self,
        ai_player: u8,
        on_action: Option<Function>,
        on_trap: Option<Function>,
        should_stop: Option<Function>,
        pacing_json: Option<String>,
    ) -> Promise {
        let controller = Rc::clone(&self.controller);
        let ai_seed = self.ai_seed;

        future_to_promise(async move {
            if ai_player > 1 {
                return Err(JsValue::from_str("aiPlayer must be 0 or 1"));
            }
            let pacing: PacingConfig = match pacing_json {
                Some(json) => serde_json::from_str(&json).map_err(serde_to_js_error)?,
                None => PacingConfig::default(),
            };
            let mut guard = controller
                .try_borrow_mut()
                .map_err(|_| JsValue::from_str("battle engine is busy"))?;
            let turn = guard.state().turn;
            let mut ai = match ai_seed {
                Some(seed) => OpponentAi::with_seed(pacing, seed.wrapping_add(turn as u64)),
                None => OpponentAi::new(pacing),
            };
            let mut callbacks = JsCallbacks { on_action, on_trap };
            let stop = move || {
                should_stop.as_ref().map_or(false, |predicate| {
                    predicate
                        .call0(&JsValue::NULL)
                        .map(|value| value.is_truthy())
                        .unwrap_or(false)
                })
            };

            let (state, rules) = guard.parts_mut();
            let report = ai
                .execute_turn(
                    state,
                    rules,
                    ai_player,
                    &mut callbacks,
                    &TimeoutScheduler,
                    &stop,
                )
                .await;
            info!(
                "AI turn finished: {} actions{}",
                report.actions,
                if report.aborted { " (aborted)" } else { "" }
            );
            let json = serde_json::to_string(&report).map_err(serde_to_js_error)?;
            Ok(JsValue::from_str(&json))
        })
    }
}

/// 根据卡牌目录与配置创建新对局，返回 `MatchState`。
#[wasm_bindgen(js_name = "startMatch")]
pub fn start_match_js(catalog: JsValue, config: JsValue) -> Result<JsValue, JsValue> {
    let catalog: Vec<Card> = from_value(catalog).map_err(JsValue::from)?;
    let config: MatchConfig = if config.is_undefined() || config.is_null() {
        MatchConfig::default()
    } else {
        from_value(config).map_err(JsValue::from)?
    };
    let controller = BattleController::new(catalog.as_slice(), &config);
    to_value(controller.state()).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "checkBattleEnd")]
pub fn check_battle_end_js(state: JsValue) -> Result<JsValue, JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    to_value(&check_battle_end(&state)).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    let state: MatchState = from_value(state).map_err(JsValue::from)?;
    RuleEngine::ensure_integrity(&state).map_err(to_js_error)
}
