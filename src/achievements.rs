//! Achievement tracking bot
//!
//! Users define numeric goals ("run 10 km", "weigh 80 kg"). Every day an
//! `achievement` alarm asks for a progress report; the user can report or
//! postpone. Multi-step dialogs arm a `timeout` alarm that rolls the dialog
//! back to the main menu when the user walks away.
//!
//! Dialog position (`Dialog`) is scratch and is lost on restart. The one
//! piece of position that must survive, the achievement being reported on,
//! is kept in `AchievementData::reporting`.

mod dialog;

use crate::event::Input;
use crate::session::{AlarmRequest, Bot, SessionContext};
use crate::state_machine::{composite, Callback, Transition};
use chrono::{DateTime, Duration, Utc};
use dialog::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ACHIEVEMENT_ALARM: &str = "achievement";
pub const TIMEOUT_ALARM: &str = "timeout";

const START: &str = "start";
const TIMER: &str = "timer";
const LIST: &str = "list";
const DISPLAY: &str = "display";
const ADD: &str = "add";
const REPORT: &str = "report";

// ============================================================================
// Durable data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub name: String,
    pub description: String,
    /// Next progress check
    pub check_time: DateTime<Utc>,
    pub limit: i64,
    pub initial: i64,
    /// Whether progress means growing towards `limit`
    pub ascend: bool,
    pub done: bool,
}

impl Achievement {
    pub fn reached(&self, value: i64) -> bool {
        if self.ascend {
            value >= self.limit
        } else {
            value <= self.limit
        }
    }
}

/// Reach a limit once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitAchievement {
    #[serde(flatten)]
    pub base: Achievement,
    pub current: i64,
}

impl LimitAchievement {
    /// Integer percentage of the distance covered, clamped to 0..=100
    pub fn percent(&self) -> i64 {
        // Widened so any pair of i64 values fits
        let (limit, initial, current) = (
            i128::from(self.base.limit),
            i128::from(self.base.initial),
            i128::from(self.current),
        );
        let (required, achieved) = if self.base.ascend {
            (limit - initial, current - initial)
        } else {
            (initial - limit, initial - current)
        };
        if required <= 0 {
            return 100;
        }
        let percent = (achieved * 100 / required).clamp(0, 100);
        i64::try_from(percent).unwrap_or(100)
    }
}

/// Reach a limit and hold it for `strike` consecutive checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeAchievement {
    #[serde(flatten)]
    pub base: Achievement,
    pub best: u32,
    pub last: u32,
    pub strike: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementData {
    #[serde(default)]
    pub limits: BTreeMap<String, LimitAchievement>,
    #[serde(default)]
    pub strikes: BTreeMap<String, StrikeAchievement>,
    /// Achievement whose check is in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<String>,
}

impl AchievementData {
    /// All achievement names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .limits
            .keys()
            .chain(self.strikes.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn get(&self, name: &str) -> Option<&Achievement> {
        self.limits
            .get(name)
            .map(|l| &l.base)
            .or_else(|| self.strikes.get(name).map(|s| &s.base))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Achievement> {
        if let Some(limit) = self.limits.get_mut(name) {
            return Some(&mut limit.base);
        }
        self.strikes.get_mut(name).map(|s| &mut s.base)
    }

    fn unfinished(&self) -> impl Iterator<Item = &Achievement> {
        self.limits
            .values()
            .map(|l| &l.base)
            .chain(self.strikes.values().map(|s| &s.base))
            .filter(|a| !a.done)
    }
}

// ============================================================================
// Dialog scratch
// ============================================================================

/// Step of the "add achievement" dialog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddStage {
    #[default]
    Name,
    Description,
    Limit,
    Current,
    Confirm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub name: String,
    pub description: String,
    pub limit: i64,
    pub initial: i64,
}

/// Transient dialog position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dialog {
    /// Index of the first name on the current list page
    pub page: usize,
    /// Achievement being displayed
    pub current: String,
    pub stage: AddStage,
    pub draft: Option<Draft>,
}

// ============================================================================
// Bot
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Idle time before a dialog rolls back
    pub dialog_timeout: Duration,
    /// Delay applied by "Later..."
    pub postpone: Duration,
    /// Interval between progress checks
    pub check_period: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dialog_timeout: Duration::minutes(10),
            postpone: Duration::hours(3),
            check_period: Duration::days(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AchievementBot {
    settings: Settings,
}

pub type AchievementContext = SessionContext<AchievementBot>;

impl AchievementBot {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn with_dialog_timeout(dialog_timeout: std::time::Duration) -> Self {
        let mut settings = Settings::default();
        if let Ok(timeout) = Duration::from_std(dialog_timeout) {
            settings.dialog_timeout = timeout;
        }
        Self::new(settings)
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Arm the dialog timeout, then run `then`
    fn timed(&self, then: Callback<AchievementContext, Input>) -> Callback<AchievementContext, Input> {
        composite(vec![arm_timeout(self.settings), then])
    }
}

fn cb<F>(f: F) -> Callback<AchievementContext, Input>
where
    F: Fn(&mut AchievementContext, Input) -> Result<Input, crate::error::CallbackError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Catch-all for user input nothing else matched. Alarms are not caught.
fn dont_understand(state: &str) -> Transition<AchievementContext, Input> {
    Transition::new(state, state)
        .when(|_: &AchievementContext, _: &str, input: &Input| {
            input.text().is_some() || input.button().is_some()
        })
        .then(do_dont_understand)
}

/// Achievement checks arriving mid-dialog are pushed past the dialog
fn defer_check(state: &str, settings: Settings) -> Transition<AchievementContext, Input> {
    Transition::new(state, state)
        .when(is_alarm(ACHIEVEMENT_ALARM))
        .then(move |ctx: &mut AchievementContext, input: Input| defer(ctx, &input, settings))
}

impl Bot for AchievementBot {
    type Data = AchievementData;
    type Scratch = Dialog;

    fn initial_state(&self) -> &str {
        START
    }

    fn transitions(&self) -> Vec<Transition<AchievementContext, Input>> {
        let s = self.settings;
        let start = cb(do_start);
        let postpone_then_start =
            composite(vec![cb(move |ctx, input| postpone(ctx, input, s)), cb(do_start)]);

        vec![
            // from start
            Transition::new(START, START).when(is_text("/start")).then(do_start),
            Transition::new(START, START).when(is_rollback).then(consume),
            Transition::new(START, TIMER)
                .when(is_due_check)
                .then_shared(self.timed(cb(do_timer))),
            // checks of finished or deleted achievements
            Transition::new(START, START)
                .when(is_alarm(ACHIEVEMENT_ALARM))
                .then(consume),
            Transition::new(START, LIST)
                .when(is_button(LIST_BUTTON))
                .then_shared(self.timed(cb(do_list))),
            Transition::new(START, ADD)
                .when(is_button(ADD_BUTTON))
                .then_shared(self.timed(cb(do_start_add))),
            dont_understand(START),
            // from timer
            Transition::new(TIMER, START)
                .when(is_rollback)
                .then_shared(Arc::clone(&postpone_then_start)),
            Transition::new(TIMER, REPORT)
                .when(is_button(REPORT_BUTTON))
                .then_shared(self.timed(cb(do_report))),
            Transition::new(TIMER, START)
                .when(is_button(POSTPONE_BUTTON))
                .then_shared(Arc::clone(&postpone_then_start)),
            defer_check(TIMER, s),
            dont_understand(TIMER),
            // from list
            Transition::new(LIST, START)
                .when(is_rollback)
                .then_shared(Arc::clone(&start)),
            Transition::new(LIST, LIST)
                .when(is_button(FORWARD_BUTTON))
                .then_shared(self.timed(cb(do_list_forward))),
            Transition::new(LIST, LIST)
                .when(is_button(BACKWARD_BUTTON))
                .then_shared(self.timed(cb(do_list_backward))),
            Transition::new(LIST, START)
                .when(is_button(STOP_LIST_BUTTON))
                .then_shared(Arc::clone(&start)),
            Transition::new(LIST, DISPLAY)
                .when(is_display)
                .then_shared(self.timed(cb(do_display))),
            defer_check(LIST, s),
            dont_understand(LIST),
            // from display
            Transition::new(DISPLAY, START)
                .when(is_rollback)
                .then_shared(Arc::clone(&start)),
            Transition::new(DISPLAY, LIST)
                .when(is_button(LIST_BUTTON))
                .then_shared(self.timed(cb(do_list))),
            Transition::new(DISPLAY, START)
                .when(is_button(STOP_LIST_BUTTON))
                .then_shared(Arc::clone(&start)),
            defer_check(DISPLAY, s),
            dont_understand(DISPLAY),
            // from add
            Transition::new(ADD, START)
                .when(is_rollback)
                .then_shared(composite(vec![cb(drop_add), Arc::clone(&start)])),
            Transition::new(ADD, START)
                .when(is_button(OK_BUTTON))
                .then_shared(composite(vec![
                    cb(move |ctx, input| finish_add(ctx, input, s)),
                    cb(drop_add),
                    Arc::clone(&start),
                ])),
            Transition::new(ADD, ADD)
                .when(is_button(RETRY_BUTTON))
                .then_shared(self.timed(cb(do_start_add))),
            Transition::new(ADD, START)
                .when(is_button(ABORT_BUTTON))
                .then_shared(composite(vec![cb(drop_add), Arc::clone(&start)])),
            Transition::new(ADD, ADD)
                .when(is_valid_add_input)
                .then_shared(self.timed(cb(do_add))),
            defer_check(ADD, s),
            dont_understand(ADD),
            // from report
            Transition::new(REPORT, START)
                .when(is_rollback)
                .then_shared(Arc::clone(&postpone_then_start)),
            Transition::new(REPORT, START)
                .when(is_number)
                .then_shared(composite(vec![
                    cb(move |ctx, input| finish_report(ctx, input, s)),
                    Arc::clone(&start),
                ])),
            defer_check(REPORT, s),
            dont_understand(REPORT),
        ]
    }

    fn wake(&self, ctx: &AchievementContext) -> Vec<AlarmRequest> {
        ctx.data
            .unfinished()
            .map(|a| AlarmRequest::new(ACHIEVEMENT_ALARM, a.name.clone(), a.check_time))
            .collect()
    }
}
