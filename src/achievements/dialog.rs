//! Predicates and callbacks of the achievement dialog

use super::{
    Achievement, AchievementContext, AchievementData, AddStage, Dialog, Draft, LimitAchievement,
    Settings, ACHIEVEMENT_ALARM, TIMEOUT_ALARM,
};
use crate::error::CallbackError;
use crate::event::{Button, Content, Input};
use crate::state_machine::Callback;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub(super) const LIST_BUTTON: &str = "list";
pub(super) const ADD_BUTTON: &str = "add";
pub(super) const REPORT_BUTTON: &str = "report";
pub(super) const POSTPONE_BUTTON: &str = "postpone";
pub(super) const STOP_LIST_BUTTON: &str = "stop_list";
pub(super) const FORWARD_BUTTON: &str = "forward_list";
pub(super) const BACKWARD_BUTTON: &str = "backward_list";
pub(super) const DISPLAY_PREFIX: &str = "display_";
pub(super) const OK_BUTTON: &str = "ok";
pub(super) const RETRY_BUTTON: &str = "retry";
pub(super) const ABORT_BUTTON: &str = "abort";

/// Name of the single per-user dialog timeout alarm
pub(super) const TIMEOUT_NAME: &str = "dialog";

const LIST_PAGE: usize = 5;

type Outcome = Result<Input, CallbackError>;

// ============================================================================
// Predicates
// ============================================================================

pub(super) fn is_text(
    expected: &'static str,
) -> impl Fn(&AchievementContext, &str, &Input) -> bool + Send + Sync + 'static {
    move |_, _, input| input.text() == Some(expected)
}

pub(super) fn is_button(
    expected: &'static str,
) -> impl Fn(&AchievementContext, &str, &Input) -> bool + Send + Sync + 'static {
    move |_, _, input| input.button() == Some(expected)
}

pub(super) fn is_alarm(
    kind: &'static str,
) -> impl Fn(&AchievementContext, &str, &Input) -> bool + Send + Sync + 'static {
    move |_, _, input| input.alarm().is_some_and(|(k, _)| k == kind)
}

/// An achievement check for something still in progress
pub(super) fn is_due_check(ctx: &AchievementContext, _state: &str, input: &Input) -> bool {
    match input.alarm() {
        Some((kind, name)) if kind == ACHIEVEMENT_ALARM => {
            ctx.data.get(name).is_some_and(|a| !a.done)
        }
        _ => false,
    }
}

/// `/start` or an expired dialog
pub(super) fn is_rollback(_ctx: &AchievementContext, _state: &str, input: &Input) -> bool {
    input.text() == Some("/start") || input.alarm().is_some_and(|(kind, _)| kind == TIMEOUT_ALARM)
}

pub(super) fn is_display(ctx: &AchievementContext, _state: &str, input: &Input) -> bool {
    parse_display(input)
        .and_then(|index| ctx.scratch.page.checked_add(index))
        .is_some_and(|position| position < ctx.data.names().len())
}

pub(super) fn is_number(_ctx: &AchievementContext, _state: &str, input: &Input) -> bool {
    input.text().is_some_and(|t| t.trim().parse::<i64>().is_ok())
}

/// Text acceptable at the current step of the add dialog
pub(super) fn is_valid_add_input(ctx: &AchievementContext, state: &str, input: &Input) -> bool {
    let Some(text) = input.text() else {
        return false;
    };
    match ctx.scratch.stage {
        AddStage::Name | AddStage::Description => !text.trim().is_empty(),
        AddStage::Limit | AddStage::Current => is_number(ctx, state, input),
        AddStage::Confirm => false,
    }
}

fn parse_display(input: &Input) -> Option<usize> {
    input.button()?.strip_prefix(DISPLAY_PREFIX)?.parse().ok()
}

fn parse_number(text: &str) -> Result<i64, CallbackError> {
    text.trim()
        .parse()
        .map_err(|_| CallbackError::bad_input(format!("not a number: {text}")))
}

// ============================================================================
// Callbacks
// ============================================================================

/// Arm (or push back) the dialog timeout; passes its input through
pub(super) fn arm_timeout(settings: Settings) -> Callback<AchievementContext, Input> {
    Arc::new(move |ctx: &mut AchievementContext, input: Input| {
        let at = ctx.now + settings.dialog_timeout;
        ctx.set_alarm(TIMEOUT_ALARM, TIMEOUT_NAME, at);
        Ok(input)
    })
}

pub(super) fn consume(_ctx: &mut AchievementContext, _input: Input) -> Outcome {
    Ok(Input::Empty)
}

pub(super) fn do_dont_understand(ctx: &mut AchievementContext, _input: Input) -> Outcome {
    ctx.send("Can't understand you");
    ctx.detach();
    Ok(Input::Empty)
}

pub(super) fn do_start(ctx: &mut AchievementContext, _input: Input) -> Outcome {
    ctx.scratch = Dialog::default();
    let text = format!("Hello, {}, what are we doing?", ctx.user.first_name);
    ctx.ask(Content::with_row(
        text,
        vec![
            Button::new("Display achievements", LIST_BUTTON),
            Button::new("Add achievement", ADD_BUTTON),
        ],
    ));
    Ok(Input::Empty)
}

pub(super) fn do_timer(ctx: &mut AchievementContext, input: Input) -> Outcome {
    let (_, name) = input
        .alarm()
        .ok_or_else(|| CallbackError::bad_input("expected an achievement alarm"))?;
    let text = format!("Time has come to report progress of {name}");
    ctx.data.reporting = Some(name.to_string());
    ctx.ask(Content::with_row(
        text,
        vec![
            Button::new("Let's go", REPORT_BUTTON),
            Button::new("Later...", POSTPONE_BUTTON),
        ],
    ));
    Ok(Input::Empty)
}

pub(super) fn do_list(ctx: &mut AchievementContext, _input: Input) -> Outcome {
    let names = ctx.data.names();
    if names.is_empty() {
        ctx.ask(Content::with_row(
            "Nothing to display",
            vec![Button::new("Back", STOP_LIST_BUTTON)],
        ));
        return Ok(Input::Empty);
    }

    let page = if ctx.scratch.page < names.len() {
        ctx.scratch.page
    } else {
        0
    };
    let mut rows: Vec<Vec<Button>> = names
        .iter()
        .skip(page)
        .take(LIST_PAGE)
        .enumerate()
        .map(|(i, name)| vec![Button::new(*name, format!("{DISPLAY_PREFIX}{i}"))])
        .collect();

    let mut controls = Vec::new();
    if page > 0 {
        controls.push(Button::new("<", BACKWARD_BUTTON));
    }
    controls.push(Button::new("Back", STOP_LIST_BUTTON));
    if page + LIST_PAGE < names.len() {
        controls.push(Button::new(">", FORWARD_BUTTON));
    }
    rows.push(controls);

    ctx.scratch.page = page;
    ctx.ask(Content {
        text: "What to display".to_string(),
        buttons: rows,
    });
    Ok(Input::Empty)
}

pub(super) fn do_list_forward(ctx: &mut AchievementContext, input: Input) -> Outcome {
    if ctx.scratch.page + LIST_PAGE < ctx.data.names().len() {
        ctx.scratch.page += LIST_PAGE;
    }
    do_list(ctx, input)
}

pub(super) fn do_list_backward(ctx: &mut AchievementContext, input: Input) -> Outcome {
    ctx.scratch.page = ctx.scratch.page.saturating_sub(LIST_PAGE);
    do_list(ctx, input)
}

pub(super) fn do_display(ctx: &mut AchievementContext, input: Input) -> Outcome {
    let index = parse_display(&input)
        .ok_or_else(|| CallbackError::bad_input("expected a display button"))?;
    let name = ctx
        .scratch
        .page
        .checked_add(index)
        .and_then(|position| ctx.data.names().get(position).map(ToString::to_string))
        .ok_or_else(|| CallbackError::bad_input(format!("no achievement at position {index}")))?;
    let text = describe(&ctx.data, &name)?;

    ctx.scratch.current = name;
    ctx.ask(Content::with_row(
        text,
        vec![
            Button::new("Back to list", LIST_BUTTON),
            Button::new("Back to menu", STOP_LIST_BUTTON),
        ],
    ));
    Ok(Input::Empty)
}

fn describe(data: &AchievementData, name: &str) -> Result<String, CallbackError> {
    if let Some(limit) = data.limits.get(name) {
        let base = &limit.base;
        if base.done {
            return Ok(format!("{name}.\nAchievement DONE!\n{}", base.description));
        }
        return Ok(format!(
            "{name}.\nAchievement progress: {}% ({}/{})\n{}",
            limit.percent(),
            limit.current,
            base.limit,
            base.description
        ));
    }
    if let Some(strike) = data.strikes.get(name) {
        let base = &strike.base;
        if base.done {
            return Ok(format!("{name}.\nAchievement DONE!\n{}", base.description));
        }
        let percent = if strike.strike == 0 {
            100
        } else {
            (u64::from(strike.last) * 100 / u64::from(strike.strike)).min(100)
        };
        return Ok(format!(
            "{name}.\nAchievement progress: {percent}% ({}/{}, best {})\n{}",
            strike.last, strike.strike, strike.best, base.description
        ));
    }
    Err(CallbackError::bad_input(format!("unknown achievement: {name}")))
}

/// Push the pending check back by the postpone delay
pub(super) fn postpone(ctx: &mut AchievementContext, input: Input, settings: Settings) -> Outcome {
    let Some(name) = ctx.data.reporting.take() else {
        tracing::warn!(user = %ctx.user.id, "Nothing to postpone");
        return Ok(input);
    };
    let at = ctx.now + settings.postpone;
    match ctx.data.get_mut(&name) {
        Some(achievement) => achievement.check_time = at,
        None => {
            tracing::warn!(user = %ctx.user.id, name = %name, "Postponing unknown achievement");
            return Ok(input);
        }
    }
    ctx.set_alarm(ACHIEVEMENT_ALARM, &name, at);
    Ok(input)
}

/// Push a check that fired mid-dialog past the dialog timeout
pub(super) fn defer(ctx: &mut AchievementContext, input: &Input, settings: Settings) -> Outcome {
    if let Some((_, name)) = input.alarm() {
        if ctx.data.get(name).is_some_and(|a| !a.done) {
            let at = ctx.now + settings.dialog_timeout;
            ctx.set_alarm(ACHIEVEMENT_ALARM, name, at);
        }
    }
    Ok(Input::Empty)
}

pub(super) fn do_start_add(ctx: &mut AchievementContext, _input: Input) -> Outcome {
    ctx.send("Okay, now enter the achievement name");
    ctx.scratch.stage = AddStage::Name;
    ctx.scratch.draft = Some(Draft::default());
    Ok(Input::Empty)
}

pub(super) fn do_add(ctx: &mut AchievementContext, input: Input) -> Outcome {
    let text = input
        .text()
        .ok_or_else(|| CallbackError::bad_input("expected text"))?
        .trim()
        .to_string();
    let stage = ctx.scratch.stage;
    let draft = ctx.scratch.draft.get_or_insert_with(Draft::default);

    let (next, prompt) = match stage {
        AddStage::Name => {
            draft.name = text;
            (AddStage::Description, "Now enter the achievement description")
        }
        AddStage::Description => {
            draft.description = text;
            (AddStage::Limit, "Now what about the limit to achieve?")
        }
        AddStage::Limit => {
            draft.limit = parse_number(&text)?;
            (AddStage::Current, "Okay, and where are you now?")
        }
        AddStage::Current => {
            draft.initial = parse_number(&text)?;
            let question = format!("So, you are to add {}, OK?", draft.name);
            ctx.scratch.stage = AddStage::Confirm;
            ctx.detach();
            ctx.ask(Content::with_row(
                question,
                vec![
                    Button::new("OK", OK_BUTTON),
                    Button::new("Fix it", RETRY_BUTTON),
                    Button::new("Drop it", ABORT_BUTTON),
                ],
            ));
            return Ok(Input::Empty);
        }
        AddStage::Confirm => return Err(CallbackError::bad_input("draft awaits confirmation")),
    };

    ctx.scratch.stage = next;
    ctx.send(prompt);
    Ok(Input::Empty)
}

pub(super) fn finish_add(ctx: &mut AchievementContext, input: Input, settings: Settings) -> Outcome {
    let draft = ctx
        .scratch
        .draft
        .take()
        .ok_or_else(|| CallbackError::bad_input("no achievement being added"))?;
    let check_time = ctx.now + settings.check_period;
    let name = draft.name.clone();

    ctx.data.limits.insert(
        name.clone(),
        LimitAchievement {
            base: Achievement {
                name: draft.name,
                description: draft.description,
                check_time,
                limit: draft.limit,
                initial: draft.initial,
                ascend: draft.limit > draft.initial,
                done: false,
            },
            current: draft.initial,
        },
    );
    ctx.set_alarm(ACHIEVEMENT_ALARM, &name, check_time);
    ctx.detach();
    Ok(input)
}

pub(super) fn drop_add(ctx: &mut AchievementContext, input: Input) -> Outcome {
    ctx.scratch.draft = None;
    ctx.scratch.stage = AddStage::Name;
    Ok(input)
}

pub(super) fn do_report(ctx: &mut AchievementContext, _input: Input) -> Outcome {
    let name = ctx
        .data
        .reporting
        .clone()
        .ok_or_else(|| CallbackError::bad_input("no achievement awaiting a report"))?;
    ctx.send(format!("Okay, now enter the current state of {name}"));
    Ok(Input::Empty)
}

pub(super) fn finish_report(
    ctx: &mut AchievementContext,
    input: Input,
    settings: Settings,
) -> Outcome {
    let value = parse_number(input.text().unwrap_or_default())?;
    let Some(name) = ctx.data.reporting.take() else {
        tracing::warn!(user = %ctx.user.id, "Report without a pending check");
        return Ok(Input::Empty);
    };

    let mut completed = false;
    if let Some(limit) = ctx.data.limits.get_mut(&name) {
        limit.current = value;
        if limit.base.reached(value) {
            limit.base.done = true;
            completed = true;
        }
    } else if let Some(strike) = ctx.data.strikes.get_mut(&name) {
        if strike.base.reached(value) {
            strike.last = strike.last.saturating_add(1);
        } else {
            strike.best = strike.best.max(strike.last);
            strike.last = 0;
        }
        if strike.last >= strike.strike {
            strike.base.done = true;
            completed = true;
        }
    } else {
        tracing::warn!(user = %ctx.user.id, name = %name, "Report for unknown achievement");
        return Ok(Input::Empty);
    }

    let now = ctx.now;
    let next_check = ctx.data.get_mut(&name).and_then(|a| {
        if a.done {
            return None;
        }
        a.check_time = next_check_after(a.check_time, now, settings.check_period);
        Some(a.check_time)
    });

    if completed {
        ctx.send(format!("Wow, you've done it! Achievement {name} completed!"));
    }
    if let Some(at) = next_check {
        ctx.set_alarm(ACHIEVEMENT_ALARM, &name, at);
    }
    Ok(Input::Empty)
}

/// First point of the `from + k * period` cadence strictly after `now`
fn next_check_after(from: DateTime<Utc>, now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    if period <= Duration::zero() {
        return now;
    }
    let mut next = from + period;
    while next <= now {
        next += period;
    }
    next
}
