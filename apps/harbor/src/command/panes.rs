use std::path::PathBuf;

use harbor_proto::Request;

use super::format::{DISPLAY_FORMAT, LIST_PANES_FORMAT, NEW_PANE_FORMAT};
use super::keys::encode_keys;
use super::spawn::SpawnError;
use super::{CommandContext, CommandError, Outcome, command_line, dimension, target};
use crate::session::{
    Navigate, PaneRemoval, PaneScope, SessionDelta, SizeChange, SplitDirection, SplitOptions, SplitSize,
};

pub(super) fn split_window(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let flags = &request.flags;
    let spec = target(request)?;
    let direction = if flags.bool("h")? {
        SplitDirection::Horizontal
    } else {
        SplitDirection::Vertical
    };
    let size = match (flags.int("l")?, flags.int("p")?) {
        (Some(cells), _) => dimension("l", Some(cells))?.map(SplitSize::Cells),
        (None, Some(percent)) if (1..=99).contains(&percent) => Some(SplitSize::Percent(percent as u16)),
        (None, Some(_)) => return Err(CommandError::Usage("-p must be between 1 and 99".to_string())),
        (None, None) => None,
    };
    let options = SplitOptions {
        direction,
        before: flags.bool("b")?,
        size,
        select: !flags.bool("d")?,
    };
    let print = flags.bool("P")?;
    let template = flags.str("F")?.unwrap_or(NEW_PANE_FORMAT);
    let cwd = flags.str("c")?.map(PathBuf::from);
    let command = command_line(&request.args);

    let pane = ctx.sessions.resolve_target(spec, &request.caller_pane)?;
    let created = ctx.sessions.split_pane(pane.pane_id, options)?;
    if let Err(err) = ctx.launch(&created, command.as_deref(), cwd.as_deref(), &request.env) {
        let _ = ctx.sessions.kill_pane(created.pane_id);
        return Err(err.into());
    }

    let stdout = if print {
        format!("{}\n", ctx.render(template, &created))
    } else {
        String::new()
    };
    Ok(Outcome::output(stdout).with_delta(SessionDelta::PaneAdded {
        window_id: created.window_id,
        pane_id: created.pane_id,
    }))
}

pub(super) fn kill_pane(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let others = request.flags.bool("a")?;
    let pane = ctx.sessions.resolve_target(target(request)?, &request.caller_pane)?;
    if others {
        let removed = ctx.sessions.kill_other_panes(pane.pane_id)?;
        if removed.is_empty() {
            return Ok(Outcome::silent());
        }
        return Ok(Outcome::silent().with_delta(SessionDelta::PaneRemoved {
            window_id: pane.window_id,
            pane_ids: removed,
        }));
    }

    let removal = ctx.sessions.kill_pane(pane.pane_id)?;
    let delta = match removal {
        PaneRemoval {
            session_removed: true,
            session_id,
            ..
        } => SessionDelta::SessionRemoved { session_id },
        PaneRemoval {
            window_removed: true,
            session_id,
            window_id,
            ..
        } => SessionDelta::WindowRemoved {
            session_id,
            window_ids: vec![window_id],
        },
        PaneRemoval { window_id, .. } => SessionDelta::PaneRemoved {
            window_id,
            pane_ids: vec![pane.pane_id],
        },
    };
    Ok(Outcome::silent().with_delta(delta))
}

fn direction_flag(request: &Request) -> Result<Option<Navigate>, CommandError> {
    let flags = &request.flags;
    Ok(if flags.bool("L")? {
        Some(Navigate::Left)
    } else if flags.bool("R")? {
        Some(Navigate::Right)
    } else if flags.bool("U")? {
        Some(Navigate::Up)
    } else if flags.bool("D")? {
        Some(Navigate::Down)
    } else {
        None
    })
}

pub(super) fn select_pane(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let spec = target(request)?;
    let title = request.flags.str("T")?;
    let toward = direction_flag(request)?;
    let pane = ctx.sessions.resolve_target(spec, &request.caller_pane)?;

    if let Some(title) = title {
        ctx.sessions.rename_pane(pane.pane_id, title)?;
        return Ok(Outcome::silent().with_delta(SessionDelta::PaneRenamed {
            pane_id: pane.pane_id,
            title: title.to_string(),
        }));
    }

    let active = match toward {
        Some(toward) => ctx.sessions.select_pane_direction(pane.pane_id, toward)?,
        None => ctx.sessions.select_pane(pane.pane_id)?,
    };
    Ok(Outcome::silent().with_delta(SessionDelta::ActiveChanged {
        session_id: active.session_id,
        window_id: active.window_id,
        pane_id: active.pane_id,
    }))
}

pub(super) fn resize_pane(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let flags = &request.flags;
    let spec = target(request)?;
    let mut width = dimension("x", flags.int("x")?)?.map(SizeChange::To);
    let mut height = dimension("y", flags.int("y")?)?.map(SizeChange::To);

    if let Some(toward) = direction_flag(request)? {
        let amount = match request.args.first() {
            Some(text) => text
                .parse::<u16>()
                .map_err(|_| CommandError::Usage(format!("bad adjustment: {text}")))?,
            None => 1,
        };
        let amount = i32::from(amount);
        match toward {
            Navigate::Right => width = Some(SizeChange::By(amount)),
            Navigate::Left => width = Some(SizeChange::By(-amount)),
            Navigate::Down => height = Some(SizeChange::By(amount)),
            Navigate::Up => height = Some(SizeChange::By(-amount)),
        }
    }

    let pane = ctx.sessions.resolve_target(spec, &request.caller_pane)?;
    if width.is_none() && height.is_none() {
        return Ok(Outcome::silent());
    }
    let resized = ctx.sessions.resize_pane(pane.pane_id, width, height)?;
    Ok(Outcome::silent().with_delta(SessionDelta::LayoutChanged {
        window_id: resized.window_id,
    }))
}

pub(super) fn swap_pane(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let flags = &request.flags;
    let source_spec = flags.str("s")?;
    let spec = target(request)?;
    let (up, down) = (flags.bool("U")?, flags.bool("D")?);
    let destination = ctx.sessions.resolve_target(spec, &request.caller_pane)?;

    let source = if up || down {
        let siblings = ctx.sessions.pane_contexts(PaneScope::Window(destination.window_id));
        let count = siblings.len();
        let position = siblings
            .iter()
            .position(|pane| pane.pane_id == destination.pane_id)
            .unwrap_or(0);
        let neighbour = if up {
            (position + count - 1) % count.max(1)
        } else {
            (position + 1) % count.max(1)
        };
        siblings
            .get(neighbour)
            .map(|pane| pane.pane_id)
            .unwrap_or(destination.pane_id)
    } else {
        ctx.sessions
            .resolve_target(source_spec.unwrap_or(""), &request.caller_pane)?
            .pane_id
    };

    if source == destination.pane_id {
        return Ok(Outcome::silent());
    }
    ctx.sessions.swap_panes(source, destination.pane_id)?;
    Ok(Outcome::silent().with_delta(SessionDelta::LayoutChanged {
        window_id: destination.window_id,
    }))
}

pub(super) fn list_panes(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let flags = &request.flags;
    let spec = target(request)?;
    let (all, session_wide) = (flags.bool("a")?, flags.bool("s")?);
    let (scope, prefix) = if all {
        (PaneScope::All, "#{session_name}:#{window_index}.")
    } else if session_wide {
        let session = ctx.sessions.resolve_session(spec, &request.caller_pane)?;
        (PaneScope::Session(session.session_id), "#{window_index}.")
    } else {
        let window = ctx.sessions.resolve_window(spec, &request.caller_pane)?;
        (PaneScope::Window(window.window_id), "")
    };
    let template = match flags.str("F")? {
        Some(template) => template.to_string(),
        None => format!("{prefix}{LIST_PANES_FORMAT}"),
    };
    Ok(Outcome::lines(
        ctx.sessions
            .pane_contexts(scope)
            .iter()
            .map(|pane| ctx.render(&template, pane)),
    ))
}

/// `-S -` means all history, `-S -N` the last N history lines. Anything
/// else starts at the top of the visible screen.
fn history_lines(start: Option<&str>) -> Result<Option<usize>, CommandError> {
    match start {
        None => Ok(None),
        Some("-") => Ok(Some(usize::MAX)),
        Some(text) => {
            let line = text
                .parse::<i64>()
                .map_err(|_| CommandError::Usage(format!("bad start line: {text}")))?;
            Ok((line < 0).then(|| line.unsigned_abs() as usize))
        }
    }
}

pub(super) fn capture_pane(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let spec = target(request)?;
    let history = history_lines(request.flags.str("S")?)?;
    let pane = ctx.sessions.resolve_target(spec, &request.caller_pane)?;
    let mut text = ctx
        .panes
        .capture(&pane.pane_id.to_string(), history)
        .unwrap_or_default();
    if !text.is_empty() {
        text.push('\n');
    }
    Ok(Outcome::output(text))
}

pub(super) fn send_keys(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let spec = target(request)?;
    let literal = request.flags.bool("l")?;
    let pane = ctx.sessions.resolve_target(spec, &request.caller_pane)?;
    let spawner = ctx.spawner.ok_or(SpawnError::NoProcess(pane.pane_id))?;
    let bytes = encode_keys(&request.args, literal);
    if !bytes.is_empty() {
        spawner.send(pane.pane_id, &bytes)?;
    }
    Ok(Outcome::silent())
}

pub(super) fn display_message(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let spec = target(request)?;
    let template = command_line(&request.args);
    let pane = ctx.sessions.resolve_target(spec, &request.caller_pane)?;
    let context = ctx.sessions.pane_context(pane.pane_id)?;
    let message = ctx.render(template.as_deref().unwrap_or(DISPLAY_FORMAT), &context);
    Ok(Outcome::output(format!("{message}\n")))
}
