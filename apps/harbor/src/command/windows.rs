use std::path::PathBuf;

use harbor_proto::Request;

use super::format::{LIST_WINDOWS_FORMAT, NEW_WINDOW_FORMAT};
use super::sessions::program_name;
use super::{CommandContext, CommandError, Outcome, command_line, target};
use crate::session::SessionDelta;

pub(super) fn new_window(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let flags = &request.flags;
    let spec = target(request)?;
    let detached = flags.bool("d")?;
    let print = flags.bool("P")?;
    let template = flags.str("F")?.unwrap_or(NEW_WINDOW_FORMAT);
    let cwd = flags.str("c")?.map(PathBuf::from);
    let command = command_line(&request.args);
    let name = match flags.str("n")? {
        Some(name) => Some(name.to_string()),
        None => command.as_deref().and_then(program_name),
    };

    let session = ctx.sessions.resolve_session(spec, &request.caller_pane)?;
    let created = ctx
        .sessions
        .add_window(session.session_id, name.as_deref(), !detached)?;
    if let Err(err) = ctx.launch(&created, command.as_deref(), cwd.as_deref(), &request.env) {
        let _ = ctx.sessions.remove_window(created.window_id);
        return Err(err.into());
    }

    let stdout = if print {
        format!("{}\n", ctx.render(template, &created))
    } else {
        String::new()
    };
    Ok(Outcome::output(stdout).with_delta(SessionDelta::WindowAdded {
        session_id: created.session_id,
        window_id: created.window_id,
    }))
}

pub(super) fn kill_window(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let others = request.flags.bool("a")?;
    let window = ctx.sessions.resolve_window(target(request)?, &request.caller_pane)?;
    if others {
        let removed = ctx.sessions.remove_other_windows(window.window_id)?;
        return Ok(Outcome::silent().with_delta(SessionDelta::WindowRemoved {
            session_id: window.session_id,
            window_ids: removed,
        }));
    }

    let removal = ctx.sessions.remove_window(window.window_id)?;
    let delta = if removal.session_removed {
        SessionDelta::SessionRemoved {
            session_id: removal.session_id,
        }
    } else {
        SessionDelta::WindowRemoved {
            session_id: removal.session_id,
            window_ids: vec![window.window_id],
        }
    };
    Ok(Outcome::silent().with_delta(delta))
}

pub(super) fn rename_window(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let spec = target(request)?;
    let [name] = request.args.as_slice() else {
        return Err(CommandError::Usage("rename-window [-t target-window] new-name".to_string()));
    };
    let window = ctx.sessions.resolve_window(spec, &request.caller_pane)?;
    let name = ctx.sessions.rename_window(window.window_id, name)?;
    Ok(Outcome::silent().with_delta(SessionDelta::WindowRenamed {
        window_id: window.window_id,
        name,
    }))
}

pub(super) fn select_window(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let window = ctx.sessions.resolve_window(target(request)?, &request.caller_pane)?;
    let active = ctx.sessions.select_window(window.window_id)?;
    Ok(Outcome::silent().with_delta(SessionDelta::ActiveChanged {
        session_id: active.session_id,
        window_id: active.window_id,
        pane_id: active.pane_id,
    }))
}

pub(super) fn list_windows(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let all = request.flags.bool("a")?;
    let spec = target(request)?;
    let windows = if all {
        ctx.sessions.window_contexts(None)
    } else {
        let session = ctx.sessions.resolve_session(spec, &request.caller_pane)?;
        ctx.sessions.window_contexts(Some(session.session_id))
    };
    let template = match request.flags.str("F")? {
        Some(template) => template.to_string(),
        None if all => format!("#{{session_name}}:{LIST_WINDOWS_FORMAT}"),
        None => LIST_WINDOWS_FORMAT.to_string(),
    };
    Ok(Outcome::lines(windows.iter().map(|window| ctx.render(&template, window))))
}
