use std::path::PathBuf;

use harbor_proto::Request;

use super::format::{LIST_SESSIONS_FORMAT, NEW_SESSION_FORMAT};
use super::{CommandContext, CommandError, Outcome, command_line, dimension, target};
use crate::session::{NewSession, SessionDelta, Workspace};

/// Window name for a pane running `command`: the program's file name.
pub(super) fn program_name(command: &str) -> Option<String> {
    let program = command.split_whitespace().next()?;
    let name = program.rsplit('/').next().unwrap_or(program);
    (!name.is_empty()).then(|| name.to_string())
}

pub(super) fn new_session(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let flags = &request.flags;
    let cols = dimension("x", flags.int("x")?)?.unwrap_or(ctx.defaults.cols);
    let rows = dimension("y", flags.int("y")?)?.unwrap_or(ctx.defaults.rows);
    let print = flags.bool("P")?;
    let template = flags.str("F")?.unwrap_or(NEW_SESSION_FORMAT);
    let cwd = flags.str("c")?.map(PathBuf::from);
    let command = command_line(&request.args);
    let window_name = match flags.str("n")? {
        Some(name) => Some(name.to_string()),
        None => command.as_deref().and_then(program_name),
    };

    let created = ctx.sessions.create_session(NewSession {
        name: flags.str("s")?.map(str::to_string),
        window_name,
        cols,
        rows,
        workspace: cwd.clone().map(|root| Workspace { root, worktree: None }),
    })?;
    if let Err(err) = ctx.launch(&created, command.as_deref(), cwd.as_deref(), &request.env) {
        let _ = ctx.sessions.remove_session(created.session_id);
        return Err(err.into());
    }

    let stdout = if print {
        format!("{}\n", ctx.render(template, &created))
    } else {
        String::new()
    };
    Ok(Outcome::output(stdout).with_delta(SessionDelta::SessionCreated {
        session_id: created.session_id,
        name: created.session_name,
    }))
}

pub(super) fn kill_session(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let session = ctx.sessions.resolve_session(target(request)?, &request.caller_pane)?;
    ctx.sessions.remove_session(session.session_id)?;
    Ok(Outcome::silent().with_delta(SessionDelta::SessionRemoved {
        session_id: session.session_id,
    }))
}

pub(super) fn has_session(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    ctx.sessions.resolve_session(target(request)?, &request.caller_pane)?;
    Ok(Outcome::silent())
}

pub(super) fn rename_session(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let spec = target(request)?;
    let [name] = request.args.as_slice() else {
        return Err(CommandError::Usage("rename-session [-t target-session] new-name".to_string()));
    };
    let session = ctx.sessions.resolve_session(spec, &request.caller_pane)?;
    let name = ctx.sessions.rename_session(session.session_id, name)?;
    Ok(Outcome::silent().with_delta(SessionDelta::SessionRenamed {
        session_id: session.session_id,
        name,
    }))
}

pub(super) fn list_sessions(ctx: &CommandContext<'_>, request: &Request) -> Result<Outcome, CommandError> {
    let template = request.flags.str("F")?.unwrap_or(LIST_SESSIONS_FORMAT);
    Ok(Outcome::lines(
        ctx.sessions
            .session_contexts()
            .iter()
            .map(|session| ctx.render(template, session)),
    ))
}

#[cfg(test)]
mod tests {
    use super::program_name;

    #[test]
    fn program_name_is_the_file_name() {
        assert_eq!(program_name("/usr/bin/htop -d 5").as_deref(), Some("htop"));
        assert_eq!(program_name("vim").as_deref(), Some("vim"));
        assert_eq!(program_name("   "), None);
    }
}
