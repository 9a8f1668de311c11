//! Command names, aliases and flag shapes, shared by the router and by the
//! CLI argv parser.

use harbor_proto::{FlagValue, Request};

use super::{CommandContext, CommandError, Outcome, panes, sessions, windows};

pub type Handler = fn(&CommandContext<'_>, &Request) -> Result<Outcome, CommandError>;

pub struct CommandSpec {
    pub name: &'static str,
    pub alias: Option<&'static str>,
    /// Flags that take a value; every other flag letter is boolean.
    pub value_flags: &'static str,
    /// Value flags sent as numbers when the value parses as one.
    pub numeric_flags: &'static str,
    pub usage: &'static str,
    pub handler: Handler,
}

macro_rules! command {
    ($name:literal, $alias:expr, $values:literal, $numeric:literal, $usage:literal, $handler:path) => {
        CommandSpec {
            name: $name,
            alias: $alias,
            value_flags: $values,
            numeric_flags: $numeric,
            usage: $usage,
            handler: $handler,
        }
    };
}

pub static COMMANDS: &[CommandSpec] = &[
    command!(
        "new-session", Some("new"), "sncxyF", "xy",
        "new-session [-dP] [-c start-directory] [-F format] [-n window-name] [-s session-name] [-x width] [-y height] [command]",
        sessions::new_session
    ),
    command!("kill-session", None, "t", "", "kill-session [-t target-session]", sessions::kill_session),
    command!("has-session", Some("has"), "t", "", "has-session [-t target-session]", sessions::has_session),
    command!(
        "rename-session", Some("rename"), "t", "",
        "rename-session [-t target-session] new-name",
        sessions::rename_session
    ),
    command!("list-sessions", Some("ls"), "F", "", "list-sessions [-F format]", sessions::list_sessions),
    command!(
        "new-window", Some("neww"), "tncF", "",
        "new-window [-dP] [-c start-directory] [-F format] [-n window-name] [-t target-session] [command]",
        windows::new_window
    ),
    command!("kill-window", Some("killw"), "t", "", "kill-window [-a] [-t target-window]", windows::kill_window),
    command!(
        "rename-window", Some("renamew"), "t", "",
        "rename-window [-t target-window] new-name",
        windows::rename_window
    ),
    command!("select-window", Some("selectw"), "t", "", "select-window [-t target-window]", windows::select_window),
    command!(
        "list-windows", Some("lsw"), "tF", "",
        "list-windows [-a] [-F format] [-t target-session]",
        windows::list_windows
    ),
    command!(
        "split-window", Some("splitw"), "tlpcF", "lp",
        "split-window [-bdhvP] [-c start-directory] [-F format] [-l size] [-p percentage] [-t target-pane] [command]",
        panes::split_window
    ),
    command!("kill-pane", Some("killp"), "t", "", "kill-pane [-a] [-t target-pane]", panes::kill_pane),
    command!(
        "select-pane", Some("selectp"), "tT", "",
        "select-pane [-DLRU] [-T title] [-t target-pane]",
        panes::select_pane
    ),
    command!(
        "resize-pane", Some("resizep"), "txy", "xy",
        "resize-pane [-DLRU] [-x width] [-y height] [-t target-pane] [adjustment]",
        panes::resize_pane
    ),
    command!(
        "swap-pane", Some("swapp"), "st", "",
        "swap-pane [-DU] [-s src-pane] [-t dst-pane]",
        panes::swap_pane
    ),
    command!(
        "list-panes", Some("lsp"), "tF", "",
        "list-panes [-as] [-F format] [-t target]",
        panes::list_panes
    ),
    command!(
        "capture-pane", Some("capturep"), "tSE", "",
        "capture-pane [-p] [-S start-line] [-t target-pane]",
        panes::capture_pane
    ),
    command!("send-keys", Some("send"), "t", "", "send-keys [-l] [-t target-pane] key ...", panes::send_keys),
    command!(
        "display-message", Some("display"), "t", "",
        "display-message [-p] [-t target-pane] [message]",
        panes::display_message
    ),
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name == name || spec.alias == Some(name))
}

/// Builds a request from tmux-style argv: flags (`-x value`, `-xvalue`,
/// grouped booleans like `-dP`) come before the first positional argument,
/// and `--` ends flag parsing. Unknown commands are passed through so the
/// server reports them.
pub fn parse_argv(argv: &[String]) -> Result<Request, CommandError> {
    let (command, rest) = argv
        .split_first()
        .ok_or_else(|| CommandError::Usage("missing command".to_string()))?;
    let spec = lookup(command);
    let (value_flags, numeric_flags) = spec.map_or(("", ""), |spec| (spec.value_flags, spec.numeric_flags));
    let mut request = Request::new(spec.map_or(command.as_str(), |spec| spec.name));

    let mut words = rest.iter();
    while let Some(word) = words.next() {
        if word == "--" {
            request.args.extend(words.by_ref().cloned());
            break;
        }
        let Some(letters) = word.strip_prefix('-').filter(|letters| !letters.is_empty()) else {
            request.args.push(word.clone());
            request.args.extend(words.by_ref().cloned());
            break;
        };
        for (offset, letter) in letters.char_indices() {
            if !value_flags.contains(letter) {
                request.flags.insert(letter.to_string(), true);
                continue;
            }
            let inline = &letters[offset + letter.len_utf8()..];
            let value = if inline.is_empty() {
                words
                    .next()
                    .cloned()
                    .ok_or_else(|| CommandError::Usage(format!("-{letter} expects a value")))?
            } else {
                inline.to_string()
            };
            let value = match value.parse::<i64>() {
                Ok(number) if numeric_flags.contains(letter) => FlagValue::Number(number.into()),
                _ => FlagValue::String(value),
            };
            request.flags.insert(letter.to_string(), value);
            break;
        }
    }
    Ok(request)
}
