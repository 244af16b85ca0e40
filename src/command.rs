/// Leading character chat users put in front of a verb, e.g. `/rp`.
pub const COMMAND_PREFIX: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    Today,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Show,
    History,
    Leaderboard,
    /// `None` when no target was given.
    Steal { target: Option<String> },
    /// `None` when the argument is missing or not `today`/`all`.
    Delete { scope: Option<DeleteScope> },
}

/// Parses one chat line. Empty input and unknown verbs yield `None`.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let verb = verb.strip_prefix(COMMAND_PREFIX).unwrap_or(verb).to_lowercase();

    let command = match verb.as_str() {
        "rp帮助" | "rp-help" => Command::Help,
        "rp" => Command::Show,
        "rp记录" | "rp-history" => Command::History,
        "rp排行榜" | "rp-leaderboard" => Command::Leaderboard,
        "rp偷" | "rp-steal" => Command::Steal { target: steal_target(rest) },
        "rp删除" | "rp-delete" => Command::Delete { scope: delete_scope(rest) },
        _ => return None,
    };
    Some(command)
}

fn steal_target(arg: &str) -> Option<String> {
    let target = arg.strip_prefix('@').unwrap_or(arg).trim();
    (!target.is_empty()).then(|| target.to_string())
}

fn delete_scope(arg: &str) -> Option<DeleteScope> {
    match arg.to_lowercase().as_str() {
        "today" => Some(DeleteScope::Today),
        "all" => Some(DeleteScope::All),
        _ => None,
    }
}
