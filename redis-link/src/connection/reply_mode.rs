//! CLIENT REPLY accounting
//!
//! `CLIENT REPLY OFF` silences the server until `ON`, and `SKIP` drops the
//! reply of the following command only. The connection tracks the mode the
//! caller has put the server in and predicts how many replies each batch
//! will produce, so the socket owner knows how many to wait for.

use crate::command::Command;

/// Server reply mode as induced by `CLIENT REPLY` commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ReplyMode {
    /// The server replies to every command
    #[default]
    On,
    /// The server is silent until `CLIENT REPLY ON`
    Off,
    /// The server skips the reply of the next command
    Skip,
}

enum ReplySwitch {
    On,
    Off,
    Skip,
}

fn classify(command: &Command) -> Option<ReplySwitch> {
    let args = command.args();
    if args.len() != 3
        || !args[0].eq_ignore_ascii_case(b"CLIENT")
        || !args[1].eq_ignore_ascii_case(b"REPLY")
    {
        return None;
    }
    if args[2].eq_ignore_ascii_case(b"ON") {
        Some(ReplySwitch::On)
    } else if args[2].eq_ignore_ascii_case(b"OFF") {
        Some(ReplySwitch::Off)
    } else if args[2].eq_ignore_ascii_case(b"SKIP") {
        Some(ReplySwitch::Skip)
    } else {
        None
    }
}

/// Walk the batch left to right, starting from `mode`, and return the mode
/// to persist together with the number of replies the server will send.
pub(crate) fn account(mut mode: ReplyMode, commands: &[Command]) -> (ReplyMode, usize) {
    let mut ncommands = 0;
    for command in commands {
        match classify(command) {
            Some(ReplySwitch::Off) => mode = ReplyMode::Off,
            Some(ReplySwitch::Skip) => {
                // SKIP inside OFF changes nothing; the server stays silent.
                if mode != ReplyMode::Off {
                    mode = ReplyMode::Skip;
                }
            }
            Some(ReplySwitch::On) => {
                // ON itself is acknowledged with +OK.
                mode = ReplyMode::On;
                ncommands += 1;
            }
            None => match mode {
                ReplyMode::On => ncommands += 1,
                ReplyMode::Off => {}
                ReplyMode::Skip => mode = ReplyMode::On,
            },
        }
    }
    (mode, ncommands)
}
