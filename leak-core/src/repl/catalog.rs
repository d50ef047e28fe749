//! Operator command catalog.
//!
//! The parser resolves keywords here and help output is rendered from the
//! same table, so the two never drift apart.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Start,
    Abort,
    Reset,
    Status,
    Config,
    Sample,
    Fault,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

impl CommandSpec {
    const fn new(
        name: &'static str,
        tag: CommandTag,
        usage: &'static str,
        summary: &'static str,
    ) -> Self {
        Self {
            name,
            tag,
            usage,
            summary,
        }
    }
}

pub const COMMANDS: [CommandSpec; 8] = [
    CommandSpec::new(
        "start",
        CommandTag::Start,
        "start",
        "begin a leak test with the loaded configuration",
    ),
    CommandSpec::new(
        "abort",
        CommandTag::Abort,
        "abort",
        "stop the running test and vent all outputs",
    ),
    CommandSpec::new(
        "reset",
        CommandTag::Reset,
        "reset",
        "clear an overpressure latch and re-verify outputs off",
    ),
    CommandSpec::new(
        "status",
        CommandTag::Status,
        "status",
        "show sequencer state, pressure and outputs",
    ),
    CommandSpec::new(
        "config",
        CommandTag::Config,
        "config",
        "show the active test configuration",
    ),
    CommandSpec::new(
        "sample",
        CommandTag::Sample,
        "sample [burst <count> [<rate>]]",
        "read pressure once, or capture a paced burst",
    ),
    CommandSpec::new(
        "fault",
        CommandTag::Fault,
        "fault <sensor|valve|overshoot|clear>",
        "inject or clear a simulated rig fault",
    ),
    CommandSpec::new(
        "help",
        CommandTag::Help,
        "help [topic]",
        "show help for a command",
    ),
];

/// Case-insensitive keyword lookup.
#[must_use]
pub fn find(keyword: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(keyword))
}
