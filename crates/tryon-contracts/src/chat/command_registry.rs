#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const TIER_COMMANDS: &[&str] = &["standard", "enhanced"];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "person",
        action: "select_person",
    },
    CommandSpec {
        command: "garment",
        action: "select_garment",
    },
];

/// Commands whose remainder is kept verbatim as free text.
pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "scenario",
        action: "select_scenario",
    },
    CommandSpec {
        command: "custom",
        action: "set_custom_scenario",
    },
    CommandSpec {
        command: "angle",
        action: "select_angle",
    },
    CommandSpec {
        command: "tier",
        action: "set_tier",
    },
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "preview",
        action: "open_preview",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "close_preview",
        action: "close_preview",
    },
    CommandSpec {
        command: "history",
        action: "open_history",
    },
    CommandSpec {
        command: "close_history",
        action: "close_history",
    },
    CommandSpec {
        command: "scenarios",
        action: "list_scenarios",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "wait",
        action: "wait",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/person",
    "/garment",
    "/scenario",
    "/scenarios",
    "/custom",
    "/angle",
    "/tier",
    "/standard",
    "/enhanced",
    "/generate",
    "/preview",
    "/close_preview",
    "/history",
    "/close_history",
    "/download",
    "/status",
    "/wait",
    "/reset",
    "/quit",
];
