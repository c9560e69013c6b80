#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose argument is the raw remainder of the line.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "preset",
        action: "set_preset",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
    },
    CommandSpec {
        command: "provider",
        action: "set_provider",
    },
    CommandSpec {
        command: "key",
        action: "set_credential",
    },
    CommandSpec {
        command: "new_preset",
        action: "create_preset",
    },
    CommandSpec {
        command: "delete_preset",
        action: "delete_preset",
    },
];

/// Commands taking a single (possibly quoted) path argument.
pub(crate) const PATH_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "save",
        action: "save_artifact",
    },
    CommandSpec {
        command: "screenshot",
        action: "screenshot_iterate",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "presets",
        action: "list_presets",
    },
    CommandSpec {
        command: "models",
        action: "list_models",
    },
    CommandSpec {
        command: "optimize",
        action: "optimize",
    },
    CommandSpec {
        command: "code",
        action: "show_code",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub(crate) const LOOPS_COMMAND: CommandSpec = CommandSpec {
    command: "loops",
    action: "set_loops",
};

pub(crate) const ITERATE_COMMAND: CommandSpec = CommandSpec {
    command: "iterate",
    action: "iterate",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/preset",
    "/presets",
    "/new_preset",
    "/delete_preset",
    "/model",
    "/models",
    "/provider",
    "/key",
    "/loops",
    "/optimize",
    "/iterate",
    "/screenshot",
    "/code",
    "/save",
    "/help",
    "/quit",
];
