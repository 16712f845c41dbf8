//! Built-in bootstrap file content. The lowest layer of the resolver's
//! custom > template > built-in priority chain.

/// Filenames the resolver recognizes as having a built-in default. Anything
/// not in this set is a miss once custom and template layers are exhausted.
pub const BUILTIN_FILENAMES: &[&str] = &[
    "AGENT.md",
    "SOUL.md",
    "TOOLS.md",
    "IDENTITY.md",
    "USER.md",
    "HEARTBEAT.md",
    "BOOTSTRAP.md",
    "MEMORY.md",
];

pub fn builtin_content(filename: &str) -> Option<&'static str> {
    match filename {
        "AGENT.md" => Some(AGENT),
        "SOUL.md" => Some(SOUL),
        "TOOLS.md" => Some(TOOLS),
        "IDENTITY.md" => Some(IDENTITY),
        "USER.md" => Some(USER),
        "HEARTBEAT.md" => Some(HEARTBEAT),
        "BOOTSTRAP.md" => Some(BOOTSTRAP),
        "MEMORY.md" => Some(MEMORY),
        _ => None,
    }
}

const AGENT: &str = "# Agent\n\nYou are a helpful assistant running inside a managed workspace.\n";
const SOUL: &str = "# Soul\n\nNo persona customization has been configured for this user yet.\n";
const TOOLS: &str = "# Tools\n\nNo additional tools are enabled beyond the runtime defaults.\n";
const IDENTITY: &str = "# Identity\n\nThis agent has not been given a custom identity.\n";
const USER: &str = "# User\n\nNo profile information has been recorded for this user yet.\n";
const HEARTBEAT: &str = "# Heartbeat\n\nNo periodic heartbeat tasks are configured.\n";
const BOOTSTRAP: &str = "# Bootstrap\n\nThis is the default bootstrap sequence. Nothing user-specific has been set up.\n";
const MEMORY: &str = "# Memory\n\nNo memory has been recorded yet.\n";
