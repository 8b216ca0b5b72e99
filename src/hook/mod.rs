//! Hypervisor lifecycle hook.
//!
//! - [`handler`]: pre-start activation and post-stop release of a VM's vGPUs
//! - [`preview`]: `get-command` dry run printing the equivalent `qm set` commands

use std::fmt;

pub mod handler;
pub mod preview;

pub use handler::{run_hook, HookOutcome};
pub use preview::{preview_command, CommandPreview};

/// Hook phase as passed by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    PreStart,
    PostStop,
    /// `post-start`, `pre-stop` and anything else; accepted and ignored.
    Other(String),
}

impl From<&str> for Phase {
    fn from(raw: &str) -> Self {
        match raw {
            "pre-start" => Phase::PreStart,
            "post-stop" => Phase::PostStop,
            other => Phase::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreStart => write!(f, "pre-start"),
            Phase::PostStop => write!(f, "post-stop"),
            Phase::Other(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse() {
        assert_eq!(Phase::from("pre-start"), Phase::PreStart);
        assert_eq!(Phase::from("post-stop"), Phase::PostStop);
        assert_eq!(Phase::from("pre-stop"), Phase::Other("pre-stop".to_string()));
        assert_eq!(Phase::from("post-stop").to_string(), "post-stop");
    }
}
