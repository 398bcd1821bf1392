//! Operator commands read from stdin while the pipeline runs.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};

use crate::config::{Enhancement, EnhancementMode, DEFAULT_GAMMA};
use crate::controller::Controller;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run,
    Pause,
    Toggle,
    /// `None` clears the backdrop.
    Background(Option<PathBuf>),
    Enhance(EnhancementMode),
    Gamma(f32),
    Retry,
    Status,
    Quit,
}

pub const HELP: &str =
    "commands: run | pause | toggle | bg <path>|none | enhance none|gamma | gamma <value> | retry | status | quit";

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "run" | "resume" => Self::Run,
            "pause" | "stop" => Self::Pause,
            "toggle" | "p" => Self::Toggle,
            "bg" | "background" => match rest {
                "" => bail!("bg needs a path or `none`"),
                "none" => Self::Background(None),
                path => Self::Background(Some(PathBuf::from(path))),
            },
            "enhance" => match rest {
                "none" | "off" => Self::Enhance(EnhancementMode::None),
                "gamma" => Self::Enhance(EnhancementMode::Gamma),
                other => bail!("unknown enhancement `{other}`"),
            },
            "gamma" => {
                let gamma: f32 = rest
                    .parse()
                    .with_context(|| format!("invalid gamma `{rest}`"))?;
                Enhancement::Gamma { gamma }.validate()?;
                Self::Gamma(gamma)
            }
            "retry" => Self::Retry,
            "status" => Self::Status,
            "quit" | "exit" | "q" => Self::Quit,
            "" => return Err(anyhow!("empty command")),
            other => bail!("unknown command `{other}`; {HELP}"),
        };
        Ok(command)
    }
}

/// Apply `command` to the running pipeline. `Break` means the operator asked
/// to quit.
pub async fn execute(controller: &mut Controller, command: Command) -> ControlFlow<()> {
    match command {
        Command::Run => controller.set_running(true),
        Command::Pause => controller.set_running(false),
        Command::Toggle => {
            let running = controller.toggle_running();
            tracing::info!("Run toggle is now {}", if running { "on" } else { "off" });
        }
        Command::Background(path) => {
            controller.select_background(path);
        }
        Command::Enhance(mode) => {
            let gamma = match controller.enhancement() {
                Enhancement::Gamma { gamma } => gamma,
                Enhancement::None => DEFAULT_GAMMA,
            };
            controller.set_enhancement(Enhancement::from_mode(mode, gamma));
        }
        Command::Gamma(gamma) => controller.set_enhancement(Enhancement::Gamma { gamma }),
        Command::Retry => {
            // failures are already surfaced on the status channel
            let _ = controller.retry_model().await;
        }
        Command::Status => {
            let state = controller.readiness().snapshot();
            tracing::info!(
                "model={:?} camera_ready={} run_requested={} can_run={} enhancement={:?} background={}",
                state.model,
                state.camera_ready,
                state.run_requested,
                state.can_run(),
                controller.enhancement(),
                if controller.background().is_some() { "loaded" } else { "fallback" }
            );
            if let Some(fault) = &state.fault {
                tracing::info!("last fault: {}", fault);
            }
        }
        Command::Quit => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_toggles() {
        assert_eq!("run".parse::<Command>().unwrap(), Command::Run);
        assert_eq!("  PAUSE ".parse::<Command>().unwrap(), Command::Pause);
        assert_eq!("p".parse::<Command>().unwrap(), Command::Toggle);
        assert_eq!("q".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn parses_background_selection() {
        assert_eq!(
            "bg /tmp/beach photo.png".parse::<Command>().unwrap(),
            Command::Background(Some(PathBuf::from("/tmp/beach photo.png")))
        );
        assert_eq!("bg none".parse::<Command>().unwrap(), Command::Background(None));
        assert!("bg".parse::<Command>().is_err());
    }

    #[test]
    fn parses_enhancement() {
        assert_eq!(
            "enhance gamma".parse::<Command>().unwrap(),
            Command::Enhance(EnhancementMode::Gamma)
        );
        assert_eq!("gamma 2.2".parse::<Command>().unwrap(), Command::Gamma(2.2));
        assert!("gamma -1".parse::<Command>().is_err());
        assert!("gamma x".parse::<Command>().is_err());
        assert!("enhance sepia".parse::<Command>().is_err());
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }
}
