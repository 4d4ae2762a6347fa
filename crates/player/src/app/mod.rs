mod bootstrap;
mod cli;
mod commands;

use std::io;
use std::process::ExitCode;

use engine::{DataRootError, EpisodeLoadError, PlaybackError, RecordParseError, SessionError};
use thiserror::Error;
use tracing::error;

use cli::{CliInvocation, CommandKind};
use commands::CommandStatus;

const EXIT_TASK_NOT_SATISFIED: u8 = 2;

#[derive(Debug, Error)]
pub(crate) enum PlayerError {
    #[error(transparent)]
    DataRoot(#[from] DataRootError),
    #[error(transparent)]
    Episode(#[from] EpisodeLoadError),
    #[error(transparent)]
    Replay(#[from] RecordParseError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid playback configuration: {0}")]
    Playback(#[from] PlaybackError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    #[error("failed to encode summary: {0}")]
    Encode(#[from] serde_json::Error),
}

pub(crate) fn run(args: &[String]) -> ExitCode {
    let invocation = match cli::parse_args(args) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(1);
        }
    };
    if invocation.command == CommandKind::Help {
        println!("{}", cli::usage_text());
        return ExitCode::SUCCESS;
    }

    bootstrap::init_tracing();
    match dispatch(&invocation) {
        Ok(CommandStatus::Success) => ExitCode::SUCCESS,
        Ok(CommandStatus::TaskNotSatisfied) => ExitCode::from(EXIT_TASK_NOT_SATISFIED),
        Err(err) => {
            error!(error = %err, "command_failed");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(invocation: &CliInvocation) -> Result<CommandStatus, PlayerError> {
    let config = bootstrap::resolve_config(&invocation.options)?;
    let mut stdout = io::stdout();
    match &invocation.command {
        CommandKind::Help => Ok(CommandStatus::Success),
        CommandKind::Play { episode, replay } => {
            commands::play(&config, episode, replay, &mut stdout)
        }
        CommandKind::Validate { episode, replay } => {
            commands::validate(&config, episode, replay, &mut stdout)
        }
        CommandKind::Inspect { replay, json } => {
            commands::inspect(&config, replay, *json, &mut stdout)
        }
        CommandKind::Record { episode, output } => {
            commands::record(&config, episode, output, &mut io::stdin().lock(), &mut stdout)
        }
    }
}
