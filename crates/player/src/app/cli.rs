use std::path::PathBuf;

use engine::DEFAULT_INVENTORY_SLOTS;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CliOptions {
    pub(crate) speed: Option<f64>,
    pub(crate) episode_index: usize,
    pub(crate) data_root: Option<PathBuf>,
    pub(crate) inventory_slots: usize,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            speed: None,
            episode_index: 0,
            data_root: None,
            inventory_slots: DEFAULT_INVENTORY_SLOTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Help,
    Play { episode: PathBuf, replay: PathBuf },
    Validate { episode: PathBuf, replay: PathBuf },
    Record { episode: PathBuf, output: PathBuf },
    Inspect { replay: PathBuf, json: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CliInvocation {
    pub(crate) options: CliOptions,
    pub(crate) command: CommandKind,
}

pub(crate) fn parse_args(args: &[String]) -> Result<CliInvocation, String> {
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        return Ok(CliInvocation {
            options: CliOptions::default(),
            command: CommandKind::Help,
        });
    }

    let mut options = CliOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--speed" => {
                let value = option_value(args, index, "--speed")?;
                options.speed = Some(
                    value
                        .parse::<f64>()
                        .map_err(|_| format!("invalid --speed value '{value}' (expected f64)"))?,
                );
                index += 2;
            }
            "--episode-index" => {
                let value = option_value(args, index, "--episode-index")?;
                options.episode_index = value.parse::<usize>().map_err(|_| {
                    format!("invalid --episode-index value '{value}' (expected usize)")
                })?;
                index += 2;
            }
            "--data-root" => {
                let value = option_value(args, index, "--data-root")?;
                options.data_root = Some(PathBuf::from(value));
                index += 2;
            }
            "--inventory-slots" => {
                let value = option_value(args, index, "--inventory-slots")?;
                options.inventory_slots = value.parse::<usize>().map_err(|_| {
                    format!("invalid --inventory-slots value '{value}' (expected usize)")
                })?;
                index += 2;
            }
            _ => break,
        }
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let command = match command {
        "play" | "validate" => {
            let [episode, replay] = command_args else {
                return Err(format!("{command} requires <episode.json> <replay.csv>"));
            };
            let episode = PathBuf::from(episode);
            let replay = PathBuf::from(replay);
            if command == "play" {
                CommandKind::Play { episode, replay }
            } else {
                CommandKind::Validate { episode, replay }
            }
        }
        "record" => {
            let [episode, output] = command_args else {
                return Err("record requires <episode.json> <out.csv>".to_string());
            };
            CommandKind::Record {
                episode: PathBuf::from(episode),
                output: PathBuf::from(output),
            }
        }
        "inspect" => {
            let Some((replay, rest)) = command_args.split_first() else {
                return Err("inspect requires <replay.csv>".to_string());
            };
            let mut json = false;
            for arg in rest {
                if arg == "--json" {
                    json = true;
                } else {
                    return Err(format!("unknown inspect argument '{arg}' (expected --json)"));
                }
            }
            CommandKind::Inspect {
                replay: PathBuf::from(replay),
                json,
            }
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    Ok(CliInvocation { options, command })
}

fn option_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag}"))
}

pub(crate) fn usage_text() -> String {
    [
        "flythrough - replay recorded task sessions and check task success",
        "",
        "Usage:",
        "  flythrough [options] play <episode.json> <replay.csv>",
        "  flythrough [options] validate <episode.json> <replay.csv>",
        "  flythrough [options] inspect <replay.csv> [--json]",
        "  flythrough [options] record <episode.json> <out.csv>",
        "",
        "Options:",
        "  --speed <f64>            playback speed multiplier (default 1.0, env FLYTHROUGH_SPEED)",
        "  --episode-index <usize>  episode to load from the task file (default 0)",
        "  --data-root <dir>        base for relative paths (env FLYTHROUGH_DATA_ROOT, default cwd)",
        "  --inventory-slots <usize> inventory size (default 1)",
        "",
        "While playing, type q and Enter to stop the replay.",
        "validate exits with 2 when the task is not satisfied.",
        "record reads one action name per line from stdin (also: reset, step [seconds], q).",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_options_before_subcommand() {
        let invocation = parse_args(&args(&[
            "--speed",
            "2.5",
            "--episode-index",
            "3",
            "--data-root",
            "/srv/data",
            "validate",
            "tasks/task.json",
            "replays/run.csv",
        ]))
        .expect("parse");

        assert_eq!(invocation.options.speed, Some(2.5));
        assert_eq!(invocation.options.episode_index, 3);
        assert_eq!(invocation.options.data_root, Some(PathBuf::from("/srv/data")));
        assert_eq!(invocation.options.inventory_slots, DEFAULT_INVENTORY_SLOTS);
        assert_eq!(
            invocation.command,
            CommandKind::Validate {
                episode: PathBuf::from("tasks/task.json"),
                replay: PathBuf::from("replays/run.csv"),
            }
        );
    }

    #[test]
    fn inspect_accepts_json_flag() {
        let invocation = parse_args(&args(&["inspect", "run.csv", "--json"])).expect("parse");
        assert_eq!(
            invocation.command,
            CommandKind::Inspect {
                replay: PathBuf::from("run.csv"),
                json: true,
            }
        );
    }

    #[test]
    fn rejects_bad_values_and_arity() {
        assert_eq!(
            parse_args(&args(&["--speed", "fast", "play", "a", "b"])),
            Err("invalid --speed value 'fast' (expected f64)".to_string())
        );
        assert_eq!(
            parse_args(&args(&["play", "only-one"])),
            Err("play requires <episode.json> <replay.csv>".to_string())
        );
        assert_eq!(
            parse_args(&args(&["--inventory-slots"])),
            Err("missing value for --inventory-slots".to_string())
        );
        assert_eq!(
            parse_args(&args(&["rewind"])),
            Err("unknown subcommand 'rewind'".to_string())
        );
    }

    #[test]
    fn record_takes_episode_and_output() {
        let invocation =
            parse_args(&args(&["record", "task.json", "out/run.csv"])).expect("parse");
        assert_eq!(
            invocation.command,
            CommandKind::Record {
                episode: PathBuf::from("task.json"),
                output: PathBuf::from("out/run.csv"),
            }
        );
        assert_eq!(
            parse_args(&args(&["record", "task.json"])),
            Err("record requires <episode.json> <out.csv>".to_string())
        );
    }

    #[test]
    fn help_flag_short_circuits() {
        let invocation = parse_args(&args(&["--help"])).expect("parse");
        assert_eq!(invocation.command, CommandKind::Help);
    }
}
