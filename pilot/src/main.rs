//! Goal-driven browser agent pilot.
//!
//! Runs goals against a browser bridge and a reasoning service, both configured as
//! child-process commands in `pilot.toml`. Goals come from the command line or,
//! interactively, from stdin.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use pilot::control::ControlState;
use pilot::core::action::{Action, parse_action, validate_action};
use pilot::exit_codes;
use pilot::io::config::{CONFIG_FILE, PilotConfig, load_config, write_config};
use pilot::io::environment::BridgeEnvironment;
use pilot::io::reasoner::CommandReasoner;
use pilot::io::speech::{ConsoleVoice, Speech, SpeechOutput};
use pilot::logging;
use pilot::looping::GoalStop;
use pilot::orchestrator::{GoalReport, Orchestrator};

#[derive(Parser)]
#[command(name = "pilot", version, about = "Goal-driven browser agent pilot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `pilot.toml` if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a goal, or read goals and commands from stdin when none is given.
    Run {
        /// Config file to load. Defaults apply when it does not exist.
        #[arg(short, long, default_value = CONFIG_FILE)]
        config: PathBuf,
        /// Narrate explanations and answers on stdout.
        #[arg(long)]
        narrate: bool,
        goal: Option<String>,
    },
    /// Validate one action statement and print the repaired code.
    CheckAction { code: String },
}

/// One line of interactive input.
#[derive(Debug, PartialEq, Eq)]
enum LineCommand {
    Goal(String),
    Amend(String),
    Stop,
    Mute,
    Unmute,
    Quit,
    Unknown(String),
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(Path::new(CONFIG_FILE), force),
        Command::Run {
            config,
            narrate,
            goal,
        } => cmd_run(&config, narrate, goal.as_deref()),
        Command::CheckAction { code } => Ok(cmd_check_action(&code)),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &PilotConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, narrate: bool, goal: Option<&str>) -> Result<i32> {
    let config = load_config(config_path)?;
    let reasoner = CommandReasoner::new(config.reasoner.clone())?;
    let environment = BridgeEnvironment::new(config.environment.clone());
    let control = Arc::new(ControlState::new());
    let speech: Option<Arc<dyn Speech>> = if narrate {
        Some(Arc::new(SpeechOutput::new(ConsoleVoice, Arc::clone(&control))))
    } else {
        None
    };

    let (report_tx, report_rx) = mpsc::channel();
    let orchestrator = Orchestrator::spawn(
        config,
        reasoner,
        environment,
        control,
        speech,
        move |report: &GoalReport| {
            println!("{}", describe_report(report));
            if report_tx.send(report.clone()).is_err() {
                debug!("report receiver dropped");
            }
        },
    )?;

    if let Some(goal) = goal {
        orchestrator.submit(goal)?;
        let report = report_rx
            .recv()
            .context("worker exited before reporting the goal")?;
        orchestrator.shutdown();
        return Ok(exit_code(std::iter::once(&report)));
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        let Some(command) = parse_line(&line) else {
            continue;
        };
        match command {
            LineCommand::Goal(goal) => {
                if orchestrator.is_running() {
                    orchestrator.stop();
                }
                orchestrator.submit(&goal)?;
            }
            LineCommand::Amend(note) => orchestrator.amend(&note)?,
            LineCommand::Stop => orchestrator.stop(),
            LineCommand::Mute => orchestrator.mute(),
            LineCommand::Unmute => orchestrator.unmute(),
            LineCommand::Quit => break,
            LineCommand::Unknown(word) => {
                eprintln!("unknown command /{word} (try /amend, /stop, /mute, /unmute, /quit)");
            }
        }
    }
    orchestrator.shutdown();
    let reports: Vec<GoalReport> = report_rx.try_iter().collect();
    Ok(exit_code(reports.iter()))
}

fn cmd_check_action(code: &str) -> i32 {
    let checked = validate_action(code);
    for repair in &checked.repairs {
        println!("repair: {}", repair.describe());
    }
    println!("{}", checked.code);
    match parse_action(&checked.code) {
        Action::Unknown => {
            eprintln!("not a recognised action");
            exit_codes::ACTION_REJECTED
        }
        action => {
            println!("{action:?}");
            exit_codes::OK
        }
    }
}

fn parse_line(line: &str) -> Option<LineCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(LineCommand::Goal(line.to_string()));
    };
    let (word, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim();
    let command = match word {
        "amend" if !arg.is_empty() => LineCommand::Amend(arg.to_string()),
        "stop" => LineCommand::Stop,
        "mute" => LineCommand::Mute,
        "unmute" => LineCommand::Unmute,
        "quit" | "exit" => LineCommand::Quit,
        _ => LineCommand::Unknown(word.to_string()),
    };
    Some(command)
}

fn describe_report(report: &GoalReport) -> String {
    let status = if report.success() { "done" } else { "failed" };
    let mut line = format!(
        "{status}: {} ({}, {} step(s))",
        report.goal,
        report.stop.label(),
        report.steps_executed
    );
    match &report.stop {
        GoalStop::Completed {
            answer: Some(answer),
        } => line.push_str(&format!("\nanswer: {answer}")),
        GoalStop::EnvironmentFatal { reason } | GoalStop::Fatal { reason } => {
            line.push_str(&format!("\nreason: {reason}"));
        }
        _ => {}
    }
    line
}

fn exit_code<'a>(mut reports: impl Iterator<Item = &'a GoalReport>) -> i32 {
    if reports.all(GoalReport::success) {
        exit_codes::OK
    } else {
        exit_codes::GOAL_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(stop: GoalStop) -> GoalReport {
        GoalReport {
            goal_id: "20260301T090000000Z-0001".to_string(),
            goal: "find the price".to_string(),
            steps_executed: 2,
            stop,
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["pilot", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_defaults_to_interactive() {
        let cli = Cli::parse_from(["pilot", "run"]);
        let Command::Run {
            config,
            narrate,
            goal,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(config, PathBuf::from(CONFIG_FILE));
        assert!(!narrate);
        assert_eq!(goal, None);
    }

    #[test]
    fn parse_run_with_goal() {
        let cli = Cli::parse_from([
            "pilot",
            "run",
            "--config",
            "other.toml",
            "--narrate",
            "find the price",
        ]);
        let Command::Run {
            config,
            narrate,
            goal,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(config, PathBuf::from("other.toml"));
        assert!(narrate);
        assert_eq!(goal.as_deref(), Some("find the price"));
    }

    #[test]
    fn parse_check_action() {
        let cli = Cli::parse_from(["pilot", "check-action", "click(13)"]);
        assert!(matches!(cli.command, Command::CheckAction { code } if code == "click(13)"));
    }

    #[test]
    fn interactive_lines() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(
            parse_line("buy milk"),
            Some(LineCommand::Goal("buy milk".to_string()))
        );
        assert_eq!(
            parse_line("/amend  only organic "),
            Some(LineCommand::Amend("only organic".to_string()))
        );
        assert_eq!(parse_line("/amend"), Some(LineCommand::Unknown("amend".to_string())));
        assert_eq!(parse_line("/stop"), Some(LineCommand::Stop));
        assert_eq!(parse_line("/mute"), Some(LineCommand::Mute));
        assert_eq!(parse_line("/unmute"), Some(LineCommand::Unmute));
        assert_eq!(parse_line("/quit"), Some(LineCommand::Quit));
        assert_eq!(parse_line("/dance"), Some(LineCommand::Unknown("dance".to_string())));
    }

    #[test]
    fn check_action_exit_codes() {
        assert_eq!(cmd_check_action("click(13)"), exit_codes::OK);
        assert_eq!(cmd_check_action("hover('13')"), exit_codes::ACTION_REJECTED);
    }

    #[test]
    fn init_writes_default_config_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);

        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert_eq!(load_config(&path).expect("load"), PilotConfig::default());

        std::fs::write(&path, "max_steps = 7\n").expect("write");
        cmd_init(&path, false).expect("init");
        assert_eq!(load_config(&path).expect("load").max_steps, 7);

        cmd_init(&path, true).expect("init");
        assert_eq!(load_config(&path).expect("load").max_steps, 50);
    }

    #[test]
    fn reports_describe_answer_and_exit_code() {
        let done = report(GoalStop::Completed {
            answer: Some("$10".to_string()),
        });
        let failed = report(GoalStop::MaxStepsReached { max_steps: 2 });

        assert!(describe_report(&done).ends_with("answer: $10"));
        assert!(describe_report(&failed).starts_with("failed: find the price"));
        assert_eq!(exit_code([&done].into_iter()), exit_codes::OK);
        assert_eq!(exit_code([&done, &failed].into_iter()), exit_codes::GOAL_FAILED);
        assert_eq!(exit_code(std::iter::empty()), exit_codes::OK);
    }
}
