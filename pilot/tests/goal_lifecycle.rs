//! Orchestrator lifecycle tests: goals driven end to end on the worker thread.
//!
//! The reasoner and environment are scripted; a gated reasoner blocks each decision
//! until the test releases it, so interruption and amendment land at known points.

use std::fs;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pilot::control::ControlState;
use pilot::core::types::Decision;
use pilot::io::config::PilotConfig;
use pilot::io::prompt::PromptPair;
use pilot::looping::GoalStop;
use pilot::orchestrator::{GoalReport, Orchestrator};
use pilot::test_support::{ScriptedEnvironment, ScriptedReasoner, decision, env_page};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> PilotConfig {
    PilotConfig {
        queue_poll_ms: 10,
        ..PilotConfig::default()
    }
}

fn spawn(
    config: PilotConfig,
    reasoner: ScriptedReasoner,
    environment: ScriptedEnvironment,
) -> (Orchestrator, Receiver<GoalReport>) {
    spawn_with_control(config, reasoner, environment, Arc::new(ControlState::new()))
}

fn spawn_with_control(
    config: PilotConfig,
    reasoner: ScriptedReasoner,
    environment: ScriptedEnvironment,
    control: Arc<ControlState>,
) -> (Orchestrator, Receiver<GoalReport>) {
    let (report_tx, report_rx) = mpsc::channel();
    let orchestrator = Orchestrator::spawn(
        config,
        reasoner,
        environment,
        control,
        None,
        move |report: &GoalReport| {
            report_tx.send(report.clone()).expect("send report");
        },
    )
    .expect("spawn orchestrator");
    (orchestrator, report_rx)
}

fn next_report(reports: &Receiver<GoalReport>) -> GoalReport {
    reports.recv_timeout(WAIT).expect("goal report")
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting");
        thread::sleep(Duration::from_millis(5));
    }
}

fn gated(decisions: Vec<Decision>) -> (ScriptedReasoner, Sender<()>) {
    let (gate_tx, gate_rx) = mpsc::channel();
    (ScriptedReasoner::new(decisions).with_gate(gate_rx), gate_tx)
}

fn last_decision_prompt(prompts: &Arc<Mutex<Vec<PromptPair>>>) -> PromptPair {
    prompts
        .lock()
        .expect("prompts")
        .iter()
        .rev()
        .find(|prompt| prompt.system.contains("send_msg_to_user"))
        .cloned()
        .expect("decision prompt")
}

/// Find-the-price scenario: navigate, then answer. The final message leaves the page
/// unchanged and still counts as success.
#[test]
fn goal_completes_with_final_answer() {
    let reasoner = ScriptedReasoner::new(vec![
        decision("goto('https://shop.test/mug')"),
        decision("send_msg_to_user('The blue mug costs $10')"),
    ]);
    let environment = ScriptedEnvironment::new(vec![
        env_page("https://shop.test/mug", "[13] heading 'Blue mug'\n[14] text '$10'"),
        env_page("https://shop.test/mug", "[13] heading 'Blue mug'\n[14] text '$10'"),
    ]);
    let executed = environment.executed();
    let resets = environment.reset_count();
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator
        .submit("find the price of the blue mug")
        .expect("submit");
    let report = next_report(&reports);

    assert_eq!(report.goal, "find the price of the blue mug");
    assert_eq!(
        report.stop,
        GoalStop::Completed {
            answer: Some("The blue mug costs $10".to_string())
        }
    );
    assert!(report.success());
    assert_eq!(report.steps_executed, 2);
    assert_eq!(
        *executed.lock().expect("executed"),
        [
            "goto('https://shop.test/mug')",
            "send_msg_to_user('The blue mug costs $10')"
        ]
    );
    assert_eq!(*resets.lock().expect("resets"), 1);
    assert!(!orchestrator.is_running());
    orchestrator.shutdown();
}

#[test]
fn page_carries_across_goals_without_reset() {
    let reasoner = ScriptedReasoner::new(vec![
        decision("click('13')"),
        decision("send_msg_to_user('first answer')"),
        decision("send_msg_to_user('second answer')"),
    ]);
    let environment = ScriptedEnvironment::new(vec![
        env_page("https://shop.test/cart", "[20] heading 'Cart'"),
        env_page("https://shop.test/cart", "[20] heading 'Cart'"),
        env_page("https://shop.test/cart", "[20] heading 'Cart'"),
    ]);
    let resets = environment.reset_count();
    let prompts = reasoner.prompts();
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator.submit("open the cart").expect("submit");
    assert!(next_report(&reports).success());
    orchestrator.submit("what is in the cart").expect("submit");
    let second = next_report(&reports);

    assert!(second.success());
    assert_eq!(second.steps_executed, 1);
    assert_eq!(*resets.lock().expect("resets"), 1);
    assert!(
        last_decision_prompt(&prompts)
            .user
            .contains("https://shop.test/cart")
    );
}

#[test]
fn stop_interrupts_running_goal_between_steps() {
    let (reasoner, gate) = gated(vec![decision("scroll(0, 300)"), decision("scroll(0, 300)")]);
    let environment = ScriptedEnvironment::new(vec![
        env_page("https://news.test", "[1] heading 'Top'"),
        env_page("https://news.test", "[2] heading 'Below'"),
    ]);
    let executed = environment.executed();
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator.submit("read the news").expect("submit");
    wait_until(|| orchestrator.is_running());
    orchestrator.stop();
    gate.send(()).expect("release decision");
    let report = next_report(&reports);

    assert_eq!(report.stop, GoalStop::Interrupted);
    assert!(!report.success());
    assert!(report.steps_executed <= 1);
    assert!(executed.lock().expect("executed").len() <= 1);
    orchestrator.shutdown();
}

#[test]
fn amendment_reaches_the_running_goal() {
    let (reasoner, gate) = gated(vec![
        decision("fill('5', 'milk')"),
        decision("send_msg_to_user('Added organic milk')"),
    ]);
    let environment = ScriptedEnvironment::new(vec![
        env_page("https://grocer.test/search?q=milk", "[5] searchbox 'Search'"),
        env_page("https://grocer.test/search?q=milk", "[5] searchbox 'Search'"),
    ]);
    let prompts = reasoner.prompts();
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator.submit("buy milk").expect("submit");
    wait_until(|| orchestrator.is_running());
    orchestrator.amend("only organic").expect("amend");
    gate.send(()).expect("release first decision");
    gate.send(()).expect("release second decision");
    let report = next_report(&reports);

    assert_eq!(report.goal, "buy milk");
    assert!(report.success());
    let final_prompt = last_decision_prompt(&prompts);
    assert!(final_prompt.user.contains("User update: only organic"));
    let intent_revisions = prompts
        .lock()
        .expect("prompts")
        .iter()
        .filter(|prompt| prompt.user.contains("NEW INFORMATION FROM THE USER"))
        .count();
    assert_eq!(intent_revisions, 1);
}

#[test]
fn amendment_while_idle_starts_a_goal() {
    let reasoner = ScriptedReasoner::new(vec![decision("send_msg_to_user('Milk is $2')")]);
    let environment =
        ScriptedEnvironment::new(vec![env_page("https://grocer.test", "[1] heading 'Home'")]);
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator.amend("price of milk").expect("amend");
    let report = next_report(&reports);

    assert_eq!(report.goal, "price of milk");
    assert!(report.success());
}

/// A new goal submitted after `stop()` supersedes the running one; the stop flag does
/// not leak into the new goal.
#[test]
fn new_goal_supersedes_interrupted_goal() {
    let (reasoner, gate) = gated(vec![
        decision("send_msg_to_user('answer')"),
        decision("send_msg_to_user('answer')"),
    ]);
    let environment = ScriptedEnvironment::new(vec![
        env_page("https://a.test", "[1] heading 'A'"),
        env_page("https://a.test", "[1] heading 'A'"),
    ]);
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator.submit("goal a").expect("submit");
    wait_until(|| orchestrator.is_running());
    orchestrator.stop();
    orchestrator.submit("goal b").expect("submit");
    gate.send(()).expect("release");
    gate.send(()).expect("release");

    let first = next_report(&reports);
    let second = next_report(&reports);
    assert_eq!(first.goal, "goal a");
    assert_eq!(first.stop, GoalStop::Interrupted);
    assert_eq!(second.goal, "goal b");
    assert_eq!(
        second.stop,
        GoalStop::Completed {
            answer: Some("answer".to_string())
        }
    );
}

#[test]
fn failed_initial_reset_ends_goal_as_environment_fatal() {
    let reasoner = ScriptedReasoner::new(Vec::new());
    let environment = ScriptedEnvironment::new(Vec::new())
        .with_resets(vec![Err("browser did not start".to_string())]);
    let (orchestrator, reports) = spawn(fast_config(), reasoner, environment);

    orchestrator.submit("anything").expect("submit");
    let report = next_report(&reports);

    assert_eq!(report.steps_executed, 0);
    let GoalStop::EnvironmentFatal { reason } = &report.stop else {
        panic!("expected environment fatal, got {:?}", report.stop);
    };
    assert!(reason.contains("browser did not start"));
}

#[test]
fn shutdown_interrupts_running_goal_and_joins_worker() {
    let (reasoner, gate) = gated(vec![decision("scroll(0, 300)")]);
    let environment =
        ScriptedEnvironment::new(vec![env_page("https://news.test", "[1] heading 'Top'")]);
    let control = Arc::new(ControlState::new());
    let (orchestrator, reports) =
        spawn_with_control(fast_config(), reasoner, environment, Arc::clone(&control));

    orchestrator.submit("read the news").expect("submit");
    wait_until(|| orchestrator.is_running());
    let closer = thread::spawn(move || orchestrator.shutdown());
    wait_until(|| control.stop_requested());
    gate.send(()).expect("release");
    closer.join().expect("shutdown");

    let report = reports.try_recv().expect("report delivered before join");
    assert_eq!(report.stop, GoalStop::Interrupted);
}

#[test]
fn trajectory_is_written_per_goal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = PilotConfig {
        trajectory_dir: Some(temp.path().to_path_buf()),
        ..fast_config()
    };
    let reasoner = ScriptedReasoner::new(vec![
        decision("click('13')"),
        decision("send_msg_to_user('$10')"),
    ]);
    let environment = ScriptedEnvironment::new(vec![
        env_page("https://shop.test/mug", "[14] text '$10'"),
        env_page("https://shop.test/mug", "[14] text '$10'"),
    ]);
    let (orchestrator, reports) = spawn(config, reasoner, environment);

    orchestrator.submit("find the price").expect("submit");
    let report = next_report(&reports);

    let goal_dir = temp.path().join(&report.goal_id);
    let events = fs::read_to_string(goal_dir.join("events.jsonl")).expect("events");
    // initial page, then action + observation per step, then the agent message
    assert_eq!(events.lines().count(), 6);
    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(goal_dir.join("meta.json")).expect("meta"))
            .expect("meta json");
    assert_eq!(meta["goal"], "find the price");
    assert_eq!(meta["success"], true);
    assert_eq!(meta["stop"]["state"], "completed");
    assert_eq!(meta["steps"], 2);
}
