//! End-to-end tests driving the hooks against a project in a temp dir.
//!
//! Each test builds `.stepguard/` state with the shared builders, then runs
//! the same handlers the CLI dispatches to and inspects the saved documents.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use fs2::FileExt;
use serde_json::{Value, json};

use stepguard::core::types::{Action, GateName, GateStatus, ProjectStatus, Step};
use stepguard::exit_codes;
use stepguard::io::config::StepguardConfig;
use stepguard::post_tool_use::handle_post_tool_use;
use stepguard::pre_tool_use::handle_pre_tool_use;
use stepguard::state::{PhasePlan, metrics};
use stepguard::stop::handle_stop;
use stepguard::test_support::{TestProject, fixed_now, post_event, pre_event, stop_event};

fn config() -> StepguardConfig {
    StepguardConfig::default()
}

/// Run one tool call through PreToolUse and, if allowed, PostToolUse.
fn run_tool(project: &TestProject, tool: &str, input: Value, response: Value) {
    let decision = handle_pre_tool_use(
        project.paths(),
        &config(),
        &pre_event(tool, input.clone()),
        fixed_now(),
    );
    assert!(decision.is_allowed(), "{tool} blocked: {}", decision.reason);
    let post = handle_post_tool_use(
        project.paths(),
        &config(),
        &post_event(tool, input, response),
        fixed_now(),
    );
    assert!(post.applied, "{tool} not recorded: {}", post.reason);
}

#[test]
fn writes_are_blocked_while_planning() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Plan).expect("activate");

    let response = handle_pre_tool_use(
        project.paths(),
        &config(),
        &pre_event("write_file", json!({"path": "src/main.rs", "content": "fn main() {}"})),
        fixed_now(),
    );
    assert_eq!(response.action, Action::Block);
    assert!(response.reason.contains("step 1 is read-only"), "{}", response.reason);
}

#[test]
fn writes_are_allowed_while_implementing() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Implement).expect("activate");

    let response = handle_pre_tool_use(
        project.paths(),
        &config(),
        &pre_event("write_file", json!({"path": "src/main.rs", "content": "fn main() {}"})),
        fixed_now(),
    );
    assert_eq!(response.action, Action::Allow);
}

#[test]
fn stop_advances_from_validate_once_compile_and_test_pass() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Validate).expect("activate");
    run_tool(
        &project,
        "Bash",
        json!({"command": "cargo build && cargo test"}),
        json!({"exit_code": 0, "stdout": "test result: ok. 12 passed; 0 failed"}),
    );

    let response = handle_stop(project.paths(), &config(), &stop_event(), fixed_now());
    assert!(response.advanced, "{}", response.reason);
    assert_eq!(response.new_step, Some(4));

    let states = project.load().expect("load");
    assert_eq!(states.workflow.current_step, Step::Review);
    let validate = &states.workflow.step_history[0];
    assert_eq!(validate.gates_passed, vec![GateName::Compile, GateName::Test]);
}

#[test]
fn stop_holds_review_until_the_review_gate_passes() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Review).expect("activate");

    let response = handle_stop(project.paths(), &config(), &stop_event(), fixed_now());
    assert!(!response.advanced);
    assert!(response.reason.contains("review gate pending"), "{}", response.reason);
    assert_eq!(project.load().expect("load").workflow.current_step, Step::Review);
}

#[test]
fn emergency_override_allows_a_blocked_call_and_costs_compliance() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Plan).expect("activate");

    let response = handle_pre_tool_use(
        project.paths(),
        &config(),
        &pre_event(
            "write_file",
            json!({"path": "hotfix.txt", "content": "EMERGENCY_OVERRIDE: prod is down"}),
        ),
        fixed_now(),
    );
    assert_eq!(response.action, Action::Allow);
    assert!(response.override_used);

    let states = project.load().expect("load");
    assert_eq!(states.project.metric(metrics::COMPLIANCE_SCORE), 90.0);
    assert_eq!(states.project.metric(metrics::OVERRIDES_USED), 1.0);
    assert_eq!(states.workflow.overrides.len(), 1);
    assert_eq!(states.workflow.overrides[0].tool_name.as_deref(), Some("write_file"));
}

#[test]
fn corrupt_state_is_replaced_by_defaults() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Review).expect("activate");
    fs::write(&project.paths().project_path, "{\"status\": ").expect("corrupt");
    fs::write(&project.paths().workflow_path, "not json at all").expect("corrupt");

    let response = handle_pre_tool_use(
        project.paths(),
        &config(),
        &pre_event("write_file", json!({"path": "src/main.rs"})),
        fixed_now(),
    );
    // The fresh project is in setup, so nothing is enforced yet.
    assert!(response.is_allowed());

    let states = project.load().expect("load");
    assert_eq!(states.project.status, ProjectStatus::Setup);
    assert_eq!(states.workflow.current_step, Step::Plan);

    let backups = fs::read_dir(&project.paths().state_dir)
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
        .count();
    assert_eq!(backups, 2);
}

#[test]
fn a_full_objective_cycle_completes_the_project() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Plan).expect("activate");
    let stop = || handle_stop(project.paths(), &config(), &stop_event(), fixed_now());

    assert_eq!(stop().new_step, Some(2));

    run_tool(
        &project,
        "write_file",
        json!({"path": "src/lib.rs", "content": "pub fn answer() -> u32 { 42 }"}),
        json!({"success": true}),
    );
    run_tool(
        &project,
        "Bash",
        json!({"command": "cargo build"}),
        json!({"exit_code": 0}),
    );
    assert_eq!(stop().new_step, Some(3));

    run_tool(
        &project,
        "Bash",
        json!({"command": "cargo test"}),
        json!({"exit_code": 0, "stdout": "TOTAL 120 12 90%"}),
    );
    assert_eq!(stop().new_step, Some(4));

    run_tool(
        &project,
        "Task",
        json!({"prompt": "review src/lib.rs", "subagent_type": "code-reviewer"}),
        json!({"success": true}),
    );
    assert_eq!(stop().new_step, Some(5));
    assert_eq!(stop().new_step, Some(6));

    run_tool(
        &project,
        "Bash",
        json!({"command": "git push origin main"}),
        json!({"exit_code": 0}),
    );
    let finished = stop();
    assert!(finished.advanced, "{}", finished.reason);
    assert_eq!(finished.status.as_deref(), Some("stopped"));
    assert_eq!(finished.new_step, None);
    assert_eq!(finished.compliance_score, Some(100.0));

    let states = project.load().expect("load");
    assert_eq!(states.project.status, ProjectStatus::Stopped);
    assert_eq!(states.project.completed_phases, vec!["phase-1".to_string()]);
    assert!(states.workflow.touched_files.is_empty());
    assert!(states.workflow.step_history.iter().all(|record| !record.is_open()));
    let test_evidence = states
        .workflow
        .step_history
        .iter()
        .find(|record| record.step == Step::Validate)
        .map(|record| record.gates_passed.clone());
    assert_eq!(test_evidence, Some(vec![GateName::Compile, GateName::Test]));
}

#[test]
fn edits_after_validation_reset_compile_and_test() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Refine).expect("activate");
    run_tool(
        &project,
        "Bash",
        json!({"command": "cargo test"}),
        json!({"exit_code": 0}),
    );
    run_tool(
        &project,
        "Bash",
        json!({"command": "cargo build"}),
        json!({"exit_code": 0}),
    );
    run_tool(
        &project,
        "Edit",
        json!({"file_path": "src/lib.rs", "old_string": "42", "new_string": "43"}),
        json!({"success": true}),
    );

    let states = project.load().expect("load");
    assert_eq!(states.workflow.gate(GateName::Compile).status, GateStatus::Pending);
    assert_eq!(states.workflow.gate(GateName::Test).status, GateStatus::Pending);
    assert!(states.workflow.touched_files.contains("src/lib.rs"));

    let response = handle_stop(project.paths(), &config(), &stop_event(), fixed_now());
    assert!(!response.advanced);
    assert_eq!(response.outstanding.len(), 2);
}

#[test]
fn rebuilding_after_an_edit_passes_compile_again() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Implement).expect("activate");
    let build = || {
        run_tool(
            &project,
            "Bash",
            json!({"command": "cargo build"}),
            json!({"exit_code": 0}),
        );
    };

    build();
    run_tool(
        &project,
        "Edit",
        json!({"file_path": "src/lib.rs", "old_string": "42", "new_string": "43"}),
        json!({"success": true}),
    );
    assert_eq!(
        project.load().expect("load").workflow.gate(GateName::Compile).status,
        GateStatus::Pending
    );

    build();
    assert_eq!(
        project.load().expect("load").workflow.gate(GateName::Compile).status,
        GateStatus::Passed
    );
    let response = handle_stop(project.paths(), &config(), &stop_event(), fixed_now());
    assert_eq!(response.new_step, Some(3), "{}", response.reason);
}

#[test]
fn stop_override_can_arrive_in_tool_input() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Review).expect("activate");
    let mut event = stop_event();
    event["tool_input"] = json!({"reason": "EMERGENCY_OVERRIDE: reviewer unavailable"});

    let response = handle_stop(project.paths(), &config(), &event, fixed_now());
    assert!(response.advanced, "{}", response.reason);
    assert_eq!(response.new_step, Some(5));

    let states = project.load().expect("load");
    assert_eq!(states.workflow.overrides.len(), 1);
    assert_eq!(states.workflow.overrides[0].gates, vec![GateName::Review]);
    assert!(states.workflow.gate(GateName::Review).waived);
}

#[test]
fn finishing_a_phase_starts_the_next_planned_one() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Integrate).expect("activate");
    project
        .update(|states| {
            states.project.phase_plan = vec![
                PhasePlan {
                    id: "phase-1".to_string(),
                    objectives: vec!["objective-1".to_string()],
                },
                PhasePlan {
                    id: "phase-2".to_string(),
                    objectives: vec!["billing".to_string(), "reports".to_string()],
                },
            ];
            let gates = [
                GateName::Compile,
                GateName::Test,
                GateName::Review,
                GateName::Integration,
            ];
            for gate in gates {
                states
                    .workflow
                    .set_gate(gate, GateStatus::Passed, None, fixed_now());
            }
        })
        .expect("plan");

    let response = handle_stop(project.paths(), &config(), &stop_event(), fixed_now());
    assert!(response.advanced, "{}", response.reason);
    assert_eq!(response.new_phase.as_deref(), Some("phase-2"));
    assert_eq!(response.new_step, Some(1));
    assert_eq!(response.status.as_deref(), Some("active"));

    let states = project.load().expect("load");
    assert_eq!(states.project.current_phase, "phase-2");
    assert_eq!(states.workflow.current_objective, "billing");
    assert_eq!(states.workflow.gate(GateName::Compile).status, GateStatus::Pending);
}

#[test]
fn corrupt_workflow_restarts_on_the_planned_objective() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Review).expect("activate");
    project
        .update(|states| {
            states.project.phase_plan = vec![PhasePlan {
                id: "phase-1".to_string(),
                objectives: vec!["auth".to_string(), "billing".to_string()],
            }];
        })
        .expect("plan");
    fs::write(&project.paths().workflow_path, "{\"current_step\": 9").expect("corrupt");

    let response = handle_stop(project.paths(), &config(), &stop_event(), fixed_now());
    assert!(response.advanced, "{}", response.reason);

    let states = project.load().expect("load");
    assert_eq!(states.workflow.current_objective, "auth");
    assert_eq!(states.workflow.current_step, Step::Implement);
    assert_eq!(states.project.current_phase, "phase-1");
    assert!(states.project.completed_phases.is_empty());
}

#[test]
fn wrapped_shell_writes_are_blocked_while_planning() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Plan).expect("activate");

    for command in [
        "env rm -rf src",
        "FOO=1 env -i mv src/lib.rs /tmp/lib.rs",
        "git ls-files | xargs rm",
        "git branch -D main",
        "git remote add fork git@example.com:me/repo.git",
        "sort -o src/lib.rs src/lib.rs",
    ] {
        let response = handle_pre_tool_use(
            project.paths(),
            &config(),
            &pre_event("Bash", json!({ "command": command })),
            fixed_now(),
        );
        assert_eq!(response.action, Action::Block, "{command}: {}", response.reason);
    }

    let listing = handle_pre_tool_use(
        project.paths(),
        &config(),
        &pre_event("Bash", json!({"command": "git branch -a && git remote -v"})),
        fixed_now(),
    );
    assert!(listing.is_allowed(), "{}", listing.reason);
}

#[test]
fn identical_post_events_apply_once() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Implement).expect("activate");
    let mut event = post_event(
        "write_file",
        json!({"path": "notes.txt", "content": "hello"}),
        json!({"success": true}),
    );
    event["tool_use_id"] = json!("toolu_01");

    let first = handle_post_tool_use(project.paths(), &config(), &event, fixed_now());
    let after_first = project.load().expect("load");
    let second = handle_post_tool_use(project.paths(), &config(), &event, fixed_now());
    let after_second = project.load().expect("load");

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(second.reason, "event already recorded");
    assert_eq!(after_first, after_second);
}

#[test]
fn lock_contention_blocks_pre_and_skips_post_and_stop() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Validate).expect("activate");
    let config = StepguardConfig {
        lock_timeout_ms: 50,
        ..StepguardConfig::default()
    };

    let holder = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&project.paths().lock_path)
        .expect("open lock");
    FileExt::lock_exclusive(&holder).expect("hold lock");

    let pre = handle_pre_tool_use(
        project.paths(),
        &config,
        &pre_event("Read", json!({"file_path": "src/lib.rs"})),
        fixed_now(),
    );
    assert_eq!(pre.action, Action::Block);

    let post = handle_post_tool_use(
        project.paths(),
        &config,
        &post_event("Bash", json!({"command": "cargo test"}), json!({"exit_code": 0})),
        fixed_now(),
    );
    assert!(!post.applied);

    let stop = handle_stop(project.paths(), &config, &stop_event(), fixed_now());
    assert!(!stop.advanced);

    FileExt::unlock(&holder).expect("unlock");
    let states = project.load().expect("load");
    assert_eq!(states.workflow.gate(GateName::Test).status, GateStatus::Pending);
    assert_eq!(states.project.metric(metrics::TOOL_ATTEMPTS), 0.0);
}

#[test]
fn concurrent_hooks_do_not_lose_updates() {
    let project = Arc::new(TestProject::new().expect("project"));
    project.activate_at(Step::Implement).expect("activate");

    let handles: Vec<_> = (0..8)
        .map(|index| {
            let project = Arc::clone(&project);
            thread::spawn(move || {
                let response = handle_pre_tool_use(
                    project.paths(),
                    &StepguardConfig::default(),
                    &pre_event("Read", json!({"file_path": format!("src/file_{index}.rs")})),
                    fixed_now(),
                );
                assert!(response.is_allowed(), "{}", response.reason);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    let states = project.load().expect("load");
    assert_eq!(states.project.metric(metrics::TOOL_ATTEMPTS), 8.0);
}

#[test]
fn cli_exits_with_block_code_and_echoes_reason() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Plan).expect("activate");
    let event = pre_event("write_file", json!({"path": "src/main.rs"}));

    let mut child = Command::new(env!("CARGO_BIN_EXE_stepguard"))
        .arg("--root")
        .arg(project.root())
        .args(["hook", "pre-tool-use"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn stepguard");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(event.to_string().as_bytes())
        .expect("write event");
    let output = child.wait_with_output().expect("wait");

    assert_eq!(output.status.code(), Some(exit_codes::BLOCK));
    let body: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(body["action"], "BLOCK");
    assert!(String::from_utf8_lossy(&output.stderr).contains("step 1 is read-only"));
}

#[test]
fn cli_validate_reports_corrupt_state() {
    let project = TestProject::new().expect("project");
    project.activate_at(Step::Plan).expect("activate");
    fs::write(&project.paths().project_path, "[]").expect("corrupt");

    let status = Command::new(env!("CARGO_BIN_EXE_stepguard"))
        .arg("--root")
        .arg(project.root())
        .arg("validate")
        .stderr(Stdio::null())
        .status()
        .expect("stepguard validate");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
