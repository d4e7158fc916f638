use super::*;
use crate::config::{DynamicFieldPolicy, FlowEngineConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn engine_with(config: FlowEngineConfig) -> (FlowEngine, Arc<TranscriptSink>) {
    let sink = Arc::new(TranscriptSink::new());
    let engine = FlowEngine::new(config).with_sink(sink.clone());
    (engine, sink)
}

fn engine() -> (FlowEngine, Arc<TranscriptSink>) {
    engine_with(FlowEngineConfig::default())
}

/// Flow whose completion records the answers it saw and succeeds
fn recording_flow(
    questions: Vec<Question>,
    first: &str,
) -> (FlowDefinition, Arc<Mutex<Vec<Answers>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut flow = FlowDefinition::new("test", "Test flow", first, move |answers: Answers| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(answers);
            Ok(FlowResult::success("done"))
        }
    });
    for q in questions {
        flow = flow.with_question(q);
    }
    (flow, seen)
}

#[tokio::test]
async fn test_idle_engine_ignores_input() {
    let (mut engine, sink) = engine();

    assert_eq!(engine.state(), FlowState::Idle);
    assert!(!engine.handle_input("hello").await);
    assert!(!engine.handle_input("/cancel").await);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_single_text_question_completes() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(vec![Question::text("q1", "Name?")], "q1");

    assert!(engine.start_flow(flow));
    assert_eq!(engine.state(), FlowState::AwaitingAnswer);
    assert_eq!(engine.current_question_id(), Some("q1"));
    assert!(sink.contains("Name?"));
    assert!(sink.placeholder().is_some());

    assert!(engine.handle_input("Alice").await);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].len(), 1);
    assert_eq!(seen[0].get_str("q1"), Some("Alice"));
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(engine.answers().is_none());
    assert!(sink.texts(MessageRole::User).contains(&"Alice".to_string()));
    assert_eq!(sink.last().unwrap().text, "✅ done");
    assert!(sink.placeholder().is_none());
}

fn choice_question() -> Question {
    Question::choice("c", "Pick one", [("a", "Alpha"), ("b", "Beta")])
}

#[tokio::test]
async fn test_invalid_choice_reprompts_without_storing() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(vec![choice_question()], "c");
    engine.start_flow(flow);

    assert!(engine.handle_input("9").await);
    assert_eq!(engine.state(), FlowState::AwaitingAnswer);
    assert_eq!(engine.current_question_id(), Some("c"));
    assert!(engine.answers().unwrap().is_empty());
    assert!(sink.contains("Invalid selection '9'"));
    assert_eq!(sink.last().unwrap().role, MessageRole::Agent);
    assert!(sink.last().unwrap().text.contains("2. Beta"));

    assert!(engine.handle_input("2").await);
    assert_eq!(seen.lock().unwrap()[0].get_str("c"), Some("b"));
    assert_eq!(engine.state(), FlowState::Idle);
}

#[tokio::test]
async fn test_choice_accepts_value_case_insensitively() {
    let (mut engine, _sink) = engine();
    let (flow, seen) = recording_flow(vec![choice_question()], "c");
    engine.start_flow(flow);

    engine.handle_input("ALPHA").await;
    assert!(engine.is_active());

    engine.handle_input("A").await;
    assert_eq!(seen.lock().unwrap()[0].get_str("c"), Some("a"));
}

#[tokio::test]
async fn test_cancel_discards_answers() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(
        vec![
            Question::text("first", "First?").then("second"),
            Question::text("second", "Second?"),
        ],
        "first",
    );
    engine.start_flow(flow);
    engine.handle_input("one").await;
    assert_eq!(engine.answers().unwrap().len(), 1);

    assert!(engine.handle_input("  /CANCEL ").await);
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(engine.answers().is_none());
    assert!(seen.lock().unwrap().is_empty());
    assert!(sink.contains("cancelled"));
    assert!(sink.placeholder().is_none());
}

#[tokio::test]
async fn test_passthrough_and_blocked_commands() {
    let (mut engine, sink) = engine();
    let (flow, _seen) = recording_flow(vec![Question::text("q1", "Name?")], "q1");
    engine.start_flow(flow);

    assert!(!engine.handle_input("/help").await);
    assert!(!engine.handle_input("/quit now").await);
    assert!(engine.is_active());

    let before = sink.len();
    assert!(engine.handle_input("/sql DROP TABLE x").await);
    assert_eq!(sink.len(), before + 1);
    assert!(sink.contains("Commands are disabled"));
    assert!(engine.answers().unwrap().is_empty());
    assert!(engine.is_active());
}

#[tokio::test]
async fn test_absolute_path_is_an_answer_not_a_command() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(vec![Question::text("path", "Database file?")], "path");
    engine.start_flow(flow);

    assert!(engine.handle_input("/tmp/local.db").await);
    assert!(!sink.contains("Commands are disabled"));
    assert_eq!(engine.state(), FlowState::Idle);
    assert_eq!(seen.lock().unwrap()[0].get_str("path"), Some("/tmp/local.db"));
}

#[tokio::test]
async fn test_command_shape_decides_what_is_blocked() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(
        vec![
            Question::text("first", "First?").then("second"),
            Question::text("second", "Second?"),
        ],
        "first",
    );
    engine.start_flow(flow);

    for command in ["/sql", "/sql SELECT 1", "/dry-run now", "/x_1"] {
        assert!(engine.handle_input(command).await);
        assert_eq!(engine.current_question_id(), Some("first"), "{}", command);
    }
    assert!(engine.answers().unwrap().is_empty());

    assert!(engine.handle_input("/").await);
    assert_eq!(engine.answers().unwrap().get_str("first"), Some("/"));

    assert!(engine.handle_input("/1abc").await);
    assert_eq!(seen.lock().unwrap()[0].get_str("second"), Some("/1abc"));
    assert_eq!(
        sink.texts(MessageRole::System)
            .iter()
            .filter(|t| t.contains("Commands are disabled"))
            .count(),
        4
    );
}

#[tokio::test]
async fn test_empty_input_uses_default_or_reprompts() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(
        vec![
            Question::text("port", "Port?").with_default("5432").then("name"),
            Question::text("name", "Name?"),
        ],
        "port",
    );
    engine.start_flow(flow);
    assert!(sink.contains("[default: 5432]"));

    engine.handle_input("").await;
    assert_eq!(engine.answers().unwrap().get_str("port"), Some("5432"));

    engine.handle_input("   ").await;
    assert!(sink.contains("An answer is required."));
    assert_eq!(engine.current_question_id(), Some("name"));

    engine.handle_input("warehouse").await;
    assert_eq!(seen.lock().unwrap()[0].len(), 2);
}

#[tokio::test]
async fn test_dynamic_default_sees_earlier_answers() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(
        vec![
            Question::text("db", "Database?").then("alias"),
            Question::text("alias", "Alias?").with_dynamic_default(|answers| {
                Ok(format!("{}-conn", answers.get_str("db").unwrap_or("db")))
            }),
        ],
        "db",
    );
    engine.start_flow(flow);
    engine.handle_input("sales").await;
    assert!(sink.contains("[default: sales-conn]"));

    engine.handle_input("").await;
    assert_eq!(seen.lock().unwrap()[0].get_str("alias"), Some("sales-conn"));
}

#[tokio::test]
async fn test_confirm_normalises_answers() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(vec![Question::confirm("ok", "Proceed?")], "ok");
    engine.start_flow(flow);
    assert!(sink.contains("Proceed? (y/n)"));

    engine.handle_input("maybe").await;
    assert!(sink.contains("Please answer y or n."));
    assert!(engine.is_active());

    engine.handle_input("YES").await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].get_str("ok"), Some("y"));
    assert!(seen[0].is_yes("ok"));
}

#[tokio::test]
async fn test_password_echo_is_masked() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(vec![Question::password("key", "API key?")], "key");
    engine.start_flow(flow);

    engine.handle_input("sk-secret-value").await;

    assert_eq!(sink.texts(MessageRole::User), vec!["********".to_string()]);
    assert!(!sink.contains("sk-secret-value"));
    assert_eq!(
        seen.lock().unwrap()[0].get_str("key"),
        Some("sk-secret-value")
    );
}

#[tokio::test]
async fn test_validator_rejects_before_echo() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(
        vec![Question::text("name", "Name?").with_validator(|v| {
            (v.len() < 3).then(|| "Name must be at least 3 characters.".to_string())
        })],
        "name",
    );
    engine.start_flow(flow);

    engine.handle_input("ab").await;
    assert!(sink.contains("Name must be at least 3 characters."));
    assert!(sink.texts(MessageRole::User).is_empty());

    engine.handle_input("abc").await;
    assert_eq!(seen.lock().unwrap()[0].get_str("name"), Some("abc"));
}

#[tokio::test]
async fn test_transform_converts_or_reprompts() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(
        vec![Question::text("port", "Port?").with_transform(|v| {
            let port: u16 = v.parse()?;
            Ok(serde_json::json!(port))
        })],
        "port",
    );
    engine.start_flow(flow);

    engine.handle_input("not-a-port").await;
    assert!(sink.contains("Invalid value"));
    assert!(engine.answers().unwrap().is_empty());

    engine.handle_input("5432").await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].get("port"), Some(&serde_json::json!(5432)));
    assert_eq!(seen[0].get_i64("port"), Some(5432));
}

#[tokio::test]
async fn test_dynamic_next_routes_on_answers() {
    let (mut engine, _sink) = engine();
    let (flow, seen) = recording_flow(
        vec![
            Question::choice("kind", "Kind?", [("file", "File"), ("server", "Server")])
                .then_with(|answers| {
                    Ok(match answers.get_str("kind") {
                        Some("server") => Some("host".to_string()),
                        _ => None,
                    })
                }),
            Question::text("host", "Host?"),
        ],
        "kind",
    );
    engine.start_flow(flow.clone());
    engine.handle_input("file").await;
    assert_eq!(engine.state(), FlowState::Idle);

    engine.start_flow(flow);
    engine.handle_input("server").await;
    assert_eq!(engine.current_question_id(), Some("host"));
    engine.handle_input("db.local").await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(!seen[0].contains("host"));
    assert_eq!(seen[1].get_str("host"), Some("db.local"));
}

#[tokio::test]
async fn test_retry_rewinds_and_keeps_answers() {
    let (mut engine, sink) = engine();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flow = FlowDefinition::new("login", "Login", "user", move |answers: Answers| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if answers.get_str("secret") == Some("right") {
                Ok(FlowResult::success("Logged in"))
            } else {
                Ok(FlowResult::retry("Wrong secret", "secret"))
            }
        }
    })
    .with_question(Question::text("user", "User?").then("secret"))
    .with_question(Question::password("secret", "Secret?"));

    engine.start_flow(flow);
    engine.handle_input("ana").await;
    engine.handle_input("wrong").await;

    assert!(sink.contains("❌ Wrong secret"));
    assert_eq!(engine.current_question_id(), Some("secret"));
    assert_eq!(engine.answers().unwrap().get_str("user"), Some("ana"));

    engine.handle_input("right").await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(sink.contains("✅ Logged in"));
}

#[tokio::test]
async fn test_plain_failure_ends_flow() {
    let (mut engine, sink) = engine();
    let flow = FlowDefinition::new("f", "Failing", "q", |_answers: Answers| async {
        Ok(FlowResult::failure("Nope"))
    })
    .with_question(Question::text("q", "Q?"));

    engine.start_flow(flow);
    engine.handle_input("x").await;

    assert_eq!(engine.state(), FlowState::Idle);
    assert_eq!(sink.last().unwrap().text, "❌ Nope");
}

#[tokio::test]
async fn test_unknown_retry_target_is_internal_error() {
    let (mut engine, sink) = engine();
    let flow = FlowDefinition::new("f", "Broken retry", "q", |_answers: Answers| async {
        Ok(FlowResult::retry("again", "missing"))
    })
    .with_question(Question::text("q", "Q?"));

    engine.start_flow(flow);
    engine.handle_input("x").await;

    assert_eq!(engine.state(), FlowState::Idle);
    assert!(sink.contains("internal error"));
}

#[tokio::test]
async fn test_unknown_next_question_is_internal_error() {
    let (mut engine, sink) = engine();
    let (flow, seen) = recording_flow(vec![Question::text("q", "Q?").then("nowhere")], "q");

    engine.start_flow(flow);
    assert!(engine.handle_input("x").await);

    assert_eq!(engine.state(), FlowState::Idle);
    assert!(seen.lock().unwrap().is_empty());
    assert!(sink.contains("internal error"));
}

#[tokio::test]
async fn test_completion_error_and_panic_are_contained() {
    let (mut engine, sink) = engine();
    let flow = FlowDefinition::new("f", "Erroring", "q", |_answers: Answers| async {
        Err(anyhow::anyhow!("registry offline"))
    })
    .with_question(Question::text("q", "Q?"));
    engine.start_flow(flow);
    assert!(engine.handle_input("x").await);
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(sink.contains("registry offline"));

    let flow = FlowDefinition::new("p", "Panicking", "q", |_answers: Answers| async {
        if true {
            panic!("boom");
        }
        Ok(FlowResult::success("unreachable"))
    })
    .with_question(Question::text("q", "Q?"));
    engine.start_flow(flow);
    assert!(engine.handle_input("x").await);
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(sink.contains("completion handler panicked"));
}

#[tokio::test]
async fn test_missing_first_question_is_rejected() {
    let (mut engine, sink) = engine();
    let (flow, _seen) = recording_flow(vec![Question::text("q", "Q?")], "absent");

    assert!(!engine.start_flow(flow));
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_failed_start_leaves_engine_idle() {
    let (mut engine, sink) = engine();
    let (valid, valid_seen) = recording_flow(vec![Question::text("a", "A?")], "a");
    let (broken, _seen) = recording_flow(vec![Question::text("q", "Q?")], "absent");

    assert!(engine.start_flow(valid));
    let mounted = sink.len();

    assert!(!engine.start_flow(broken));
    assert_eq!(engine.state(), FlowState::Idle);
    assert_eq!(engine.active_flow_id(), None);
    assert_eq!(sink.len(), mounted);
    assert!(sink.placeholder().is_none());

    assert!(!engine.handle_input("late answer").await);
    assert!(valid_seen.lock().unwrap().is_empty());
}

/// Choice by index, confirm and a dynamic default that depends on both
fn branching_flow() -> (FlowDefinition, Arc<Mutex<Vec<Answers>>>) {
    recording_flow(
        vec![
            Question::choice("engine", "Engine?", [("pg", "Postgres"), ("my", "MySQL")])
                .then("tls"),
            Question::confirm("tls", "Use TLS?").then("port"),
            Question::text("port", "Port?").with_dynamic_default(|answers| {
                let base = if answers.get_str("engine") == Some("pg") { 5432 } else { 3306 };
                let offset = if answers.is_yes("tls") { 1 } else { 0 };
                Ok((base + offset).to_string())
            }),
        ],
        "engine",
    )
}

#[tokio::test]
async fn test_same_inputs_give_same_answers() {
    let inputs = ["1", "yes", ""];
    let mut runs = Vec::new();

    for _ in 0..2 {
        let (mut engine, sink) = engine();
        let (flow, seen) = branching_flow();
        engine.start_flow(flow);
        for input in inputs {
            assert!(engine.handle_input(input).await);
        }
        assert_eq!(engine.state(), FlowState::Idle);
        assert!(sink.contains("[default: 5433]"));

        let mut seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        runs.push(seen.remove(0));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].get_str("engine"), Some("pg"));
    assert_eq!(runs[0].get_str("tls"), Some("y"));
    assert_eq!(runs[0].get_str("port"), Some("5433"));
}

#[tokio::test]
async fn test_starting_a_flow_replaces_the_active_one() {
    let (mut engine, sink) = engine();
    let (first, first_seen) = recording_flow(vec![Question::text("a", "A?")], "a");
    let second = FlowDefinition::new("second", "Second flow", "b", |_answers: Answers| async {
        Ok(FlowResult::success("second done"))
    })
    .with_question(Question::text("b", "B?"));

    engine.start_flow(first);
    assert!(engine.start_flow(second));
    assert_eq!(engine.active_flow_id(), Some("second"));
    assert!(sink.contains("Test flow cancelled"));

    engine.handle_input("answer").await;
    assert!(first_seen.lock().unwrap().is_empty());
    assert!(sink.contains("✅ second done"));
}

fn failing_prompt_flow() -> (FlowDefinition, Arc<Mutex<Vec<Answers>>>) {
    recording_flow(
        vec![Question::text("q", "unused")
            .with_dynamic_prompt(|_answers| Err(anyhow::anyhow!("prompt lookup failed")))],
        "q",
    )
}

#[tokio::test]
async fn test_lenient_policy_falls_back_to_question_id() {
    let (mut engine, sink) = engine();
    let (flow, seen) = failing_prompt_flow();

    assert!(engine.start_flow(flow));
    assert_eq!(sink.last().unwrap().text, "q");

    engine.handle_input("value").await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_strict_policy_aborts_flow() {
    let (mut engine, sink) = engine_with(FlowEngineConfig {
        dynamic_field_policy: DynamicFieldPolicy::Strict,
        ..FlowEngineConfig::default()
    });
    let (flow, _seen) = failing_prompt_flow();

    assert!(!engine.start_flow(flow));
    assert_eq!(engine.state(), FlowState::Idle);
    assert!(sink.contains("internal error"));
}

#[tokio::test]
async fn test_engine_without_sink_still_runs() {
    let mut engine = FlowEngine::new(FlowEngineConfig::default());
    let (flow, seen) = recording_flow(vec![Question::text("q", "Q?")], "q");

    assert!(engine.start_flow(flow));
    assert!(engine.handle_input("silent").await);
    assert_eq!(seen.lock().unwrap()[0].get_str("q"), Some("silent"));
}
