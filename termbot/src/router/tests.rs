use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::assistant::fake::FakeLauncher;
use crate::host::fake::FakeHost;

struct Harness {
    tmp: TempDir,
    host: Arc<FakeHost>,
    launcher: Arc<FakeLauncher>,
    router: Router,
}

fn harness_with(
    host: FakeHost,
    launcher: FakeLauncher,
    policy: SecurityPolicy,
    settings: RouterSettings,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(SessionStore::open(tmp.path().join("sessions")).unwrap());
    let host = Arc::new(host);
    let launcher = Arc::new(launcher);
    let router = Router::new(
        store,
        Arc::clone(&host) as Arc<dyn SessionHost>,
        Arc::clone(&launcher) as Arc<dyn AssistantLauncher>,
        policy,
        settings,
    );
    Harness {
        tmp,
        host,
        launcher,
        router,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeHost::new(),
        FakeLauncher::new(),
        SecurityPolicy::default(),
        RouterSettings::default(),
    )
}

fn msg(text: &str) -> InboundMessage {
    InboundMessage::new(text, "operator")
}

fn id(n: u32) -> SessionId {
    SessionId::from_number(n)
}

impl Harness {
    async fn say(&self, ctx: &mut OperatorContext, text: &str) -> String {
        self.router.handle_message(ctx, &msg(text)).await
    }

    /// Create a session and leave it current in `ctx`.
    async fn create(&self, ctx: &mut OperatorContext, name: &str) -> SessionId {
        let text = self.say(ctx, &format!("/new-session {name}")).await;
        assert!(text.starts_with("Created session"), "{text}");
        ctx.current.clone().unwrap()
    }
}

#[tokio::test]
async fn new_session_becomes_current() {
    let h = harness();
    let mut ctx = OperatorContext::default();

    let text = h.say(&mut ctx, "/new-session demo").await;

    assert!(text.starts_with("Created session 001 (demo)"), "{text}");
    assert_eq!(ctx.current, Some(id(1)));
    assert_eq!(h.host.created(), vec![id(1)]);
    let session = h.router.store().get(&id(1)).unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert!(session.working_dir.is_dir());
}

#[tokio::test]
async fn duplicate_name_is_refused() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    let text = h.say(&mut ctx, "/new-session DEMO").await;

    assert_eq!(text, "Session \"DEMO\" already exists");
    assert_eq!(h.host.created().len(), 1);
    assert_eq!(ctx.current, Some(id(1)));
}

#[tokio::test]
async fn host_failure_on_create_leaves_no_session() {
    let h = harness();
    h.host.set_unavailable(true);
    let mut ctx = OperatorContext::default();

    let text = h.say(&mut ctx, "/new-session demo").await;

    assert!(text.starts_with("Terminal host unavailable"), "{text}");
    assert!(h.router.store().list().is_empty());
    assert!(ctx.current.is_none());
    assert!(!h.tmp.path().join("sessions").join("001").exists());
}

#[tokio::test]
async fn raw_command_without_session_is_rejected() {
    let h = harness();
    let mut ctx = OperatorContext::default();

    let text = h.say(&mut ctx, "ls -la").await;

    assert_eq!(text, BotError::NoActiveSession.to_string());
    assert!(h.host.sent().is_empty());
}

#[tokio::test]
async fn commands_on_one_session_run_in_order() {
    let h = harness_with(
        FakeHost::with_delay(Duration::from_millis(20)),
        FakeLauncher::new(),
        SecurityPolicy::default(),
        RouterSettings::default(),
    );
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;

    let mut pending = Vec::new();
    for cmd in ["echo one", "echo two", "echo three"] {
        pending.push(h.router.dispatch(&mut ctx, &msg(cmd)).await);
    }
    let mut replies = Vec::new();
    for reply in pending {
        replies.push(reply.text().await);
    }

    assert_eq!(replies[0], "```\nout: echo one\n```");
    assert_eq!(replies[2], "```\nout: echo three\n```");
    let sent: Vec<String> = h.host.sent().into_iter().map(|(_, cmd)| cmd).collect();
    assert_eq!(sent, vec!["echo one", "echo two", "echo three"]);
    assert_eq!(h.host.max_in_flight(&session), 1);
}

#[tokio::test]
async fn different_sessions_run_concurrently() {
    let h = harness_with(
        FakeHost::with_delay(Duration::from_millis(100)),
        FakeLauncher::new(),
        SecurityPolicy::default(),
        RouterSettings::default(),
    );
    let mut first = OperatorContext::default();
    let mut second = OperatorContext::default();
    h.create(&mut first, "one").await;
    h.create(&mut second, "two").await;

    let a = h.router.dispatch(&mut first, &msg("make build")).await;
    let b = h.router.dispatch(&mut second, &msg("make test")).await;
    let (a, b) = tokio::join!(a.text(), b.text());

    assert_eq!(a, "```\nout: make build\n```");
    assert_eq!(b, "```\nout: make test\n```");
    assert_eq!(h.host.max_global_in_flight(), 2);
}

#[tokio::test]
async fn blocked_command_never_reaches_host() {
    let h = harness_with(
        FakeHost::new(),
        FakeLauncher::new(),
        SecurityPolicy::new(vec!["rm -rf".into()], vec!["rm".into()]),
        RouterSettings::default(),
    );
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    let text = h.say(&mut ctx, "rm   -rf /tmp/build").await;

    assert!(text.starts_with("Command blocked for security"), "{text}");
    assert!(h.host.sent().is_empty());
}

#[tokio::test]
async fn default_policy_allows_listing_and_denies_sudo() {
    let h = harness_with(
        FakeHost::new(),
        FakeLauncher::new(),
        SecurityPolicy::new(vec!["rm -rf".into(), "sudo".into()], Vec::new()),
        RouterSettings::default(),
    );
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;

    assert_eq!(h.say(&mut ctx, "ls -la").await, "```\nout: ls -la\n```");
    let denied = h.say(&mut ctx, "sudo rm -rf /").await;

    assert!(denied.starts_with("Command blocked for security"), "{denied}");
    assert!(denied.contains("rm -rf"), "{denied}");
    assert_eq!(h.host.sent(), vec![(session, "ls -la".to_string())]);
}

#[tokio::test]
async fn destroying_twice_is_not_an_error() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    h.say(&mut ctx, "/kill-session").await;

    assert!(h.host.destroy(&session).await.is_ok());
}

#[tokio::test]
async fn timeout_returns_partial_output() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    let text = h.say(&mut ctx, "slow build").await;

    assert!(text.contains("partial: slow build"), "{text}");
    assert!(text.contains("Command timed out after 15s"), "{text}");
}

#[tokio::test]
async fn session_hint_overrides_current() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "api").await;
    h.create(&mut ctx, "web").await;
    assert_eq!(ctx.current, Some(id(2)));

    let message = msg("pwd").with_session("api");
    h.router.handle_message(&mut ctx, &message).await;

    assert_eq!(h.host.sent(), vec![(id(1), "pwd".to_string())]);
    assert_eq!(ctx.current, Some(id(2)));
}

#[tokio::test]
async fn switch_to_killed_session_keeps_context() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "api").await;
    h.create(&mut ctx, "web").await;
    h.say(&mut ctx, "/switch-session 1").await;

    let killed = h.say(&mut ctx, "/kill-session 002").await;
    assert_eq!(killed, "Session 002 (web) terminated");

    let text = h.say(&mut ctx, "/switch-session 2").await;
    assert_eq!(text, "Session 2 not found");
    assert_eq!(ctx.current, Some(id(1)));
    assert_eq!(h.host.destroyed(), vec![id(2)]);
}

#[tokio::test]
async fn killing_current_session_clears_context() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    h.say(&mut ctx, "/kill-session").await;

    assert!(ctx.current.is_none());
    assert_eq!(
        h.say(&mut ctx, "ls").await,
        BotError::NoActiveSession.to_string()
    );
}

#[tokio::test]
async fn kill_after_external_death_is_clean() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    h.host.kill_external(&session);

    let text = h.say(&mut ctx, "/kill-session demo").await;

    assert_eq!(text, "Session 001 (demo) terminated");
    assert!(h.router.store().get(&session).is_none());
}

#[tokio::test]
async fn queued_commands_run_before_kill() {
    let h = harness_with(
        FakeHost::with_delay(Duration::from_millis(20)),
        FakeLauncher::new(),
        SecurityPolicy::default(),
        RouterSettings::default(),
    );
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;

    let first = h.router.dispatch(&mut ctx, &msg("echo a")).await;
    let second = h.router.dispatch(&mut ctx, &msg("echo b")).await;
    let kill = h.router.dispatch(&mut ctx, &msg("/kill-session")).await;

    assert!(h.router.store().get(&session).is_none());
    assert_eq!(first.text().await, "```\nout: echo a\n```");
    assert_eq!(second.text().await, "```\nout: echo b\n```");
    assert_eq!(kill.text().await, "Session 001 (demo) terminated");
    assert_eq!(h.host.sent().len(), 2);
    assert!(!h.host.is_live(&session));
}

#[tokio::test]
async fn sleep_then_switch_wakes_session() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;

    let text = h.say(&mut ctx, "/sleep-session").await;
    assert_eq!(text, "Session 001 (demo) is now in the background");
    assert_eq!(
        h.router.store().get(&session).unwrap().state,
        SessionState::Background
    );

    let text = h.say(&mut ctx, "/switch-session DEMO").await;
    assert_eq!(text, "Switched to session 001 (demo)");
    assert_eq!(
        h.router.store().get(&session).unwrap().state,
        SessionState::Active
    );
}

#[tokio::test]
async fn rename_updates_name() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    let text = h.say(&mut ctx, r#"/rename-session 1 "api server""#).await;

    assert_eq!(text, "Renamed session 001 to \"api server\"");
    assert!(h.router.store().resolve("API SERVER").is_some());
}

#[tokio::test]
async fn working_dir_change_is_sent_and_recorded() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    let target = h.tmp.path().join("project");
    std::fs::create_dir(&target).unwrap();
    let target = std::fs::canonicalize(target).unwrap();

    let text = h
        .say(&mut ctx, &format!("/working-dir {}", target.display()))
        .await;

    assert!(text.starts_with("Working directory changed to:"), "{text}");
    assert_eq!(h.router.store().get(&session).unwrap().working_dir, target);
    let (_, sent) = h.host.sent().pop().unwrap();
    assert!(sent.starts_with("cd '"), "{sent}");

    let missing = h.say(&mut ctx, "/working-dir /no/such/place").await;
    assert!(missing.contains("directory not found"), "{missing}");
}

#[tokio::test]
async fn second_start_while_starting_does_not_spawn_again() {
    let h = harness_with(
        FakeHost::new(),
        FakeLauncher::slow(Duration::from_millis(100)),
        SecurityPolicy::default(),
        RouterSettings::default(),
    );
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    let first = h.router.dispatch(&mut ctx, &msg("/claude-start")).await;
    let second = h.say(&mut ctx, "/claude-start").await;

    assert_eq!(second, "Assistant is already starting in session 001 (demo)");
    assert!(first.text().await.starts_with("Assistant started in session 001 (demo)"));
    assert_eq!(h.launcher.spawn_count(), 1);

    let third = h.say(&mut ctx, "/claude-start").await;
    assert_eq!(third, "Assistant is already running in session 001 (demo)");
}

#[tokio::test]
async fn commands_use_assistant_profile_while_running() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    h.say(&mut ctx, "ls").await;
    assert_eq!(h.host.last_profile(), Some(RouterSettings::default().shell));

    h.say(&mut ctx, "/claude-start").await;
    h.say(&mut ctx, "explain this repo").await;
    assert_eq!(
        h.host.last_profile(),
        Some(RouterSettings::default().assistant)
    );

    let stopped = h.say(&mut ctx, "/claude-stop").await;
    assert_eq!(stopped, "Assistant stopped in session 001 (demo)");
    let again = h.say(&mut ctx, "/claude-stop").await;
    assert_eq!(again, "Assistant is not running in session 001 (demo)");
}

#[tokio::test]
async fn status_reports_unexpected_exit() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    h.say(&mut ctx, "/claude-start").await;
    h.launcher.exit(&session, 3);

    let text = h.say(&mut ctx, "/claude-status").await;

    assert!(text.contains("exited with code 3"), "{text}");
    assert_eq!(
        h.router.store().get(&session).unwrap().assistant,
        AssistantState::Stopped
    );
}

#[tokio::test]
async fn working_dir_refused_while_assistant_is_up() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;
    h.say(&mut ctx, "/claude-start").await;

    let text = h.say(&mut ctx, "/working-dir /tmp").await;

    assert!(text.contains("stop it before changing directory"), "{text}");
}

#[tokio::test]
async fn keys_and_history_reach_the_host() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    h.say(&mut ctx, "echo hi").await;

    assert_eq!(h.say(&mut ctx, "/keys C-c").await, "Sent keys: C-c");
    assert_eq!(h.host.keys(), vec![(session, vec!["C-c".to_string()])]);
    assert_eq!(h.say(&mut ctx, "/history 5").await, "```\necho hi\n```");
}

#[tokio::test]
async fn keys_cannot_type_a_blocked_command() {
    let h = harness_with(
        FakeHost::new(),
        FakeLauncher::new(),
        SecurityPolicy::new(vec!["sudo".into(), "rm -rf".into()], Vec::new()),
        RouterSettings::default(),
    );
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "demo").await;

    let typed = h.say(&mut ctx, "/keys \"sudo rm -rf /\" Enter").await;
    let spelled = h.say(&mut ctx, "/keys sudo Space reboot C-m").await;

    assert!(typed.starts_with("Command blocked for security"), "{typed}");
    assert!(spelled.starts_with("Command blocked for security"), "{spelled}");
    assert!(h.host.keys().is_empty());
}

#[tokio::test]
async fn start_after_unexpected_exit_launches_again() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    h.say(&mut ctx, "/claude-start").await;
    h.launcher.exit(&session, 1);

    let text = h.say(&mut ctx, "/claude-start").await;

    assert!(text.starts_with("Assistant started in session 001 (demo)"), "{text}");
    assert_eq!(h.launcher.spawn_count(), 2);
}

#[tokio::test]
async fn restart_drops_sessions_whose_terminal_died() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "api").await;
    h.create(&mut ctx, "web").await;

    // A new process over the same records; only the first terminal survived.
    let host = Arc::new(FakeHost::new());
    host.spawn_external(&id(1));
    let store = Arc::new(SessionStore::open(h.tmp.path().join("sessions")).unwrap());
    assert_eq!(store.list().len(), 2);
    let router = Router::new(
        store,
        Arc::clone(&host) as Arc<dyn SessionHost>,
        Arc::new(FakeLauncher::new()),
        SecurityPolicy::default(),
        RouterSettings::default(),
    );

    let report = router.reconcile().await.unwrap();
    assert_eq!(report.terminated, vec![id(2)]);
    assert!(report.orphans.is_empty());

    let mut ctx = router.new_context();
    assert_eq!(ctx.current, Some(id(1)));
    for reference in ["002", "web"] {
        assert!(matches!(
            router.resolve(&mut ctx, Some(reference)),
            Err(BotError::SessionNotFound(_))
        ));
    }
    assert_eq!(router.store().list().len(), 1);

    let text = router.handle_message(&mut ctx, &msg("/new-session web")).await;
    assert!(text.starts_with("Created session 003 (web)"), "{text}");
}

#[tokio::test]
async fn reconcile_terminates_dead_and_reports_orphans() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "api").await;
    h.create(&mut ctx, "web").await;
    h.host.kill_external(&id(2));
    h.host.spawn_external(&id(7));

    let report = h.router.reconcile().await.unwrap();

    assert_eq!(report.terminated, vec![id(2)]);
    assert_eq!(report.orphans, vec![id(7)]);
    assert!(h.router.store().get(&id(2)).is_none());
    assert!(h.router.store().get(&id(1)).is_some());
    assert!(h.host.is_live(&id(7)));
    assert_eq!(h.router.orphans(), vec![id(7)]);

    let listing = h.say(&mut ctx, "/list-sessions").await;
    assert!(listing.contains("Orphaned terminal processes"), "{listing}");

    let text = h.say(&mut ctx, "/kill-session 7").await;
    assert_eq!(text, "Orphaned terminal process 007 destroyed");
    assert!(!h.host.is_live(&id(7)));
    assert!(h.router.orphans().is_empty());
}

#[tokio::test]
async fn reconcile_fails_when_host_is_down() {
    let h = harness();
    h.host.set_unavailable(true);

    assert!(matches!(
        h.router.reconcile().await,
        Err(BotError::HostUnavailable(_))
    ));
}

#[tokio::test]
async fn idle_sessions_are_reaped() {
    let settings = RouterSettings {
        idle_timeout: Some(Duration::ZERO),
        ..RouterSettings::default()
    };
    let h = harness_with(
        FakeHost::new(),
        FakeLauncher::new(),
        SecurityPolicy::default(),
        settings,
    );
    let mut ctx = OperatorContext::default();
    let session = h.create(&mut ctx, "demo").await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(h.router.reap_idle(), vec![session.clone()]);
    assert!(h.router.store().get(&session).is_none());
    assert!(harness().router.reap_idle().is_empty());
}

#[tokio::test]
async fn fresh_context_adopts_most_recent_active() {
    let h = harness();
    let mut ctx = OperatorContext::default();
    h.create(&mut ctx, "api").await;
    h.create(&mut ctx, "web").await;
    h.say(&mut ctx, "/sleep-session web").await;

    assert_eq!(h.router.new_context().current, Some(id(1)));
}

#[tokio::test]
async fn invalid_and_help_reply_immediately() {
    let h = harness();
    let mut ctx = OperatorContext::default();

    let usage = h.say(&mut ctx, "/switch-session").await;
    assert!(usage.starts_with("Invalid command: Usage"), "{usage}");
    assert!(h.say(&mut ctx, "/help").await.contains("/new-session"));
}
