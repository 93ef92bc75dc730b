//! End-to-end dispatch pipeline tests over the loopback transport.
//!
//! Each test boots a full bot against a manual `LocalTransport`, injects
//! events through the driver, and asserts on recorded sends and shared
//! state. Real multi-thread runtime; waits are short bounded polls.

use std::sync::Arc;
use std::time::Duration;

use wacrab::session::Session;
use wacrab::transport::local::{LocalDriver, LocalTransport};
use wacrab::transport::{InboundMessage, OutboundContent, QuotedRef, TransportEvent};
use wacrab::{Bot, BotConfig};

const OWNER: &str = "111@s.whatsapp.net";
const USER: &str = "222@s.whatsapp.net";
const GROUP: &str = "555-666@g.us";

async fn boot() -> (Bot, LocalDriver, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = BotConfig {
        data_dir: dir.path().to_path_buf(),
        audit_log: dir.path().join("audit.log"),
        owner_numbers: vec!["111".into()],
        ..Default::default()
    };
    let (transport, driver) = LocalTransport::manual();
    let bot = Bot::new(config, Arc::new(transport), None);
    bot.initialize().await.unwrap();
    driver
        .emit(TransportEvent::Connected { me: "999".into() })
        .await;
    wait_until(|| bot.operational_state() == wacrab::OperationalState::Running).await;
    (bot, driver, dir)
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within the wait budget");
}

/// Fixed pause for negative assertions ("nothing happened").
async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

fn text_msg(id: &str, chat: &str, sender: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.into(),
        chat: chat.into(),
        sender: sender.into(),
        text: text.into(),
        is_group: chat.ends_with("@g.us"),
        ..Default::default()
    }
}

fn reply_msg(
    id: &str,
    chat: &str,
    sender: &str,
    text: &str,
    quoted_id: &str,
) -> InboundMessage {
    InboundMessage {
        quoted: Some(QuotedRef {
            id: quoted_id.into(),
            sender: "999@s.whatsapp.net".into(),
            text: String::new(),
        }),
        ..text_msg(id, chat, sender, text)
    }
}

fn texts(driver: &LocalDriver) -> Vec<String> {
    driver.sent_texts().into_iter().map(|(_, t)| t).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn banned_sender_with_active_session_is_dropped_at_stage_one() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();

    // The user has an in-flight registration session awaiting age input...
    let mut session = Session::new(
        USER,
        USER,
        "register",
        "ask_age",
        "question-1",
        tokio::time::Duration::from_secs(600),
    );
    session.answers.insert("name".into(), "Mallory".into());
    services.sessions.create(session, false).unwrap();

    // ...but has been banned since.
    services.state.ban(USER, OWNER);

    driver
        .emit(TransportEvent::Messages(vec![reply_msg(
            "m1",
            USER,
            USER,
            "25",
            "question-1",
        )]))
        .await;
    settle().await;

    // Stage 1 dropped the message: no reply, no session mutation.
    assert!(texts(&driver).is_empty());
    let session = services.sessions.get(USER).unwrap();
    assert_eq!(session.step, "ask_age");
    assert!(!session.answers.contains_key("age"));
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_replies_and_cooldown_silences_repeat() {
    let (_bot, driver, _dir) = boot().await;

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1", USER, USER, "!ping",
        )]))
        .await;
    wait_until(|| texts(&driver).iter().any(|t| t == "Pong!")).await;

    let sends_after_first = driver.sent_texts().len();
    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m2", USER, USER, "!ping",
        )]))
        .await;
    settle().await;

    // The second invocation inside the cooldown window is silently dropped.
    assert_eq!(driver.sent_texts().len(), sends_after_first);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_command_gets_a_suggestion() {
    let (_bot, driver, _dir) = boot().await;

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1", USER, USER, "!pingg",
        )]))
        .await;
    wait_until(|| {
        texts(&driver)
            .iter()
            .any(|t| t.contains("Did you mean `!ping`"))
    })
    .await;

    // A miss with no close match stays silent but still stops the pipeline.
    let count = driver.sent_texts().len();
    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m2", USER, USER, "!zzzzzz",
        )]))
        .await;
    settle().await;
    assert_eq!(driver.sent_texts().len(), count);
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_session_runs_to_completion() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1",
            USER,
            USER,
            "!register",
        )]))
        .await;
    wait_until(|| services.sessions.get(USER).is_some()).await;
    let question_id = services.sessions.get(USER).unwrap().reply_to;

    driver
        .emit(TransportEvent::Messages(vec![reply_msg(
            "m2",
            USER,
            USER,
            "Alice Example",
            &question_id,
        )]))
        .await;
    wait_until(|| {
        services
            .sessions
            .get(USER)
            .is_some_and(|s| s.step == "ask_age")
    })
    .await;
    let question_id = services.sessions.get(USER).unwrap().reply_to;

    driver
        .emit(TransportEvent::Messages(vec![reply_msg(
            "m3",
            USER,
            USER,
            "30",
            &question_id,
        )]))
        .await;
    wait_until(|| services.state.flags_for(USER).is_registered).await;

    // Session destroyed on completion; the welcome went out.
    assert!(services.sessions.get(USER).is_none());
    assert!(texts(&driver).iter().any(|t| t.contains("Alice Example")));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_age_is_rejected_and_session_stays() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1",
            USER,
            USER,
            "!register",
        )]))
        .await;
    wait_until(|| services.sessions.get(USER).is_some()).await;
    let question_id = services.sessions.get(USER).unwrap().reply_to;

    driver
        .emit(TransportEvent::Messages(vec![reply_msg(
            "m2",
            USER,
            USER,
            "Bob",
            &question_id,
        )]))
        .await;
    wait_until(|| {
        services
            .sessions
            .get(USER)
            .is_some_and(|s| s.step == "ask_age")
    })
    .await;
    let question_id = services.sessions.get(USER).unwrap().reply_to;

    driver
        .emit(TransportEvent::Messages(vec![reply_msg(
            "m3", USER, USER, "seven", &question_id,
        )]))
        .await;
    wait_until(|| texts(&driver).iter().any(|t| t.contains("Invalid age"))).await;

    assert!(!services.state.flags_for(USER).is_registered);
    assert!(services.sessions.get(USER).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn active_session_blocks_other_commands_with_countdown() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1", USER, USER, "!menu",
        )]))
        .await;
    wait_until(|| services.sessions.get(USER).is_some()).await;

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m2", USER, USER, "!ping",
        )]))
        .await;
    wait_until(|| {
        texts(&driver)
            .iter()
            .any(|t| t.contains("active `menu` session") && t.contains("expires in"))
    })
    .await;

    // Ping never executed.
    assert!(!texts(&driver).iter().any(|t| t == "Pong!"));
}

#[tokio::test(flavor = "multi_thread")]
async fn antilink_deletes_offending_links_from_non_admins() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();
    services.state.update_antilink(GROUP, |c| c.enabled = true);

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1",
            GROUP,
            USER,
            "join https://spam.example/x",
        )]))
        .await;
    wait_until(|| {
        driver
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|r| matches!(&r.content, OutboundContent::Delete { target } if target.id == "m1"))
    })
    .await;
    assert!(texts(&driver).iter().any(|t| t.contains("links are not allowed")));

    // An allowed domain passes untouched.
    let count = driver.sent.lock().unwrap().len();
    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m2",
            GROUP,
            USER,
            "watch https://youtube.com/v/abc",
        )]))
        .await;
    settle().await;
    let no_delete = !driver
        .sent
        .lock()
        .unwrap()
        .iter()
        .skip(count)
        .any(|r| matches!(&r.content, OutboundContent::Delete { .. }));
    assert!(no_delete);

    // Admins are exempt.
    let mut admin_msg = text_msg("m3", GROUP, USER, "https://spam.example/y");
    admin_msg.sender_is_admin = true;
    driver.emit(TransportEvent::Messages(vec![admin_msg])).await;
    settle().await;
    let no_admin_delete = !driver
        .sent
        .lock()
        .unwrap()
        .iter()
        .any(|r| matches!(&r.content, OutboundContent::Delete { target } if target.id == "m3"));
    assert!(no_admin_delete);
}

#[tokio::test(flavor = "multi_thread")]
async fn owner_commands_are_denied_to_others() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1",
            USER,
            USER,
            "!mode self",
        )]))
        .await;
    wait_until(|| texts(&driver).iter().any(|t| t.contains("Access denied"))).await;
    assert_eq!(services.state.bot_mode(), wacrab::state::BotMode::Public);

    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m2",
            OWNER,
            OWNER,
            "!mode self",
        )]))
        .await;
    wait_until(|| services.state.bot_mode() == wacrab::state::BotMode::SelfOnly).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ai_fallback_fires_only_for_private_reply_or_mention() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();

    let typing_count = |driver: &LocalDriver| {
        driver
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.content, OutboundContent::Typing { .. }))
            .count()
    };

    // Private chat: triggers (providers all fail, so only typing toggles).
    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m1", USER, USER, "hello there",
        )]))
        .await;
    wait_until(|| typing_count(&driver) >= 2).await;

    // Plain group chatter without reply or mention: no trigger.
    let before = typing_count(&driver);
    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m2",
            GROUP,
            USER,
            "just chatting",
        )]))
        .await;
    settle().await;
    assert_eq!(typing_count(&driver), before);

    // Group message mentioning the bot: triggers.
    let mut mention = text_msg("m3", GROUP, USER, "hey @999 what do you think?");
    mention.mentions = vec!["999@s.whatsapp.net".into()];
    driver.emit(TransportEvent::Messages(vec![mention])).await;
    wait_until(|| typing_count(&driver) >= before + 2).await;

    // AI-banned chat: silent even in private.
    services.state.set_ai_banned(USER, true);
    let before = typing_count(&driver);
    driver
        .emit(TransportEvent::Messages(vec![text_msg(
            "m4", USER, USER, "anyone home?",
        )]))
        .await;
    settle().await;
    assert_eq!(typing_count(&driver), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn view_once_media_is_archived_when_enabled() {
    let (bot, driver, _dir) = boot().await;
    let services = bot.services();
    services.state.set_rvom(USER, true);

    let mut msg = text_msg("m1", USER, USER, "");
    msg.view_once = true;
    driver.emit(TransportEvent::Messages(vec![msg])).await;
    wait_until(|| {
        driver.sent.lock().unwrap().iter().any(|r| {
            matches!(&r.content, OutboundContent::ForwardViewOnce { source_id, .. } if source_id == "m1")
        })
    })
    .await;
}
