mod support;

use std::time::Duration;

use postern_common::{ComponentOptions, Envelope};
use postern_relay::{Relay, StaticSmtpRelay};
use support::mock_server::{MockSmtpServer, SmtpCommand};

fn relay_for(server: &MockSmtpServer, extra: &str) -> StaticSmtpRelay {
    let options = ComponentOptions::new(
        "relay 'smarthost'",
        format!(
            "type = \"static\"\nhost = \"127.0.0.1\"\nport = {}\nehlo_as = \"relay.test\"\nconnect_timeout = 5\n{extra}",
            server.addr().port()
        )
        .parse()
        .expect("valid toml"),
    );

    StaticSmtpRelay::from_options(&options).expect("relay")
}

fn envelope(recipients: &[&str]) -> Envelope {
    Envelope::new(
        "sender@example.com",
        recipients.iter().map(ToString::to_string).collect(),
        "Subject: relay test\r\n\r\n.leading dot\r\nbody\r\n",
    )
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_delivers_message() {
    let server = MockSmtpServer::builder().build().await.expect("mock server");
    let relay = relay_for(&server, "");

    let reply = relay
        .attempt(&envelope(&["rcpt@example.org"]), 1)
        .await
        .expect("delivered");
    assert_eq!(reply.code, 250);

    let commands = server.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("relay.test".to_string()));
    assert_eq!(
        commands[1],
        SmtpCommand::MailFrom("FROM:<sender@example.com>".to_string())
    );
    assert_eq!(
        commands[2],
        SmtpCommand::RcptTo("TO:<rcpt@example.org>".to_string())
    );
    assert_eq!(commands[3], SmtpCommand::Data);
    assert_eq!(
        server.messages().await,
        vec![b"Subject: relay test\r\n\r\n.leading dot\r\nbody\r\n".to_vec()]
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_reuses_idle_connection() {
    let server = MockSmtpServer::builder().build().await.expect("mock server");
    let relay = relay_for(&server, "idle_timeout = 5");

    relay.attempt(&envelope(&["a@example.org"]), 1).await.expect("first");
    relay.attempt(&envelope(&["b@example.org"]), 1).await.expect("second");

    assert_eq!(server.connections().await, 1);
    assert!(server.commands().await.contains(&SmtpCommand::Rset));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_zero_idle_timeout_closes_connection() {
    let server = MockSmtpServer::builder().build().await.expect("mock server");
    let relay = relay_for(&server, "idle_timeout = 0");

    relay.attempt(&envelope(&["a@example.org"]), 1).await.expect("first");
    relay.attempt(&envelope(&["b@example.org"]), 1).await.expect("second");

    assert_eq!(server.connections().await, 2);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_falls_back_to_helo() {
    let server = MockSmtpServer::builder()
        .without_ehlo()
        .build()
        .await
        .expect("mock server");
    let relay = relay_for(&server, "");

    relay.attempt(&envelope(&["a@example.org"]), 1).await.expect("delivered");
    assert!(
        server
            .commands()
            .await
            .contains(&SmtpCommand::Helo("relay.test".to_string()))
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_temporary_rejection_is_transient() {
    let server = MockSmtpServer::builder()
        .with_mail_from_response(451, "Try again later")
        .build()
        .await
        .expect("mock server");
    let relay = relay_for(&server, "");

    let err = relay
        .attempt(&envelope(&["a@example.org"]), 1)
        .await
        .expect_err("deferred");
    assert!(err.is_transient());
    assert_eq!(err.failure().reply.as_ref().map(|r| r.code), Some(451));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_partial_recipient_failure() {
    let server = MockSmtpServer::builder()
        .with_rcpt_response_for("busy@example.org", 452, "Mailbox busy")
        .with_rcpt_response_for("gone@example.org", 550, "No such user")
        .build()
        .await
        .expect("mock server");
    let relay = relay_for(&server, "");

    let err = relay
        .attempt(
            &envelope(&["ok@example.org", "busy@example.org", "gone@example.org"]),
            1,
        )
        .await
        .expect_err("partial");

    assert!(err.is_transient());
    assert_eq!(err.recipients(), ["busy@example.org".to_string()]);
    assert!(server.wait_for_messages(1, Duration::from_secs(5)).await);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_all_recipients_rejected_is_permanent() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "No such user")
        .build()
        .await
        .expect("mock server");
    let relay = relay_for(&server, "");

    let err = relay
        .attempt(&envelope(&["a@example.org"]), 1)
        .await
        .expect_err("rejected");

    assert!(!err.is_transient());
    assert!(!server.commands().await.contains(&SmtpCommand::Data));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_required_tls_without_starttls() {
    let server = MockSmtpServer::builder().build().await.expect("mock server");
    let relay = relay_for(&server, "tls = { required = true }");

    let err = relay
        .attempt(&envelope(&["a@example.org"]), 1)
        .await
        .expect_err("no STARTTLS offered");

    assert!(err.is_transient());
    assert!(err.to_string().contains("STARTTLS"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Requires network")]
async fn test_connection_refused_is_transient() {
    let server = MockSmtpServer::builder().build().await.expect("mock server");
    let port = server.addr().port();
    server.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let options = ComponentOptions::new(
        "relay 'smarthost'",
        format!("host = \"127.0.0.1\"\nport = {port}\nconnect_timeout = 1")
            .parse()
            .expect("valid toml"),
    );
    let relay = StaticSmtpRelay::from_options(&options).expect("relay");

    let err = relay
        .attempt(&envelope(&["a@example.org"]), 1)
        .await
        .expect_err("refused");
    assert!(err.is_transient());
}
