mod support;

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use postern_common::ComponentOptions;
use postern_edge::{Edge, StaticCredentials, Timeouts};
use postern_queue::QueueError;
use postern_relay::RelayError;
use pretty_assertions::assert_eq;
use support::{Client, RecordingQueue, start_edge, start_edge_with_timeouts};

async fn connect(edge: &impl Edge) -> Client {
    let mut client = Client::connect(edge.local_addr().expect("listening")).await;
    let (code, lines) = client.reply().await;
    assert_eq!(code, 220);
    assert_eq!(lines, vec!["mx.test ESMTP Postern".to_string()]);
    client
}

fn credentials() -> Arc<StaticCredentials> {
    let options = ComponentOptions::new(
        "edge 'test'.authentication",
        "type = \"static\"\ncredentials = { alice = \"secret\" }"
            .parse()
            .expect("valid toml"),
    );
    Arc::new(StaticCredentials::from_options(&options).expect("credentials"))
}

#[tokio::test]
async fn test_message_is_queued() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge("", queue.clone(), None, None).await;
    let mut client = connect(&edge).await;

    let (code, extensions) = client.command("EHLO client.test").await;
    assert_eq!(code, 250);
    assert_eq!(extensions[0], "mx.test");
    assert!(extensions.contains(&"SIZE 10485760".to_string()));
    assert!(!extensions.contains(&"STARTTLS".to_string()));
    assert!(!extensions.iter().any(|e| e.starts_with("AUTH")));

    assert_eq!(client.code("MAIL FROM:<alice@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<bob@example.org>").await, 250);
    assert_eq!(client.code("RCPT TO:<carol@example.org>").await, 250);
    assert_eq!(client.code("DATA").await, 354);
    let (code, _) = client
        .command("Subject: hello\r\n\r\n..dotted\r\nbody\r\n.")
        .await;
    assert_eq!(code, 250);
    assert_eq!(client.code("QUIT").await, 221);

    let envelopes = queue.envelopes().await;
    assert_eq!(envelopes.len(), 1);
    let envelope = &envelopes[0];
    assert_eq!(envelope.sender, "alice@example.com");
    assert_eq!(envelope.recipients, vec!["bob@example.org", "carol@example.org"]);
    assert_eq!(envelope.data, b"Subject: hello\r\n\r\n.dotted\r\nbody\r\n");
    assert_eq!(envelope.client.ehlo.as_deref(), Some("client.test"));
    assert!(envelope.client.peer.is_some());
    assert!(!envelope.client.tls);

    edge.stop().await;
}

#[tokio::test]
async fn test_command_sequence() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge("", queue.clone(), None, None).await;
    let mut client = connect(&edge).await;

    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 503);
    assert_eq!(client.code("HELO client.test").await, 250);
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 503);
    assert_eq!(client.code("DATA").await, 503);
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 503);
    assert_eq!(client.code("RSET").await, 250);
    assert_eq!(client.code("MAIL FROM:<>").await, 250);
    assert_eq!(client.code("NOOP").await, 250);
    assert_eq!(client.code("VRFY root").await, 500);
    assert_eq!(client.code("QUIT").await, 221);
    assert!(client.is_closed().await);

    assert!(queue.envelopes().await.is_empty());
    edge.stop().await;
}

#[tokio::test]
async fn test_size_limits() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge("max_size = 64", queue.clone(), None, None).await;
    let mut client = connect(&edge).await;

    assert_eq!(client.code("EHLO client.test").await, 250);
    assert_eq!(client.code("MAIL FROM:<a@example.com> SIZE=65").await, 552);
    assert_eq!(client.code("MAIL FROM:<a@example.com> SIZE=64").await, 250);
    assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);

    let body = "x".repeat(100);
    assert_eq!(client.code(&format!("{body}\r\n.")).await, 552);

    // The session survives the oversized message.
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    assert!(queue.envelopes().await.is_empty());
    edge.stop().await;
}

#[tokio::test]
async fn test_rules() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge(
        "[rules]\nbanner = \"welcome to {fqdn}\"\nonly_recipients = [\"Postmaster@example.com\"]",
        queue,
        None,
        None,
    )
    .await;

    let mut client = Client::connect(edge.local_addr().expect("listening")).await;
    let (code, lines) = client.reply().await;
    assert_eq!(code, 220);
    assert!(lines[0].starts_with("welcome to "));

    assert_eq!(client.code("EHLO client.test").await, 250);
    assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
    let (code, lines) = client.command("RCPT TO:<root@example.com>").await;
    assert_eq!(code, 550);
    assert_eq!(lines, vec!["5.7.1 Recipient <root@example.com> not allowed".to_string()]);
    assert_eq!(client.code("RCPT TO:<postmaster@example.com>").await, 250);

    edge.stop().await;
}

#[tokio::test]
async fn test_queue_verdicts() {
    let permanent = Arc::new(RecordingQueue::refusing(|| {
        QueueError::Relay(RelayError::permanent("mailbox unavailable"))
    }));
    let transient = Arc::new(RecordingQueue::refusing(|| QueueError::ShuttingDown));

    for (queue, expected) in [(permanent, 554), (transient, 451)] {
        let edge = start_edge("", queue, None, None).await;
        let mut client = connect(&edge).await;

        assert_eq!(client.code("EHLO client.test").await, 250);
        assert_eq!(client.code("MAIL FROM:<a@example.com>").await, 250);
        assert_eq!(client.code("RCPT TO:<b@example.com>").await, 250);
        assert_eq!(client.code("DATA").await, 354);
        assert_eq!(client.code("hello\r\n.").await, expected);

        edge.stop().await;
    }
}

#[tokio::test]
async fn test_auth_plain() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge(
        "[rules]\nrequire_credentials = true",
        queue.clone(),
        None,
        Some(credentials()),
    )
    .await;
    let mut client = connect(&edge).await;

    let (_, extensions) = client.command("EHLO client.test").await;
    assert!(extensions.contains(&"AUTH PLAIN LOGIN".to_string()));

    assert_eq!(client.code("MAIL FROM:<alice@example.com>").await, 530);

    let wrong = STANDARD.encode("\0alice\0wrong");
    assert_eq!(client.code(&format!("AUTH PLAIN {wrong}")).await, 535);

    let (code, challenge) = client.command("AUTH PLAIN").await;
    assert_eq!((code, challenge), (334, vec![String::new()]));
    let (code, _) = client.command(&STANDARD.encode("\0alice\0secret")).await;
    assert_eq!(code, 235);
    assert_eq!(client.code("AUTH PLAIN").await, 503);

    assert_eq!(client.code("MAIL FROM:<alice@example.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<bob@example.org>").await, 250);
    assert_eq!(client.code("DATA").await, 354);
    assert_eq!(client.code("hi\r\n.").await, 250);

    let envelopes = queue.envelopes().await;
    assert_eq!(envelopes[0].client.auth.as_deref(), Some("alice"));
    edge.stop().await;
}

#[tokio::test]
async fn test_auth_login() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge("", queue, None, Some(credentials())).await;
    let mut client = connect(&edge).await;

    assert_eq!(client.code("EHLO client.test").await, 250);

    let (code, lines) = client.command("AUTH LOGIN").await;
    assert_eq!((code, lines), (334, vec!["VXNlcm5hbWU6".to_string()]));
    let (code, lines) = client.command(&STANDARD.encode("alice")).await;
    assert_eq!((code, lines), (334, vec!["UGFzc3dvcmQ6".to_string()]));
    assert_eq!(client.code(&STANDARD.encode("secret")).await, 235);

    edge.stop().await;
}

#[tokio::test]
async fn test_auth_not_offered() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge("", queue, None, None).await;
    let mut client = connect(&edge).await;

    assert_eq!(client.code("EHLO client.test").await, 250);
    assert_eq!(client.code("AUTH PLAIN AGFsaWNlAHNlY3JldA==").await, 502);
    assert_eq!(client.code("STARTTLS").await, 502);

    edge.stop().await;
}

#[tokio::test]
async fn test_command_timeout() {
    let queue = Arc::new(RecordingQueue::default());
    let edge = start_edge_with_timeouts(
        queue,
        Timeouts {
            command: Duration::from_millis(200),
            data: Duration::from_secs(30),
        },
    )
    .await;
    let mut client = connect(&edge).await;

    let (code, _) = client.reply().await;
    assert_eq!(code, 421);
    assert!(client.is_closed().await);

    edge.stop().await;
}
