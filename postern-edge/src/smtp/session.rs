use std::{future::Future, sync::Arc, time::Duration};

use postern_common::{ClientInfo, Envelope, incoming, internal, outgoing};
use tokio::{net::TcpStream, sync::watch};

use super::{
    Context,
    command::{Command, HeloVariant},
    connection::Connection,
};
use crate::{
    auth::{self, MECHANISMS},
    error::SessionError,
    status::Status,
    validators::Rejection,
};

/// RFC 5321 limit on a command line, plus headroom for extensions.
const COMMAND_LINE_LIMIT: usize = 2048;
/// Body lines may legitimately run well past 1000 octets.
const DATA_LINE_LIMIT: usize = 1024 * 1024;

/// The envelope being assembled between `MAIL FROM` and the end of `DATA`.
#[derive(Debug, Default)]
struct Transaction {
    sender: Option<String>,
    recipients: Vec<String>,
}

pub(crate) struct Session {
    context: Arc<Context>,
    connection: Connection,
    client: ClientInfo,
    greeted: bool,
    transaction: Transaction,
    shutdown: watch::Receiver<bool>,
}

/// What to do after handling a command.
enum Next {
    Continue,
    Close,
}

impl Session {
    pub(crate) fn new(
        context: Arc<Context>,
        stream: TcpStream,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let client = ClientInfo {
            peer: stream.peer_addr().ok(),
            ..ClientInfo::default()
        };

        Self {
            context,
            connection: Connection::new(stream),
            client,
            greeted: false,
            transaction: Transaction::default(),
            shutdown,
        }
    }

    fn hostname(&self) -> &str {
        &self.context.config.hostname
    }

    async fn reply(&mut self, status: Status, message: &str) -> Result<(), SessionError> {
        outgoing!("{status} {message}");
        self.connection.send(status, &[message]).await
    }

    async fn reject(&mut self, rejection: Rejection) -> Result<(), SessionError> {
        self.reply(rejection.status, &rejection.message).await
    }

    /// Run `operation` unless the edge is told to stop first, or `limit`
    /// passes.
    async fn guarded<T>(
        shutdown: &mut watch::Receiver<bool>,
        limit: Duration,
        what: &'static str,
        operation: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<Option<T>, SessionError> {
        tokio::select! {
            biased;
            () = stopped(shutdown) => Ok(None),
            result = tokio::time::timeout(limit, operation) => match result {
                Ok(outcome) => outcome.map(Some),
                Err(_) => Err(SessionError::Timeout(what)),
            },
        }
    }

    /// Serve the client until it quits, the connection fails or the edge
    /// stops.
    pub(crate) async fn run(mut self) -> Result<(), SessionError> {
        let result = self.serve().await;

        if let Err(SessionError::Timeout(what)) = &result {
            internal!(level = DEBUG, "Client timed out waiting for {what}");
            let _ = self
                .reply(Status::Unavailable, "4.4.2 Timeout, closing connection")
                .await;
        }

        self.connection.close().await;
        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        if self.context.config.tls_immediately
            && let Some(acceptor) = self.context.acceptor.clone()
        {
            self.connection.upgrade(&acceptor).await?;
            self.client.tls = true;
        }

        if !self.greet().await? {
            return Ok(());
        }

        loop {
            let timeout = self.context.config.timeouts.command;
            let line = Self::guarded(
                &mut self.shutdown,
                timeout,
                "command",
                self.connection.read_line(COMMAND_LINE_LIMIT),
            )
            .await;

            let line = match line {
                Ok(Some(Some(line))) => line,
                Ok(Some(None)) => return Ok(()),
                Ok(None) => return self.shutting_down().await,
                Err(SessionError::LineTooLong(limit)) => {
                    self.reply(Status::SyntaxError, "5.5.2 Line too long").await?;
                    return Err(SessionError::LineTooLong(limit));
                }
                Err(err) => return Err(err),
            };

            let line = String::from_utf8_lossy(&line);
            let command = Command::try_from(line.as_ref()).unwrap_or_else(|invalid| invalid);
            incoming!("{command}");

            if let Next::Close = self.handle(command).await? {
                return Ok(());
            }
        }
    }

    async fn shutting_down(&mut self) -> Result<(), SessionError> {
        let message = format!("4.3.0 {} Server shutting down", self.hostname());
        self.reply(Status::Unavailable, &message).await
    }

    /// Send the greeting, or the rejection a validator asks for.
    async fn greet(&mut self) -> Result<bool, SessionError> {
        let mut banner = None;
        for validator in &self.context.validators {
            match validator.banner(&self.client).await {
                Ok(Some(text)) => banner = Some(text),
                Ok(None) => {}
                Err(rejection) => {
                    self.reject(rejection).await?;
                    return Ok(false);
                }
            }
        }

        let banner = banner.unwrap_or_else(|| format!("{} ESMTP Postern", self.hostname()));
        self.reply(Status::ServiceReady, &banner).await?;
        Ok(true)
    }

    async fn handle(&mut self, command: Command) -> Result<Next, SessionError> {
        match command {
            Command::Helo(variant) => self.helo(variant).await?,
            Command::StartTls => return self.starttls().await,
            Command::Auth { mechanism, initial } => self.auth(&mechanism, initial).await?,
            Command::MailFrom { sender, size } => self.mail(sender, size).await?,
            Command::RcptTo(recipient) => self.rcpt(recipient).await?,
            Command::Data => self.data().await?,
            Command::Rset => {
                self.transaction = Transaction::default();
                self.reply(Status::Ok, "2.0.0 Ok").await?;
            }
            Command::Noop => self.reply(Status::Ok, "2.0.0 Ok").await?,
            Command::Quit => {
                self.reply(Status::GoodBye, "2.0.0 Bye").await?;
                return Ok(Next::Close);
            }
            Command::Invalid(_) => {
                self.reply(Status::SyntaxError, "5.5.2 Syntax error, command unrecognized")
                    .await?;
            }
        }

        Ok(Next::Continue)
    }

    fn extensions(&self) -> Vec<String> {
        let mut extensions = vec![
            self.hostname().to_string(),
            "8BITMIME".to_string(),
            "PIPELINING".to_string(),
            "ENHANCEDSTATUSCODES".to_string(),
            format!("SIZE {}", self.context.config.max_size),
        ];

        if self.context.acceptor.is_some() && !self.connection.is_tls() {
            extensions.push("STARTTLS".to_string());
        }
        if self.context.authenticator.is_some() {
            extensions.push(format!("AUTH {MECHANISMS}"));
        }

        extensions
    }

    async fn helo(&mut self, variant: HeloVariant) -> Result<(), SessionError> {
        let (name, extended) = match variant {
            HeloVariant::Ehlo(name) => (name, true),
            HeloVariant::Helo(name) => (name, false),
        };

        for validator in &self.context.validators {
            if let Err(rejection) = validator.ehlo(&name, &self.client).await {
                return self.reject(rejection).await;
            }
        }

        self.client.ehlo = Some(name);
        self.greeted = true;
        self.transaction = Transaction::default();

        if extended {
            let extensions = self.extensions();
            outgoing!("{} {}", Status::Ok, extensions.join(", "));
            let lines: Vec<&str> = extensions.iter().map(String::as_str).collect();
            self.connection.send(Status::Ok, &lines).await
        } else {
            let hostname = self.hostname().to_string();
            self.reply(Status::Ok, &hostname).await
        }
    }

    async fn starttls(&mut self) -> Result<Next, SessionError> {
        let acceptor = match &self.context.acceptor {
            Some(acceptor) if !self.connection.is_tls() => acceptor.clone(),
            _ => {
                self.reply(Status::NotImplemented, "5.5.1 STARTTLS not available")
                    .await?;
                return Ok(Next::Continue);
            }
        };

        self.reply(Status::ServiceReady, "2.0.0 Ready to start TLS").await?;
        self.connection.upgrade(&acceptor).await?;

        // The client must greet again over the encrypted channel.
        self.client.tls = true;
        self.client.ehlo = None;
        self.greeted = false;
        self.transaction = Transaction::default();

        Ok(Next::Continue)
    }

    /// Read one SASL response line after sending `challenge`.
    async fn challenge(&mut self, challenge: &str) -> Result<Option<String>, SessionError> {
        self.reply(Status::AuthContinue, challenge).await?;

        let timeout = self.context.config.timeouts.command;
        let line = Self::guarded(
            &mut self.shutdown,
            timeout,
            "authentication",
            self.connection.read_line(COMMAND_LINE_LIMIT),
        )
        .await?
        .flatten();

        Ok(line.map(|line| String::from_utf8_lossy(&line).into_owned()))
    }

    async fn auth(&mut self, mechanism: &str, initial: Option<String>) -> Result<(), SessionError> {
        let Some(authenticator) = self.context.authenticator.clone() else {
            return self
                .reply(Status::NotImplemented, "5.5.1 Authentication not enabled")
                .await;
        };
        if !self.greeted {
            return self
                .reply(Status::InvalidCommandSequence, "5.5.1 Send EHLO first")
                .await;
        }
        if self.client.auth.is_some() {
            return self
                .reply(Status::InvalidCommandSequence, "5.5.1 Already authenticated")
                .await;
        }
        if self.transaction.sender.is_some() {
            return self
                .reply(
                    Status::InvalidCommandSequence,
                    "5.5.1 AUTH not permitted during a mail transaction",
                )
                .await;
        }

        let credentials = match mechanism {
            "PLAIN" => {
                let response = match initial {
                    Some(initial) => Some(initial),
                    None => self.challenge("").await?,
                };
                response
                    .and_then(|response| sasl_decode(&response))
                    .and_then(|decoded| auth::split_plain(&decoded))
            }
            "LOGIN" => {
                let identity = match initial {
                    Some(initial) => Some(initial),
                    None => self.challenge(&auth::encode("Username:")).await?,
                };
                let identity = identity.and_then(|identity| sasl_decode(&identity));
                match identity {
                    Some(identity) => self
                        .challenge(&auth::encode("Password:"))
                        .await?
                        .and_then(|secret| sasl_decode(&secret))
                        .map(|secret| (identity, secret)),
                    None => None,
                }
            }
            _ => {
                return self
                    .reply(
                        Status::ParameterNotImplemented,
                        "5.5.4 Unrecognized authentication type",
                    )
                    .await;
            }
        };

        let Some((identity, secret)) = credentials else {
            return self
                .reply(Status::ParameterError, "5.5.2 Malformed authentication response")
                .await;
        };

        if authenticator.verify(&identity, &secret).await {
            internal!(level = INFO, "Client authenticated as {identity}");
            self.client.auth = Some(identity);
            self.reply(Status::AuthSuccess, "2.7.0 Authentication successful")
                .await
        } else {
            internal!(level = INFO, "Authentication failed for {identity}");
            self.reply(Status::AuthFailed, "5.7.8 Authentication credentials invalid")
                .await
        }
    }

    async fn mail(&mut self, sender: String, size: Option<usize>) -> Result<(), SessionError> {
        if !self.greeted {
            return self
                .reply(Status::InvalidCommandSequence, "5.5.1 Send HELO/EHLO first")
                .await;
        }
        if self.transaction.sender.is_some() {
            return self
                .reply(Status::InvalidCommandSequence, "5.5.1 Sender already specified")
                .await;
        }
        if size.is_some_and(|size| size > self.context.config.max_size) {
            return self
                .reply(
                    Status::ExceededStorage,
                    "5.3.4 Message size exceeds fixed maximum message size",
                )
                .await;
        }

        for validator in &self.context.validators {
            if let Err(rejection) = validator.mail(&sender, &self.client).await {
                return self.reject(rejection).await;
            }
        }

        let message = format!("2.1.0 Sender <{sender}> Ok");
        self.transaction.sender = Some(sender);
        self.reply(Status::Ok, &message).await
    }

    async fn rcpt(&mut self, recipient: String) -> Result<(), SessionError> {
        if self.transaction.sender.is_none() {
            return self
                .reply(Status::InvalidCommandSequence, "5.5.1 Need MAIL before RCPT")
                .await;
        }

        for validator in &self.context.validators {
            if let Err(rejection) = validator.rcpt(&recipient, &self.client).await {
                return self.reject(rejection).await;
            }
        }

        let message = format!("2.1.5 Recipient <{recipient}> Ok");
        self.transaction.recipients.push(recipient);
        self.reply(Status::Ok, &message).await
    }

    async fn data(&mut self) -> Result<(), SessionError> {
        if self.transaction.recipients.is_empty() {
            return self
                .reply(Status::InvalidCommandSequence, "5.5.1 No valid recipients")
                .await;
        }

        self.reply(Status::StartMailInput, "Start mail input; end with <CRLF>.<CRLF>")
            .await?;

        let max_size = self.context.config.max_size;
        let timeout = self.context.config.timeouts.data;
        let data = Self::guarded(
            &mut self.shutdown,
            timeout,
            "message data",
            self.connection.read_data(max_size, DATA_LINE_LIMIT),
        )
        .await?;

        let transaction = std::mem::take(&mut self.transaction);
        let data = match data {
            None => return self.shutting_down().await,
            Some(None) => {
                return self
                    .reply(
                        Status::ExceededStorage,
                        "5.3.4 Message size exceeds fixed maximum message size",
                    )
                    .await;
            }
            Some(Some(data)) => data,
        };

        let mut envelope = Envelope::new(
            transaction.sender.unwrap_or_default(),
            transaction.recipients,
            data,
        );
        envelope.client = self.client.clone();

        for validator in &self.context.validators {
            if let Err(rejection) = validator.data(&envelope).await {
                return self.reject(rejection).await;
            }
        }

        match self.context.queue.enqueue(envelope).await {
            Ok(ids) => {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                internal!(level = INFO, "Message queued as {}", ids.join(", "));
                self.reply(Status::Ok, "2.6.0 Message accepted for delivery")
                    .await
            }
            Err(err) if err.is_permanent() => {
                internal!(level = INFO, "Message rejected: {err}");
                let message = format!("5.6.0 {err}");
                self.reply(Status::TransactionFailed, &message).await
            }
            Err(err) => {
                internal!(level = WARN, "Unable to queue message: {err}");
                self.reply(
                    Status::ActionUnavailable,
                    "4.3.0 Message not accepted, try again later",
                )
                .await
            }
        }
    }
}

fn sasl_decode(response: &str) -> Option<String> {
    if response.trim() == "*" {
        return None;
    }
    auth::decode(response)
}

/// Resolve once the edge has been told to stop.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
