// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Backends the mailer hands messages to

use std::{
    collections::HashSet,
    ffi::OsString,
    num::NonZeroU16,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use lettre::{
    Address, AsyncTransport, Tokio1Executor,
    address::Envelope,
    transport::{
        sendmail::AsyncSendmailTransport,
        smtp::{AsyncSmtpTransport, authentication::Credentials},
    },
};
use thiserror::Error;

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy)]
pub enum SmtpMode {
    /// No encryption at all
    Plain,
    /// Upgrade a plain connection with `STARTTLS`
    StartTls,
    /// TLS from the start
    Tls,
}

/// Where renewal emails end up
///
/// Clones share the same backend.
#[derive(Default, Clone)]
pub struct Transport {
    backend: Arc<Backend>,
}

#[derive(Default)]
enum Backend {
    /// Drop everything, with a warning
    #[default]
    Blackhole,
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Sendmail(AsyncSendmailTransport<Tokio1Executor>),
    /// Keep messages around, for tests
    Memory(MemoryOutbox),
}

/// A message captured by the in-memory transport
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// The SMTP envelope of the message
    pub envelope: Envelope,

    /// The formatted message, headers included
    pub raw: Vec<u8>,
}

impl SentMessage {
    /// The formatted message as a string
    #[must_use]
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

#[derive(Default)]
struct MemoryOutbox {
    sent: Mutex<Vec<SentMessage>>,
    rejected: Mutex<HashSet<Address>>,
}

impl Transport {
    fn with_backend(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// A transport which drops every message
    #[must_use]
    pub fn blackhole() -> Self {
        Self::with_backend(Backend::Blackhole)
    }

    /// Relay messages through an SMTP server
    ///
    /// The port defaults to the standard one for the chosen mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS parameters for `hostname` could not be set
    /// up
    pub fn smtp(
        mode: SmtpMode,
        hostname: &str,
        port: Option<NonZeroU16>,
        credentials: Option<Credentials>,
    ) -> Result<Self, lettre::transport::smtp::Error> {
        type Smtp = AsyncSmtpTransport<Tokio1Executor>;
        let builder = match mode {
            SmtpMode::Plain => Smtp::builder_dangerous(hostname),
            SmtpMode::StartTls => Smtp::starttls_relay(hostname)?,
            SmtpMode::Tls => Smtp::relay(hostname)?,
        };

        let builder = match credentials {
            Some(credentials) => builder.credentials(credentials),
            None => builder,
        };
        let builder = match port {
            Some(port) => builder.port(port.get()),
            None => builder,
        };

        Ok(Self::with_backend(Backend::Smtp(builder.build())))
    }

    /// Pipe messages to a local `sendmail` binary, the one on the `PATH` when
    /// no command is given
    #[must_use]
    pub fn sendmail(command: Option<impl Into<OsString>>) -> Self {
        let transport = match command {
            Some(command) => AsyncSendmailTransport::new_with_command(command),
            None => AsyncSendmailTransport::new(),
        };
        Self::with_backend(Backend::Sendmail(transport))
    }

    /// A transport which records the messages it accepts
    #[doc(hidden)]
    #[must_use]
    pub fn memory() -> Self {
        Self::with_backend(Backend::Memory(MemoryOutbox::default()))
    }

    /// Make the in-memory transport refuse messages for this recipient
    #[doc(hidden)]
    pub fn reject_recipient(&self, address: Address) {
        if let Backend::Memory(outbox) = &*self.backend {
            lock(&outbox.rejected).insert(address);
        }
    }

    /// Messages accepted by the in-memory transport so far
    #[doc(hidden)]
    #[must_use]
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        match &*self.backend {
            Backend::Memory(outbox) => lock(&outbox.sent).clone(),
            _ => Vec::new(),
        }
    }

    /// Check that the SMTP server accepts connections. Other backends always
    /// succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if the SMTP server could not be reached
    pub async fn test_connection(&self) -> Result<(), Error> {
        if let Backend::Smtp(transport) = &*self.backend {
            transport.test_connection().await?;
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Error)]
#[error(transparent)]
pub enum Error {
    Smtp(#[from] lettre::transport::smtp::Error),
    Sendmail(#[from] lettre::transport::sendmail::Error),

    #[error("recipient {0} was rejected")]
    Rejected(Address),
}

#[async_trait]
impl AsyncTransport for Transport {
    type Ok = ();
    type Error = Error;

    async fn send_raw(&self, envelope: &Envelope, email: &[u8]) -> Result<Self::Ok, Self::Error> {
        match &*self.backend {
            Backend::Blackhole => {
                tracing::warn!("No email transport is configured, dropping a message");
            }
            Backend::Smtp(transport) => transport.send_raw(envelope, email).await.map(drop)?,
            Backend::Sendmail(transport) => transport.send_raw(envelope, email).await?,
            Backend::Memory(outbox) => {
                let rejected = lock(&outbox.rejected)
                    .iter()
                    .find(|address| envelope.to().contains(*address))
                    .cloned();
                if let Some(address) = rejected {
                    return Err(Error::Rejected(address));
                }

                lock(&outbox.sent).push(SentMessage {
                    envelope: envelope.clone(),
                    raw: email.to_vec(),
                });
            }
        }

        Ok(())
    }
}
