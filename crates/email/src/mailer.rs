// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Send emails to users

use avs_templates::{RenewalEmailContext, Templates};
use lettre::{
    AsyncTransport, Message,
    message::{Mailbox, MessageBuilder, MultiPart},
};
use thiserror::Error;

use crate::MailTransport;

/// Placeholder replaced by the application name in the sender and the subject
pub const APP_NAME_PLACEHOLDER: &str = "%(app)s";

/// Replace the [`APP_NAME_PLACEHOLDER`] in a string by the application name
///
/// Strings without a placeholder are returned as-is.
#[must_use]
pub fn with_app_name(template: &str, app_name: &str) -> String {
    template.replace(APP_NAME_PLACEHOLDER, app_name)
}

/// Helps sending mails to users
#[derive(Clone)]
pub struct Mailer {
    templates: Templates,
    transport: MailTransport,
    from: Mailbox,
    reply_to: Mailbox,
    renewal_subject: String,
}

/// Failed to send an email
#[derive(Debug, Error)]
#[error(transparent)]
pub enum Error {
    /// The transport did not accept the message
    Transport(#[from] crate::transport::Error),

    /// A template did not render
    Templates(#[from] avs_templates::TemplateError),

    /// The message could not be built, usually because of a bad header
    Content(#[from] lettre::error::Error),
}

impl Mailer {
    /// Constructs a new [`Mailer`]
    #[must_use]
    pub fn new(
        templates: Templates,
        transport: MailTransport,
        from: Mailbox,
        reply_to: Mailbox,
        renewal_subject: String,
    ) -> Self {
        Self {
            templates,
            transport,
            from,
            reply_to,
            renewal_subject,
        }
    }

    fn base_message(&self) -> MessageBuilder {
        Message::builder()
            .from(self.from.clone())
            .reply_to(self.reply_to.clone())
            // By passing `None`, lettre generates a random message ID
            // with a random UUID and the hostname for us
            .message_id(None)
    }

    fn prepare_renewal_email(
        &self,
        to: Mailbox,
        context: &RenewalEmailContext,
    ) -> Result<Message, Error> {
        let plain = self.templates.render_email_renewal_txt(context)?;

        let html = self.templates.render_email_renewal_html(context)?;

        let multipart = MultiPart::alternative_plain_html(plain, html);

        let message = self
            .base_message()
            .subject(self.renewal_subject.trim())
            .to(to)
            .multipart(multipart)?;

        Ok(message)
    }

    /// Send the account renewal email to a user
    ///
    /// # Errors
    ///
    /// Will return `Err` if the email failed rendering or failed sending
    #[tracing::instrument(
        name = "email.renewal.send",
        skip_all,
        fields(
            email.to = %to,
        ),
    )]
    pub async fn send_renewal_email(
        &self,
        to: Mailbox,
        context: &RenewalEmailContext,
    ) -> Result<(), Error> {
        let message = self.prepare_renewal_email(to, context)?;
        self.transport.send(message).await?;
        Ok(())
    }

    /// Test the connetion to the mail server
    ///
    /// # Errors
    ///
    /// Returns an error if the connection failed
    #[tracing::instrument(name = "email.test_connection", skip_all)]
    pub async fn test_connection(&self) -> Result<(), crate::transport::Error> {
        self.transport.test_connection().await
    }
}
