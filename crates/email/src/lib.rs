// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Helps sending emails to users, with different email backends

#![deny(missing_docs)]

mod mailer;
mod transport;

pub use avs_templates::RenewalEmailContext;
pub use lettre::{
    Address, message::Mailbox, transport::smtp::authentication::Credentials as SmtpCredentials,
};

pub use self::{
    mailer::{APP_NAME_PLACEHOLDER, Error as MailerError, Mailer, with_app_name},
    transport::{SentMessage, SmtpMode, Transport as MailTransport},
};
