//! Post-connect handshake sequencing.
//!
//! Runs after every successful transport connect, before the session is
//! ready: AUTH (when a credential is configured), SELECT (when `db > 0`),
//! then CLIENT SETNAME (unless disabled). The first two must succeed; the
//! naming step is best-effort and never waited on.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::config::SessionConfig;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Auth,
    Select,
    SetName,
}

impl Step {
    /// Whether the handshake waits for this step's reply before moving on.
    pub fn awaits_reply(self) -> bool {
        !matches!(self, Step::SetName)
    }

    /// The error reported when this step is rejected.
    pub fn failure(self, reason: String) -> SessionError {
        match self {
            Step::Auth => SessionError::Authentication(reason),
            Step::Select | Step::SetName => SessionError::Connect(reason),
        }
    }
}

/// The remaining steps for one connection.
#[derive(Debug)]
pub(crate) struct Handshake {
    steps: VecDeque<(Step, Vec<Bytes>)>,
}

impl Handshake {
    pub fn new(config: &SessionConfig) -> Self {
        let mut steps = VecDeque::with_capacity(3);

        if let Some(credential) = &config.credential {
            let mut args = vec![Bytes::from_static(b"AUTH")];
            if let Some(username) = &config.username {
                args.push(Bytes::from(username.clone()));
            }
            args.push(Bytes::from(credential.clone()));
            steps.push_back((Step::Auth, args));
        }

        if config.db > 0 {
            steps.push_back((
                Step::Select,
                vec![
                    Bytes::from_static(b"SELECT"),
                    Bytes::from(config.db.to_string()),
                ],
            ));
        }

        if !config.skip_client_naming {
            steps.push_back((
                Step::SetName,
                vec![
                    Bytes::from_static(b"CLIENT"),
                    Bytes::from_static(b"SETNAME"),
                    Bytes::from(config.client_name()),
                ],
            ));
        }

        Self { steps }
    }

    /// The next step to run and its command, or `None` when complete.
    pub fn next_step(&mut self) -> Option<(Step, Vec<Bytes>)> {
        self.steps.pop_front()
    }
}
