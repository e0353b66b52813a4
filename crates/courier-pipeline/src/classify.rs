// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error classification for send attempts.
//!
//! Turns a [`SendOutcome`] into what the queue should do next. Group sends are
//! judged over their explicit per-recipient error list: the batch is
//! ignorable only if every single error is.

use std::time::Duration;

use courier_core::{DestinationKind, ProtocolError, RecipientError, SendError, SendOutcome, ServiceId};

/// What the queue does with one attempt's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The send counts as done. `ignored` still lists per-recipient failures.
    Delivered { ignored: Vec<RecipientError> },
    /// Try again later, optionally only for `recipients`.
    Retry {
        error: SendError,
        delay_hint: Option<Duration>,
        recipients: Option<Vec<ServiceId>>,
        ignored: Vec<RecipientError>,
    },
    /// The server wants a challenge solved before anything else is sent.
    /// `ignored` holds the batch's other ignorable failures.
    Challenge {
        error: SendError,
        retry_after: Option<Duration>,
        recipients: Option<Vec<ServiceId>>,
        errors: Vec<RecipientError>,
        ignored: Vec<RecipientError>,
    },
    Fail {
        error: SendError,
        errors: Vec<RecipientError>,
    },
}

/// Whether one recipient's failure may be ignored for the send as a whole.
pub fn is_ignorable(kind: DestinationKind, error: &SendError) -> bool {
    match error {
        SendError::UntrustedIdentity { .. } => kind == DestinationKind::Group,
        SendError::UnregisteredUser { .. } | SendError::ChallengeRequired { .. } => true,
        _ => false,
    }
}

/// True iff every error is ignorable. One non-ignorable error poisons the batch.
pub fn can_all_errors_be_ignored(kind: DestinationKind, errors: &[RecipientError]) -> bool {
    errors.iter().all(|e| is_ignorable(kind, &e.error))
}

/// Map a protocol-store failure for `service_id` into the send taxonomy.
pub fn classify_protocol_error(service_id: &ServiceId, error: ProtocolError) -> SendError {
    match error {
        ProtocolError::UntrustedIdentity => SendError::UntrustedIdentity {
            service_id: service_id.clone(),
        },
        ProtocolError::NoSession => SendError::Fatal(format!("no session for {service_id}")),
        ProtocolError::Other(message) => SendError::Fatal(message),
    }
}

/// Decide the next step for an attempt's outcome.
pub fn resolve(kind: DestinationKind, outcome: SendOutcome) -> Resolution {
    match outcome {
        SendOutcome::Success => Resolution::Delivered {
            ignored: Vec::new(),
        },
        SendOutcome::Retryable {
            error,
            suggested_delay,
        } => {
            if error.is_retryable() {
                Resolution::Retry {
                    delay_hint: suggested_delay.or_else(|| error.retry_after()),
                    error,
                    recipients: None,
                    ignored: Vec::new(),
                }
            } else {
                Resolution::Fail {
                    error,
                    errors: Vec::new(),
                }
            }
        }
        SendOutcome::Fatal(error) => match error {
            SendError::ChallengeRequired { retry_after, .. } => Resolution::Challenge {
                retry_after,
                error,
                recipients: None,
                errors: Vec::new(),
                ignored: Vec::new(),
            },
            error => Resolution::Fail {
                error,
                errors: Vec::new(),
            },
        },
        SendOutcome::PartialFailure(errors) => resolve_partial(kind, errors),
    }
}

fn resolve_partial(kind: DestinationKind, errors: Vec<RecipientError>) -> Resolution {
    let is_challenge = |e: &RecipientError| matches!(e.error, SendError::ChallengeRequired { .. });

    // A recipient that can never succeed fails the batch, challenge or not.
    if let Some(fatal) = errors
        .iter()
        .find(|e| !is_ignorable(kind, &e.error) && !e.error.is_retryable())
    {
        return Resolution::Fail {
            error: fatal.error.clone(),
            errors,
        };
    }

    if let Some(challenge) = errors.iter().find(|e| is_challenge(e)) {
        let error = challenge.error.clone();
        let retry_after = errors.iter().filter_map(|e| e.error.retry_after()).max();
        let recipients = errors
            .iter()
            .filter(|e| is_challenge(e) || e.error.is_retryable())
            .map(|e| e.service_id.clone())
            .collect();
        let ignored = errors
            .iter()
            .filter(|e| !is_challenge(e) && is_ignorable(kind, &e.error))
            .cloned()
            .collect();
        return Resolution::Challenge {
            error,
            retry_after,
            recipients: Some(recipients),
            errors,
            ignored,
        };
    }

    if can_all_errors_be_ignored(kind, &errors) {
        return Resolution::Delivered { ignored: errors };
    }

    // Every blocking error is retryable here, and there is at least one.
    let (blocking, ignored): (Vec<_>, Vec<_>) =
        errors.into_iter().partition(|e| !is_ignorable(kind, &e.error));
    let delay_hint = blocking.iter().filter_map(|e| e.error.retry_after()).max();
    let error = blocking
        .first()
        .map(|e| e.error.clone())
        .unwrap_or_else(|| SendError::Fatal("empty failure list".into()));
    Resolution::Retry {
        error,
        delay_hint,
        recipients: Some(blocking.into_iter().map(|e| e.service_id).collect()),
        ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn svc(id: &str) -> ServiceId {
        ServiceId::from(id)
    }

    fn untrusted(id: &str) -> RecipientError {
        RecipientError::new(svc(id), SendError::UntrustedIdentity { service_id: svc(id) })
    }

    fn unregistered(id: &str) -> RecipientError {
        RecipientError::new(svc(id), SendError::UnregisteredUser { service_id: svc(id) })
    }

    fn challenge(id: &str) -> RecipientError {
        RecipientError::new(
            svc(id),
            SendError::ChallengeRequired {
                service_id: svc(id),
                retry_after: Some(Duration::from_secs(30)),
                token: None,
            },
        )
    }

    fn rate_limited(id: &str, secs: u64) -> RecipientError {
        RecipientError::new(
            svc(id),
            SendError::RateLimited {
                code: 429,
                retry_after: Some(Duration::from_secs(secs)),
            },
        )
    }

    fn fatal(id: &str) -> RecipientError {
        RecipientError::new(svc(id), SendError::Fatal("boom".into()))
    }

    #[test]
    fn untrusted_is_ignorable_only_in_groups() {
        let e = untrusted("a").error;
        assert!(is_ignorable(DestinationKind::Group, &e));
        assert!(!is_ignorable(DestinationKind::Direct, &e));
    }

    #[test]
    fn one_fatal_poisons_the_batch() {
        let errors = vec![untrusted("a"), unregistered("b"), fatal("c")];
        assert!(!can_all_errors_be_ignored(DestinationKind::Group, &errors));
        let errors = vec![untrusted("a"), unregistered("b"), challenge("c")];
        assert!(can_all_errors_be_ignored(DestinationKind::Group, &errors));
    }

    #[test]
    fn ignorable_group_failures_count_as_delivered() {
        let errors = vec![untrusted("a"), unregistered("b")];
        assert_eq!(
            resolve(DestinationKind::Group, SendOutcome::PartialFailure(errors.clone())),
            Resolution::Delivered { ignored: errors }
        );
    }

    #[test]
    fn retryable_partial_failure_narrows_recipients() {
        let errors = vec![unregistered("a"), rate_limited("b", 5), rate_limited("c", 9)];
        match resolve(DestinationKind::Group, SendOutcome::PartialFailure(errors)) {
            Resolution::Retry {
                delay_hint,
                recipients,
                ignored,
                ..
            } => {
                assert_eq!(delay_hint, Some(Duration::from_secs(9)));
                assert_eq!(recipients, Some(vec![svc("b"), svc("c")]));
                assert_eq!(ignored, vec![unregistered("a")]);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn non_retryable_partial_failure_fails() {
        let errors = vec![rate_limited("a", 5), fatal("b")];
        assert!(matches!(
            resolve(DestinationKind::Group, SendOutcome::PartialFailure(errors)),
            Resolution::Fail { error: SendError::Fatal(_), .. }
        ));
    }

    #[test]
    fn direct_untrusted_is_fatal() {
        let errors = vec![untrusted("a")];
        assert!(matches!(
            resolve(DestinationKind::Direct, SendOutcome::PartialFailure(errors)),
            Resolution::Fail { error: SendError::UntrustedIdentity { .. }, .. }
        ));
    }

    #[test]
    fn challenge_takes_precedence() {
        let errors = vec![challenge("a"), rate_limited("b", 1), unregistered("c")];
        match resolve(DestinationKind::Group, SendOutcome::PartialFailure(errors)) {
            Resolution::Challenge {
                retry_after,
                recipients,
                ignored,
                ..
            } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
                assert_eq!(recipients, Some(vec![svc("a"), svc("b")]));
                assert_eq!(ignored, vec![unregistered("c")]);
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn fatal_recipient_beats_challenge() {
        let errors = vec![challenge("a"), fatal("b"), unregistered("c")];
        match resolve(DestinationKind::Group, SendOutcome::PartialFailure(errors.clone())) {
            Resolution::Fail { error, errors: all } => {
                assert_eq!(error, SendError::Fatal("boom".into()));
                assert_eq!(all, errors);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn server_stop_is_not_retried() {
        let error = SendError::NetworkOrServer {
            code: Some(508),
            message: "stop".into(),
        };
        assert!(matches!(
            resolve(DestinationKind::Direct, SendOutcome::retryable(error)),
            Resolution::Fail { .. }
        ));
    }

    #[test]
    fn protocol_errors_map_into_taxonomy() {
        assert_eq!(
            classify_protocol_error(&svc("a"), ProtocolError::UntrustedIdentity),
            SendError::UntrustedIdentity { service_id: svc("a") }
        );
        assert!(matches!(
            classify_protocol_error(&svc("a"), ProtocolError::NoSession),
            SendError::Fatal(_)
        ));
    }

    fn any_error() -> impl Strategy<Value = RecipientError> {
        prop_oneof![
            Just(untrusted("u")),
            Just(unregistered("r")),
            Just(challenge("c")),
            Just(rate_limited("l", 1)),
            Just(fatal("f")),
        ]
    }

    proptest! {
        #[test]
        fn ignorability_is_all_or_nothing(errors in proptest::collection::vec(any_error(), 0..12)) {
            let expected = errors.iter().all(|e| matches!(
                e.error,
                SendError::UntrustedIdentity { .. }
                    | SendError::UnregisteredUser { .. }
                    | SendError::ChallengeRequired { .. }
            ));
            prop_assert_eq!(can_all_errors_be_ignored(DestinationKind::Group, &errors), expected);
        }
    }
}
