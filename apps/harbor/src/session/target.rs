//! Target strings: `[session][:[window][.pane]]`.
//!
//! Empty parts mean "current". `$N`, `@N` and `%N` address sessions,
//! windows and panes by id. A bare word (no `:` or `.`) names whatever the
//! command targets: a session for session commands, a window for window
//! commands, and for pane commands a pane index when numeric, else a session.

use super::error::StoreError;
use super::model::{PaneId, SessionId, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Session,
    Window,
    Pane,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub session: Option<String>,
    pub window: Option<String>,
    pub pane: Option<String>,
}

impl Target {
    pub fn current() -> Self {
        Self::default()
    }

    pub fn parse(spec: &str, kind: TargetKind) -> Result<Self, StoreError> {
        let spec = spec.trim();
        let target = if spec.is_empty() {
            Self::default()
        } else if spec.starts_with('%') {
            Self {
                pane: Some(spec.to_string()),
                ..Self::default()
            }
        } else if let Some((session, rest)) = spec.split_once(':') {
            let (window, pane) = split_window_pane(rest);
            Self {
                session: non_empty(session),
                window,
                pane,
            }
        } else if spec.contains('.') || spec.starts_with('@') {
            let (window, pane) = split_window_pane(spec);
            Self {
                window,
                pane,
                ..Self::default()
            }
        } else if spec.starts_with('$') {
            Self {
                session: Some(spec.to_string()),
                ..Self::default()
            }
        } else {
            match kind {
                TargetKind::Session => Self {
                    session: Some(spec.to_string()),
                    ..Self::default()
                },
                TargetKind::Window => Self {
                    window: Some(spec.to_string()),
                    ..Self::default()
                },
                TargetKind::Pane if spec.bytes().all(|b| b.is_ascii_digit()) => Self {
                    pane: Some(spec.to_string()),
                    ..Self::default()
                },
                TargetKind::Pane => Self {
                    session: Some(spec.to_string()),
                    ..Self::default()
                },
            }
        };
        target.validate(spec)?;
        Ok(target)
    }

    pub fn is_current(&self) -> bool {
        self.session.is_none() && self.window.is_none() && self.pane.is_none()
    }

    fn validate(&self, spec: &str) -> Result<(), StoreError> {
        let bad_id = |part: &Option<String>, sigil: char, valid: fn(&str) -> bool| {
            part.as_deref()
                .is_some_and(|text| text.starts_with(sigil) && !valid(text))
        };
        if bad_id(&self.session, '$', |t| SessionId::parse(t).is_some())
            || bad_id(&self.window, '@', |t| WindowId::parse(t).is_some())
            || bad_id(&self.pane, '%', |t| PaneId::parse(t).is_some())
        {
            return Err(StoreError::InvalidTarget(spec.to_string()));
        }
        Ok(())
    }
}

fn split_window_pane(text: &str) -> (Option<String>, Option<String>) {
    match text.split_once('.') {
        Some((window, pane)) => (non_empty(window), non_empty(pane)),
        None => (non_empty(text), None),
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(target: &Target) -> (Option<&str>, Option<&str>, Option<&str>) {
        (
            target.session.as_deref(),
            target.window.as_deref(),
            target.pane.as_deref(),
        )
    }

    #[test]
    fn full_and_partial_paths() {
        let full = Target::parse("work:2.1", TargetKind::Pane).unwrap();
        assert_eq!(parts(&full), (Some("work"), Some("2"), Some("1")));

        let window_only = Target::parse(":3", TargetKind::Pane).unwrap();
        assert_eq!(parts(&window_only), (None, Some("3"), None));

        let pane_in_current = Target::parse(":.2", TargetKind::Pane).unwrap();
        assert_eq!(parts(&pane_in_current), (None, None, Some("2")));

        let session_only = Target::parse("work:", TargetKind::Pane).unwrap();
        assert_eq!(parts(&session_only), (Some("work"), None, None));

        assert!(Target::parse("", TargetKind::Pane).unwrap().is_current());
    }

    #[test]
    fn ids_address_directly() {
        let pane = Target::parse("%12", TargetKind::Session).unwrap();
        assert_eq!(parts(&pane), (None, None, Some("%12")));

        let window = Target::parse("@4", TargetKind::Pane).unwrap();
        assert_eq!(parts(&window), (None, Some("@4"), None));

        let session = Target::parse("$1", TargetKind::Window).unwrap();
        assert_eq!(parts(&session), (Some("$1"), None, None));
    }

    #[test]
    fn bare_word_depends_on_kind() {
        let session = Target::parse("dev", TargetKind::Session).unwrap();
        assert_eq!(parts(&session), (Some("dev"), None, None));
        let window = Target::parse("dev", TargetKind::Window).unwrap();
        assert_eq!(parts(&window), (None, Some("dev"), None));
        let pane_index = Target::parse("3", TargetKind::Pane).unwrap();
        assert_eq!(parts(&pane_index), (None, None, Some("3")));
        let pane_session = Target::parse("dev", TargetKind::Pane).unwrap();
        assert_eq!(parts(&pane_session), (Some("dev"), None, None));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert_eq!(
            Target::parse("%abc", TargetKind::Pane),
            Err(StoreError::InvalidTarget("%abc".to_string()))
        );
        assert!(Target::parse("work:@x", TargetKind::Window).is_err());
        assert!(Target::parse("$", TargetKind::Session).is_err());
    }
}
