//! Bus match expressions.
//!
//! A match rule is a comma-separated list of `key='value'` pairs in the
//! D-Bus match-rule syntax, for example:
//!
//! ```text
//! type='signal',interface='org.freedesktop.DBus.Properties',member='PropertiesChanged',path='/xyz/openbmc_project/bmc_group'
//! ```
//!
//! Supported keys are `type`, `sender`, `interface`, `member`, `path`,
//! `path_namespace` and `arg0`. Only `type='signal'` is accepted because the
//! bus only delivers signals. Every other key narrows the match; an absent key
//! matches anything.

use std::fmt;

use crate::bus::message::Notification;
use crate::constants::{PROPERTIES_CHANGED_MEMBER, PROPERTIES_INTERFACE};
use crate::error::TaskError;

/// A parsed, validated match expression.
///
/// # Examples
///
/// ```
/// use redfish_tasks::bus::{MatchRule, Notification};
///
/// let rule = MatchRule::parse(
///     "type='signal',member='PropertiesChanged',path='/xyz/openbmc_project/bmc_group'",
/// ).unwrap();
///
/// let hit = Notification::signal(
///     "/xyz/openbmc_project/bmc_group",
///     "org.freedesktop.DBus.Properties",
///     "PropertiesChanged",
/// );
/// assert!(rule.matches(&hit));
///
/// assert!(MatchRule::parse("path=/unquoted").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    sender: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    path: Option<String>,
    path_namespace: Option<String>,
    arg0: Option<String>,
}

impl MatchRule {
    /// Parses a match expression.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidMatchRule`] when the rule is empty, a value
    /// is not single-quoted, a key is unknown or repeated, `type` is not
    /// `signal`, or a path is not absolute.
    pub fn parse(rule: &str) -> Result<Self, TaskError> {
        let invalid = |reason: String| TaskError::InvalidMatchRule {
            rule: rule.to_string(),
            reason,
        };

        if rule.trim().is_empty() {
            return Err(invalid("rule is empty".to_string()));
        }

        let mut parsed = Self::default();
        let mut seen_type = false;
        let mut rest = rule;

        loop {
            let (key, after_eq) = rest
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key='value' near '{}'", rest.trim())))?;
            let key = key.trim();
            let after_eq = after_eq
                .strip_prefix('\'')
                .ok_or_else(|| invalid(format!("value for '{key}' must be single-quoted")))?;
            let (value, after_value) = after_eq
                .split_once('\'')
                .ok_or_else(|| invalid(format!("unterminated value for '{key}'")))?;

            let slot = match key {
                "type" => {
                    if seen_type {
                        return Err(invalid("duplicate key 'type'".to_string()));
                    }
                    if value != "signal" {
                        return Err(invalid(format!("unsupported type '{value}'")));
                    }
                    seen_type = true;
                    None
                }
                "sender" => Some(&mut parsed.sender),
                "interface" => Some(&mut parsed.interface),
                "member" => Some(&mut parsed.member),
                "path" => Some(&mut parsed.path),
                "path_namespace" => Some(&mut parsed.path_namespace),
                "arg0" => Some(&mut parsed.arg0),
                other => return Err(invalid(format!("unknown key '{other}'"))),
            };
            if let Some(slot) = slot {
                if slot.is_some() {
                    return Err(invalid(format!("duplicate key '{key}'")));
                }
                if matches!(key, "path" | "path_namespace") && !value.starts_with('/') {
                    return Err(invalid(format!("{key} '{value}' is not absolute")));
                }
                *slot = Some(value.to_string());
            }

            let after_value = after_value.trim_start();
            if after_value.is_empty() {
                break;
            }
            rest = after_value
                .strip_prefix(',')
                .ok_or_else(|| invalid(format!("expected ',' before '{after_value}'")))?;
        }

        if parsed.path.is_some() && parsed.path_namespace.is_some() {
            return Err(invalid(
                "path and path_namespace are mutually exclusive".to_string(),
            ));
        }

        Ok(parsed)
    }

    /// `PropertiesChanged` signals emitted on `path`.
    pub fn properties_changed(path: &str) -> Result<Self, TaskError> {
        Self::parse(&format!(
            "type='signal',interface='{PROPERTIES_INTERFACE}',member='{PROPERTIES_CHANGED_MEMBER}',path='{path}'"
        ))
    }

    /// Returns `true` if the notification satisfies every key of the rule.
    pub fn matches(&self, notification: &Notification) -> bool {
        fn eq(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }

        let sender_ok = match (&self.sender, &notification.sender) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected == actual,
            (Some(_), None) => false,
        };
        let namespace_ok = self.path_namespace.as_deref().map_or(true, |ns| {
            ns == "/"
                || notification.path == ns
                || notification
                    .path
                    .strip_prefix(ns)
                    .is_some_and(|tail| tail.starts_with('/'))
        });
        let arg0_ok = match &self.arg0 {
            None => true,
            Some(expected) => notification.arg0() == Some(expected.as_str()),
        };

        sender_ok
            && namespace_ok
            && arg0_ok
            && eq(&self.interface, &notification.interface)
            && eq(&self.member, &notification.member)
            && eq(&self.path, &notification.path)
    }

    /// The `path` key, if set.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type='signal'")?;
        let keys = [
            ("sender", &self.sender),
            ("interface", &self.interface),
            ("member", &self.member),
            ("path", &self.path),
            ("path_namespace", &self.path_namespace),
            ("arg0", &self.arg0),
        ];
        for (key, value) in keys {
            if let Some(value) = value {
                write!(f, ",{key}='{value}'")?;
            }
        }
        Ok(())
    }
}
