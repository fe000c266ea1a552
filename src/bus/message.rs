//! Notifications carried by the bus and the values inside their bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{PROPERTIES_CHANGED_MEMBER, PROPERTIES_INTERFACE};
use crate::error::BusError;

/// Changed properties keyed by name, as carried by `PropertiesChanged`.
pub type PropertyMap = BTreeMap<String, BusValue>;

/// A value in a notification body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusValue {
    /// String or object path.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// Any integer width.
    Int(i64),
    /// Floating point.
    Double(f64),
    /// Homogeneous array.
    Array(Vec<BusValue>),
    /// String-keyed dictionary.
    Dict(PropertyMap),
}

impl BusValue {
    /// The string, if this is a [`BusValue::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer, if this is a [`BusValue::Int`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The boolean, if this is a [`BusValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for BusValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for BusValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for BusValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for BusValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A signal published on the bus.
///
/// # Examples
///
/// ```
/// use redfish_tasks::bus::{BusValue, Notification, PropertyMap};
///
/// let mut props = PropertyMap::new();
/// props.insert("Status".into(), BusValue::from("InProgress"));
/// props.insert("Progress".into(), BusValue::Int(42));
///
/// let n = Notification::properties_changed(
///     "/xyz/openbmc_project/bmc_group",
///     "xyz.openbmc_project.BmcGroup.Manager",
///     props,
/// );
/// let (iface, changed) = n.read_properties_changed().unwrap();
/// assert_eq!(iface, "xyz.openbmc_project.BmcGroup.Manager");
/// assert_eq!(changed["Progress"].as_i64(), Some(42));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique or well-known name of the emitter, when known.
    pub sender: Option<String>,
    /// Object path the signal was emitted on.
    pub path: String,
    /// Interface of the signal.
    pub interface: String,
    /// Signal name.
    pub member: String,
    /// Signal arguments.
    pub body: Vec<BusValue>,
}

impl Notification {
    /// Creates a signal with an empty body.
    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            sender: None,
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            body: Vec::new(),
        }
    }

    /// Creates an `org.freedesktop.DBus.Properties.PropertiesChanged` signal.
    pub fn properties_changed(
        path: impl Into<String>,
        changed_interface: impl Into<String>,
        changed: PropertyMap,
    ) -> Self {
        Self {
            sender: None,
            path: path.into(),
            interface: PROPERTIES_INTERFACE.to_string(),
            member: PROPERTIES_CHANGED_MEMBER.to_string(),
            body: vec![
                BusValue::Str(changed_interface.into()),
                BusValue::Dict(changed),
                BusValue::Array(Vec::new()),
            ],
        }
    }

    /// Sets the sender.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Appends an argument.
    pub fn with_arg(mut self, arg: impl Into<BusValue>) -> Self {
        self.body.push(arg.into());
        self
    }

    /// First body argument when it is a string.
    pub fn arg0(&self) -> Option<&str> {
        self.body.first().and_then(BusValue::as_str)
    }

    /// Decodes a `PropertiesChanged` body into the changed interface name and
    /// the changed properties.
    pub fn read_properties_changed(&self) -> Result<(String, PropertyMap), BusError> {
        let interface = match self.body.first() {
            Some(BusValue::Str(iface)) => iface.clone(),
            Some(other) => {
                return Err(BusError::Decode(format!(
                    "expected interface name, found {other:?}"
                )))
            }
            None => return Err(BusError::Decode("empty body".to_string())),
        };
        match self.body.get(1) {
            Some(BusValue::Dict(props)) => Ok((interface, props.clone())),
            Some(other) => Err(BusError::Decode(format!(
                "expected property dictionary, found {other:?}"
            ))),
            None => Err(BusError::Decode("missing property dictionary".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rejects_missing_dictionary() {
        let n = Notification::signal("/a", PROPERTIES_INTERFACE, PROPERTIES_CHANGED_MEMBER)
            .with_arg("iface");
        assert_eq!(
            n.read_properties_changed().unwrap_err(),
            BusError::Decode("missing property dictionary".to_string())
        );
    }

    #[test]
    fn read_rejects_non_string_interface() {
        let n = Notification::signal("/a", PROPERTIES_INTERFACE, PROPERTIES_CHANGED_MEMBER)
            .with_arg(7_i64);
        assert!(matches!(
            n.read_properties_changed(),
            Err(BusError::Decode(_))
        ));
    }

    #[test]
    fn arg0_only_for_strings() {
        assert_eq!(Notification::signal("/a", "i", "m").with_arg("x").arg0(), Some("x"));
        assert_eq!(Notification::signal("/a", "i", "m").with_arg(true).arg0(), None);
        assert_eq!(Notification::signal("/a", "i", "m").arg0(), None);
    }
}
