//! Subject namespace for one gateway instance.

use std::fmt;

/// Immutable `<prefix>.<name>` namespace under which every subject lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayIdentity {
    namespace: String,
}

impl GatewayIdentity {
    pub fn new(prefix: &str, name: &str) -> Self {
        Self {
            namespace: format!("{prefix}.{name}"),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<ns>.status`
    pub fn status_subject(&self) -> String {
        format!("{}.status", self.namespace)
    }

    /// `<ns>.event.<kind>`
    pub fn event_subject(&self, kind: &str) -> String {
        format!("{}.event.{kind}", self.namespace)
    }

    /// `<ns>.cmd.<command>`
    pub fn command_subject(&self, command: &str) -> String {
        format!("{}.cmd.{command}", self.namespace)
    }

    /// `<ns>.cmd.>`
    pub fn commands_wildcard(&self) -> String {
        format!("{}.cmd.>", self.namespace)
    }

    /// Fallback target for replies to messages without a reply address.
    pub fn reply_subject(&self) -> String {
        format!("{}.reply", self.namespace)
    }

    /// Strip `<ns>.cmd.` from an inbound subject.
    pub fn command_suffix<'a>(&self, subject: &'a str) -> Option<&'a str> {
        subject
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(".cmd.")
            .filter(|suffix| !suffix.is_empty())
    }
}

impl fmt::Display for GatewayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)
    }
}
