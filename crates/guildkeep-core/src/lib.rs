#![forbid(unsafe_code)]

mod graph;
mod resolve;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use graph::{GraphError, GuildGraph, MAX_GUILD_GROUPS};
pub use resolve::{resolve, HeldNodes, ResolveError};

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "guildkeep"
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("snowflake id is invalid")]
    InvalidSnowflake,
    #[error("group id is invalid")]
    InvalidGroupId,
    #[error("group name is invalid")]
    InvalidGroupName,
    #[error("permission node is invalid")]
    InvalidPermissionNode,
    #[error("panel kind is invalid")]
    InvalidPanelKind,
    #[error("log event is invalid")]
    InvalidLogEvent,
}

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "u64", into = "u64")]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl TryFrom<u64> for $name {
            type Error = DomainError;

            fn try_from(value: u64) -> Result<Self, Self::Error> {
                if value == 0 {
                    return Err(DomainError::InvalidSnowflake);
                }
                Ok(Self(value))
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| DomainError::InvalidSnowflake)?;
                Self::try_from(parsed)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake_id!(
    /// Platform id of a guild, the tenant boundary for every setting and group.
    GuildId
);
snowflake_id!(UserId);
snowflake_id!(RoleId);
snowflake_id!(ChannelId);
snowflake_id!(MessageId);

/// Admin-chosen identifier of a permission group, unique within its guild.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_slug(&value).map_err(|()| DomainError::InvalidGroupId)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for GroupId {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<GroupId> for String {
    fn from(value: GroupId) -> Self {
        value.0
    }
}

impl core::fmt::Display for GroupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for GroupName {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<GroupName> for String {
    fn from(value: GroupName) -> Self {
        value.0
    }
}

/// A dot-segmented capability string such as `moderation.ban`.
///
/// The final segment may be `*`, in which case the node is a wildcard that
/// covers every node sharing its prefix. A bare `*` covers everything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionNode(String);

impl PermissionNode {
    pub const WILDCARD: &'static str = "*";

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD || self.0.ends_with(".*")
    }

    /// Returns true if holding `self` grants `required`.
    ///
    /// Wildcards are only meaningful on the held side: holding `moderation.ban`
    /// does not satisfy a requirement of `moderation.*`.
    #[must_use]
    pub fn satisfies(&self, required: &PermissionNode) -> bool {
        if self.0 == required.0 || self.0 == Self::WILDCARD {
            return true;
        }
        match self.0.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('.') => required.0.starts_with(prefix),
            _ => false,
        }
    }
}

impl TryFrom<String> for PermissionNode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_permission_node(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for PermissionNode {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<PermissionNode> for String {
    fn from(value: PermissionNode) -> Self {
        value.0
    }
}

impl core::fmt::Display for PermissionNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named bundle of roles and directly granted nodes with at most one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub id: GroupId,
    pub name: GroupName,
    #[serde(default)]
    pub roles: BTreeSet<RoleId>,
    #[serde(default)]
    pub nodes: BTreeSet<PermissionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<GroupId>,
}

impl PermissionGroup {
    #[must_use]
    pub fn new(id: GroupId, name: GroupName) -> Self {
        Self {
            id,
            name,
            roles: BTreeSet::new(),
            nodes: BTreeSet::new(),
            parent: None,
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    MessageDelete,
    MessageEdit,
    MemberJoin,
    MemberLeave,
    Moderation,
}

impl LogEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MessageDelete => "message_delete",
            Self::MessageEdit => "message_edit",
            Self::MemberJoin => "member_join",
            Self::MemberLeave => "member_leave",
            Self::Moderation => "moderation",
        }
    }
}

impl TryFrom<String> for LogEvent {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "message_delete" => Ok(Self::MessageDelete),
            "message_edit" => Ok(Self::MessageEdit),
            "member_join" => Ok(Self::MemberJoin),
            "member_leave" => Ok(Self::MemberLeave),
            "moderation" => Ok(Self::Moderation),
            _ => Err(DomainError::InvalidLogEvent),
        }
    }
}

/// Kind of a bot-owned panel message, e.g. `tickets` or `roles`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PanelKind(String);

impl PanelKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PanelKind {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_slug(&value).map_err(|()| DomainError::InvalidPanelKind)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for PanelKind {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<PanelKind> for String {
    fn from(value: PanelKind) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedPanel {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Per-guild settings. Every field is optional; an unknown guild reads as
/// [`GuildSettings::default`].
///
/// `None` and an empty map are distinct and both survive a storage round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_log_channels: Option<BTreeMap<LogEvent, ChannelId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation_role: Option<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_panels: Option<BTreeMap<PanelKind, PinnedPanel>>,
}

impl GuildSettings {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Channel that should receive `event` logs, falling back to the general log channel.
    #[must_use]
    pub fn log_channel_for(&self, event: LogEvent) -> Option<ChannelId> {
        self.event_log_channels
            .as_ref()
            .and_then(|channels| channels.get(&event).copied())
            .or(self.log_channel)
    }

    #[must_use]
    pub fn pinned_panel(&self, kind: &PanelKind) -> Option<PinnedPanel> {
        self.pinned_panels
            .as_ref()
            .and_then(|panels| panels.get(kind).copied())
    }
}

fn validate_slug(value: &str) -> Result<(), ()> {
    if !(1..=32).contains(&value.len()) {
        return Err(());
    }
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Ok(());
    }
    Err(())
}

fn validate_name(value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    if !(min..=max).contains(&value.len()) {
        return Err(DomainError::InvalidGroupName);
    }

    if value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Ok(());
    }

    Err(DomainError::InvalidGroupName)
}

fn validate_permission_node(value: &str) -> Result<(), DomainError> {
    if !(1..=128).contains(&value.len()) {
        return Err(DomainError::InvalidPermissionNode);
    }
    if value == PermissionNode::WILDCARD {
        return Ok(());
    }

    let mut segments = value.split('.').peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if is_last && segment == PermissionNode::WILDCARD {
            break;
        }
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(DomainError::InvalidPermissionNode);
        }
    }
    Ok(())
}
