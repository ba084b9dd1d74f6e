//! Domain model for assignments, actors and repository bindings

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Local identifier of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub i64);

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local identifier of a student account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub i64);

/// Local identifier of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Local identifier of a repository binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingId(pub i64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the owner of a binding: a single student or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ActorRef {
    Student(StudentId),
    Group(GroupId),
}

impl ActorRef {
    /// Kind of actor as stored in the database
    pub fn kind(&self) -> &'static str {
        match self {
            ActorRef::Student(_) => "student",
            ActorRef::Group(_) => "group",
        }
    }

    /// Raw local id of the actor
    pub fn raw_id(&self) -> i64 {
        match self {
            ActorRef::Student(id) => id.0,
            ActorRef::Group(id) => id.0,
        }
    }

    /// Rebuild a reference from its stored kind and id
    pub fn from_parts(kind: &str, id: i64) -> Result<Self> {
        match kind {
            "student" => Ok(ActorRef::Student(StudentId(id))),
            "group" => Ok(ActorRef::Group(GroupId(id))),
            other => Err(Error::Other(format!("Unknown actor kind: {}", other))),
        }
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.raw_id())
    }
}

impl FromStr for ActorRef {
    type Err = Error;

    /// Parse `student:12` or `group:7`
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::Other(format!("Invalid actor reference: {}", s)))?;
        let id = id
            .parse::<i64>()
            .map_err(|_| Error::Other(format!("Invalid actor id in: {}", s)))?;
        Self::from_parts(kind, id)
    }
}

/// The organization that owns provisioned repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Numeric id on the remote host
    pub id: u64,
    /// Login (used in `owner/name` paths)
    pub login: String,
}

/// Repository visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Build from an assignment's `public_repo` flag
    pub fn from_public_flag(public_repo: bool) -> Self {
        if public_repo {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Visibility::Private)
    }
}

/// Permission granted to an actor on its repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Push,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Push => "push",
            Permission::Admin => "admin",
        }
    }
}

/// Template for repository creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    /// URL-safe slug, prefix of every repository name
    pub slug: String,
    pub title: String,
    /// Organization the repositories are created under
    pub organization: Organization,
    /// Remote repository id to import starter code from
    pub starter_code_repo_id: Option<u64>,
    pub visibility: Visibility,
    /// Grant admin instead of push on the actor's repository
    pub students_are_repo_admins: bool,
}

impl Assignment {
    /// Permission level for actors on repositories of this assignment
    pub fn permission(&self) -> Permission {
        if self.students_are_repo_admins {
            Permission::Admin
        } else {
            Permission::Push
        }
    }
}

/// Individual student account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    /// Login on the remote host
    pub login: String,
}

/// An account that should receive remote access through a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAccess {
    pub student_id: StudentId,
    pub login: String,
}

/// A group of students sharing one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub slug: String,
    pub title: String,
    /// Remote team mirroring this group, if one exists
    pub team_id: Option<u64>,
    /// Accounts that should have access to the group's repository
    pub repo_accesses: Vec<RepoAccess>,
}

/// A resolved actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Actor {
    Student(Student),
    Group(Group),
}

impl Actor {
    pub fn reference(&self) -> ActorRef {
        match self {
            Actor::Student(s) => ActorRef::Student(s.id),
            Actor::Group(g) => ActorRef::Group(g.id),
        }
    }

    /// Name fragment used for the remote repository
    pub fn slug(&self) -> &str {
        match self {
            Actor::Student(s) => &s.login,
            Actor::Group(g) => &g.slug,
        }
    }
}

/// A repository on the remote host; only the facts the core retains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub id: u64,
    /// `owner/name`
    pub full_name: String,
}

impl RemoteRepository {
    pub fn new(id: u64, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
        }
    }
}

/// Unique key of a binding: one per actor per assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    pub assignment_id: AssignmentId,
    pub actor: ActorRef,
}

impl BindingKey {
    pub fn new(assignment_id: AssignmentId, actor: ActorRef) -> Self {
        Self {
            assignment_id,
            actor,
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assignment:{}/{}", self.assignment_id, self.actor)
    }
}

/// Provisioning state of a binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingState {
    /// Claimed, no remote repository recorded yet
    #[default]
    Pending,
    /// Remote repository recorded, access or seeding not finished
    Created,
    /// Usable by the actor
    Ready,
    /// Provisioning stopped on a terminal failure
    Failed,
}

impl BindingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingState::Pending => "pending",
            BindingState::Created => "created",
            BindingState::Ready => "ready",
            BindingState::Failed => "failed",
        }
    }

    /// Whether a create call may still be working on this binding
    pub fn is_in_flight(&self) -> bool {
        matches!(self, BindingState::Pending | BindingState::Created)
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BindingState::Pending),
            "created" => Ok(BindingState::Created),
            "ready" => Ok(BindingState::Ready),
            "failed" => Ok(BindingState::Failed),
            other => Err(Error::Other(format!("Unknown binding state: {}", other))),
        }
    }
}

/// Local record tying one actor to one provisioned repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoBinding {
    pub id: BindingId,
    pub key: BindingKey,
    /// Set once remote creation succeeds; immutable afterwards
    pub remote: Option<RemoteRepository>,
    pub state: BindingState,
    /// Token of the create call that owns provisioning
    pub claimed_by: String,
    /// Destroy was requested while provisioning was in flight
    pub destroy_requested: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
}

impl RepoBinding {
    /// A fresh pending binding
    pub fn pending(id: BindingId, key: BindingKey, claimed_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            key,
            remote: None,
            state: BindingState::Pending,
            claimed_by: claimed_by.into(),
            destroy_requested: false,
            last_error: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == BindingState::Ready
    }

    pub fn remote_id(&self) -> Option<u64> {
        self.remote.as_ref().map(|r| r.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_ref_roundtrip_display() {
        let actor: ActorRef = "student:12".parse().unwrap();
        assert_eq!(actor, ActorRef::Student(StudentId(12)));
        assert_eq!(actor.to_string(), "student:12");

        let group: ActorRef = "group:7".parse().unwrap();
        assert_eq!(group.kind(), "group");
        assert_eq!(group.raw_id(), 7);
    }

    #[test]
    fn test_actor_ref_invalid() {
        assert!("student".parse::<ActorRef>().is_err());
        assert!("team:1".parse::<ActorRef>().is_err());
        assert!("group:x".parse::<ActorRef>().is_err());
    }

    #[test]
    fn test_actor_ref_serde_shape() {
        let json = serde_json::to_string(&ActorRef::Group(GroupId(3))).unwrap();
        assert_eq!(json, r#"{"kind":"group","id":3}"#);
    }

    #[test]
    fn test_permission_from_assignment() {
        let mut assignment = Assignment {
            id: AssignmentId(1),
            slug: "learn-elm".to_string(),
            title: "Learn Elm".to_string(),
            organization: Organization {
                id: 1,
                login: "classroom".to_string(),
            },
            starter_code_repo_id: None,
            visibility: Visibility::Private,
            students_are_repo_admins: true,
        };
        assert_eq!(assignment.permission(), Permission::Admin);
        assignment.students_are_repo_admins = false;
        assert_eq!(assignment.permission().as_str(), "push");
    }

    #[test]
    fn test_binding_state_parse() {
        for state in [
            BindingState::Pending,
            BindingState::Created,
            BindingState::Ready,
            BindingState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<BindingState>().unwrap(), state);
        }
        assert!(BindingState::Created.is_in_flight());
        assert!(!BindingState::Failed.is_in_flight());
    }
}
