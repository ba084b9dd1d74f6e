//! Recording fake of the remote host for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{
    Actor, Assignment, AssignmentId, Organization, Permission, RemoteRepository, Student,
    StudentId, Visibility,
};
use crate::remote::{RemoteError, RemoteResult, VersionControl};

/// One call issued against the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateRepo {
        org: u64,
        name: String,
        private: bool,
    },
    FindRepo {
        name: String,
    },
    AddTeam {
        team_id: u64,
        repo: String,
        permission: Permission,
    },
    AddCollaborator {
        repo: String,
        login: String,
        permission: Permission,
    },
    PushStarterCode {
        repo: String,
        source: u64,
    },
    DeleteRepo {
        repo_id: u64,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    calls: Vec<Call>,
    repos: HashMap<String, RemoteRepository>,
    create_failures: VecDeque<RemoteError>,
    team_failures: VecDeque<RemoteError>,
    collaborator_failures: HashMap<String, RemoteError>,
    seed_failure: Option<RemoteError>,
    delete_failures: VecDeque<RemoteError>,
}

/// In-memory remote host that records every call
#[derive(Debug)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateRepo { .. }))
    }

    /// Repositories currently existing on the fake host
    pub fn repo_count(&self) -> usize {
        self.with(|s| s.repos.len())
    }

    /// Pre-create a repository, as if made out-of-band or by a lost response
    pub fn existing_repo(&self, full_name: &str) -> RemoteRepository {
        self.with(|s| {
            s.next_id += 1;
            let repo = RemoteRepository::new(s.next_id, full_name);
            s.repos.insert(full_name.to_string(), repo.clone());
            repo
        })
    }

    /// Remove a repository without going through the client
    pub fn remove_out_of_band(&self, id: u64) {
        self.with(|s| s.repos.retain(|_, r| r.id != id));
    }

    pub fn fail_next_create(&self, error: RemoteError) {
        self.with(|s| s.create_failures.push_back(error));
    }

    pub fn fail_next_team(&self, error: RemoteError) {
        self.with(|s| s.team_failures.push_back(error));
    }

    pub fn fail_collaborator(&self, login: &str, error: RemoteError) {
        self.with(|s| {
            s.collaborator_failures.insert(login.to_string(), error);
        });
    }

    pub fn fail_seed(&self, error: RemoteError) {
        self.with(|s| s.seed_failure = Some(error));
    }

    pub fn fail_next_delete(&self, error: RemoteError) {
        self.with(|s| s.delete_failures.push_back(error));
    }
}

#[async_trait]
impl VersionControl for FakeRemote {
    async fn create_org_repo(
        &self,
        org: &Organization,
        name: &str,
        visibility: Visibility,
    ) -> RemoteResult<RemoteRepository> {
        self.with(|s| {
            s.calls.push(Call::CreateRepo {
                org: org.id,
                name: name.to_string(),
                private: visibility.is_private(),
            });
            if let Some(error) = s.create_failures.pop_front() {
                return Err(error);
            }
            let full_name = format!("{}/{}", org.login, name);
            if s.repos.contains_key(&full_name) {
                return Err(RemoteError::AlreadyExists(full_name));
            }
            s.next_id += 1;
            let repo = RemoteRepository::new(s.next_id, full_name.clone());
            s.repos.insert(full_name, repo.clone());
            Ok(repo)
        })
    }

    async fn find_org_repo(&self, org: &Organization, name: &str) -> RemoteResult<RemoteRepository> {
        self.with(|s| {
            s.calls.push(Call::FindRepo {
                name: name.to_string(),
            });
            let full_name = format!("{}/{}", org.login, name);
            s.repos
                .get(&full_name)
                .cloned()
                .ok_or(RemoteError::NotFound(full_name))
        })
    }

    async fn add_team_to_repo(
        &self,
        team_id: u64,
        repo_full_name: &str,
        permission: Permission,
    ) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::AddTeam {
                team_id,
                repo: repo_full_name.to_string(),
                permission,
            });
            s.team_failures.pop_front().map_or(Ok(()), Err)
        })
    }

    async fn add_collaborator(
        &self,
        repo_full_name: &str,
        login: &str,
        permission: Permission,
    ) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::AddCollaborator {
                repo: repo_full_name.to_string(),
                login: login.to_string(),
                permission,
            });
            s.collaborator_failures
                .get(login)
                .cloned()
                .map_or(Ok(()), Err)
        })
    }

    async fn push_starter_code(
        &self,
        repo_full_name: &str,
        source_repo_id: u64,
    ) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::PushStarterCode {
                repo: repo_full_name.to_string(),
                source: source_repo_id,
            });
            s.seed_failure.clone().map_or(Ok(()), Err)
        })
    }

    async fn delete_repo(&self, repo_id: u64) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::DeleteRepo { repo_id });
            if let Some(error) = s.delete_failures.pop_front() {
                return Err(error);
            }
            let before = s.repos.len();
            s.repos.retain(|_, r| r.id != repo_id);
            if s.repos.len() == before {
                return Err(RemoteError::NotFound(format!("repository {}", repo_id)));
            }
            Ok(())
        })
    }
}

/// Assignment mirroring the "Learn Elm" fixture
pub fn learn_elm() -> Assignment {
    Assignment {
        id: AssignmentId(1),
        slug: "learn-elm".to_string(),
        title: "Learn Elm".to_string(),
        organization: Organization {
            id: 4223,
            login: "classroom-testing".to_string(),
        },
        starter_code_repo_id: Some(1_062_897),
        visibility: Visibility::Private,
        students_are_repo_admins: true,
    }
}

pub fn octocat() -> Actor {
    Actor::Student(Student {
        id: StudentId(7),
        login: "octocat".to_string(),
    })
}
