//! Roster of assignments, students and groups mirrored into SQLite

use async_trait::async_trait;
use classroom_core::model::{
    Actor, ActorRef, Assignment, AssignmentId, Group, GroupId, Organization, RepoAccess, Student,
    StudentId, Visibility,
};
use classroom_core::store::{Roster, StoreResult};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{to_i64, to_u64};
use crate::Result;

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    id: i64,
    slug: String,
    title: String,
    organization_id: i64,
    organization_login: String,
    starter_code_repo_id: Option<i64>,
    public_repo: bool,
    students_are_repo_admins: bool,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
            id: AssignmentId(self.id),
            slug: self.slug,
            title: self.title,
            organization: Organization {
                id: to_u64(self.organization_id, "organization id")?,
                login: self.organization_login,
            },
            starter_code_repo_id: self
                .starter_code_repo_id
                .map(|id| to_u64(id, "starter repository id"))
                .transpose()?,
            visibility: Visibility::from_public_flag(self.public_repo),
            students_are_repo_admins: self.students_are_repo_admins,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: i64,
    slug: String,
    title: String,
    team_id: Option<i64>,
}

/// SQLite implementation of [`Roster`]
#[derive(Clone)]
pub struct SqliteRoster {
    pool: SqlitePool,
}

impl SqliteRoster {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace an assignment
    pub async fn add_assignment(&self, assignment: &Assignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assignments
                (id, slug, title, organization_id, organization_login,
                 starter_code_repo_id, public_repo, students_are_repo_admins)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title,
                organization_id = excluded.organization_id,
                organization_login = excluded.organization_login,
                starter_code_repo_id = excluded.starter_code_repo_id,
                public_repo = excluded.public_repo,
                students_are_repo_admins = excluded.students_are_repo_admins
            "#,
        )
        .bind(assignment.id.0)
        .bind(&assignment.slug)
        .bind(&assignment.title)
        .bind(to_i64(assignment.organization.id, "organization id")?)
        .bind(&assignment.organization.login)
        .bind(
            assignment
                .starter_code_repo_id
                .map(|id| to_i64(id, "starter repository id"))
                .transpose()?,
        )
        .bind(!assignment.visibility.is_private())
        .bind(assignment.students_are_repo_admins)
        .execute(&self.pool)
        .await?;

        debug!(assignment = %assignment.id, slug = %assignment.slug, "Saved assignment");
        Ok(())
    }

    /// Insert or update a student account
    pub async fn add_student(&self, student: &Student) -> Result<()> {
        sqlx::query(
            "INSERT INTO students (id, login) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET login = excluded.login",
        )
        .bind(student.id.0)
        .bind(&student.login)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a group together with its member list
    pub async fn add_group(&self, group: &Group) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO student_groups (id, slug, title, team_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title,
                team_id = excluded.team_id
            "#,
        )
        .bind(group.id.0)
        .bind(&group.slug)
        .bind(&group.title)
        .bind(group.team_id.map(|id| to_i64(id, "team id")).transpose()?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group.id.0)
            .execute(&mut *tx)
            .await?;

        for member in &group.repo_accesses {
            sqlx::query(
                "INSERT INTO students (id, login) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET login = excluded.login",
            )
            .bind(member.student_id.0)
            .bind(&member.login)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO group_members (group_id, student_id) VALUES (?, ?)")
                .bind(group.id.0)
                .bind(member.student_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(group = group.id.0, members = group.repo_accesses.len(), "Saved group");
        Ok(())
    }

    /// Remove a student or group row; returns whether a row was deleted.
    /// Repositories are not touched, see `RepoLifecycle::destroy_actor`.
    pub async fn remove_actor(&self, actor: ActorRef) -> Result<bool> {
        let sql = match actor {
            ActorRef::Student(_) => "DELETE FROM students WHERE id = ?",
            ActorRef::Group(_) => "DELETE FROM student_groups WHERE id = ?",
        };
        let result = sqlx::query(sql)
            .bind(actor.raw_id())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All assignments, ordered by id
    pub async fn list_assignments(&self) -> Result<Vec<Assignment>> {
        sqlx::query_as::<_, AssignmentRow>("SELECT * FROM assignments ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AssignmentRow::into_assignment)
            .collect()
    }

    async fn fetch_assignment(&self, id: AssignmentId) -> Result<Option<Assignment>> {
        sqlx::query_as::<_, AssignmentRow>("SELECT * FROM assignments WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(AssignmentRow::into_assignment)
            .transpose()
    }

    async fn fetch_student(&self, id: StudentId) -> Result<Option<Student>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, login FROM students WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, login)| Student {
            id: StudentId(id),
            login,
        }))
    }

    async fn fetch_group(&self, id: GroupId) -> Result<Option<Group>> {
        let Some(row) = sqlx::query_as::<_, GroupRow>(
            "SELECT id, slug, title, team_id FROM student_groups WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let members: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT s.id, s.login
            FROM group_members m
            JOIN students s ON s.id = m.student_id
            WHERE m.group_id = ?
            ORDER BY s.id
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Group {
            id: GroupId(row.id),
            slug: row.slug,
            title: row.title,
            team_id: row.team_id.map(|id| to_u64(id, "team id")).transpose()?,
            repo_accesses: members
                .into_iter()
                .map(|(id, login)| RepoAccess {
                    student_id: StudentId(id),
                    login,
                })
                .collect(),
        }))
    }
}

#[async_trait]
impl Roster for SqliteRoster {
    async fn assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>> {
        Ok(self.fetch_assignment(id).await?)
    }

    async fn actor(&self, actor: ActorRef) -> StoreResult<Option<Actor>> {
        let found = match actor {
            ActorRef::Student(id) => self.fetch_student(id).await?.map(Actor::Student),
            ActorRef::Group(id) => self.fetch_group(id).await?.map(Actor::Group),
        };
        Ok(found)
    }
}
