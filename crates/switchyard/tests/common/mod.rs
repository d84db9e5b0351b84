//! A small user/post directory shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use switchyard_core::{query, Action, CallContext, Command, Handler, Query, Routes};
use switchyard_testing::Trail;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("name is required")]
pub struct NameRequired;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("user {0} not found")]
pub struct UserNotFound(pub u64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("post {0} not found")]
pub struct PostNotFound(pub u64);

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Default)]
pub struct CreateUser {
    pub name: String,
    pub id: Option<u64>,
}

impl CreateUser {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
        }
    }
}

impl Command for CreateUser {}

impl Action for CreateUser {
    fn validate(&self, _call: &CallContext) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(NameRequired.into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CreatePost {
    pub author: u64,
    pub title: String,
    pub id: Option<u64>,
}

impl Command for CreatePost {}
impl Action for CreatePost {}

#[derive(Debug, Default)]
pub struct FindUser {
    pub id: u64,
    pub name: Option<String>,
}

impl FindUser {
    pub fn by_id(id: u64) -> Self {
        Self { id, name: None }
    }
}

impl Command for FindUser {}
impl Query for FindUser {}

#[derive(Debug, Default)]
pub struct FindPost {
    pub id: u64,
    pub title: Option<String>,
}

impl FindPost {
    pub fn by_id(id: u64) -> Self {
        Self { id, title: None }
    }
}

impl Command for FindPost {}
impl Query for FindPost {}

// ============================================================================
// Handler
// ============================================================================

/// In-memory directory. Ids are 1-based positions.
#[derive(Default)]
pub struct Directory {
    users: Mutex<Vec<String>>,
    posts: Mutex<Vec<String>>,
    trail: Trail,
}

impl Directory {
    pub fn with_trail(trail: Trail) -> Self {
        Self {
            trail,
            ..Self::default()
        }
    }

    fn create_user(&self, _call: &CallContext, cmd: &mut CreateUser) -> anyhow::Result<()> {
        self.trail.push(format!("create_user:{}", cmd.name));
        let mut users = self.users.lock();
        users.push(cmd.name.clone());
        cmd.id = Some(users.len() as u64);
        Ok(())
    }

    fn create_post(&self, call: &CallContext, cmd: &mut CreatePost) -> anyhow::Result<()> {
        // The author must exist; ask the bus the call runs on.
        query(call, FindUser::by_id(cmd.author))?;

        self.trail.push(format!("create_post:{}", cmd.title));
        let mut posts = self.posts.lock();
        posts.push(cmd.title.clone());
        cmd.id = Some(posts.len() as u64);
        Ok(())
    }

    fn find_user(&self, _call: &CallContext, q: &mut FindUser) -> anyhow::Result<()> {
        let users = self.users.lock();
        let name = lookup(&users, q.id).ok_or(UserNotFound(q.id))?;
        q.name = Some(name.clone());
        Ok(())
    }

    fn find_post(&self, _call: &CallContext, q: &mut FindPost) -> anyhow::Result<()> {
        let posts = self.posts.lock();
        let title = lookup(&posts, q.id).ok_or(PostNotFound(q.id))?;
        q.title = Some(title.clone());
        Ok(())
    }
}

fn lookup(rows: &[String], id: u64) -> Option<&String> {
    let index = usize::try_from(id).ok()?.checked_sub(1)?;
    rows.get(index)
}

impl Handler for Directory {
    fn routes(routes: &mut Routes<Self>) {
        routes
            .action(Directory::create_user)
            .action(Directory::create_post)
            .query(Directory::find_user)
            .query(Directory::find_post);
    }
}
