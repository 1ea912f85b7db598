//! Registry of the posts currently visible in a thread.
//!
//! The composer owns a draft exclusively while its id is zero and hands it
//! over to the registry once the server allocates it. From then on, every
//! mutation goes through the registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::Post;

/// Shared post storage consumed by the message handlers and the composer.
pub trait PostRegistry: Send + Sync {
    /// Clone of the post with `id`, if present.
    fn get(&self, id: u64) -> Option<Post>;

    fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Insert a post, returning the one it replaced.
    fn insert(&self, post: Post) -> Option<Post>;

    fn remove(&self, id: u64) -> Option<Post>;

    /// Run `f` on the post with `id`. Returns false, if the post is absent.
    fn update(&self, id: u64, f: &mut dyn FnMut(&mut Post)) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory registry for a single thread page.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    posts: RwLock<HashMap<u64, Post>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of all registered posts in ascending order.
    pub fn ids(&self) -> Vec<u64> {
        let posts = self.posts.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<u64> = posts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl PostRegistry for ThreadRegistry {
    fn get(&self, id: u64) -> Option<Post> {
        self.posts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn contains(&self, id: u64) -> bool {
        self.posts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn insert(&self, post: Post) -> Option<Post> {
        log::debug!("Registering post {}", post.id);
        self.posts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(post.id, post)
    }

    fn remove(&self, id: u64) -> Option<Post> {
        self.posts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    fn update(&self, id: u64, f: &mut dyn FnMut(&mut Post)) -> bool {
        let mut posts = self.posts.write().unwrap_or_else(PoisonError::into_inner);
        match posts.get_mut(&id) {
            Some(post) => {
                f(post);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.posts.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
