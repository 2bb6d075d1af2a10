// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory collaborator implementations
//!
//! Stand-ins for the external text-generation, tag-matching and persistence
//! services. Used by the CLI demo and by tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::collaborators::{
    ArchiveOutcome, CollaboratorError, Completion, Project, ProjectState, ProjectStore, TagMatch,
    TagMatcher, TextGenerator,
};
use crate::domain::message::Content;
use crate::infrastructure::cache::BoundedCache;

// ============================================================================
// Text generation
// ============================================================================

/// Replays queued completions, then falls back to echoing the prompt.
pub struct ScriptedTextGenerator {
    script: Mutex<VecDeque<Result<Completion, CollaboratorError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedTextGenerator {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let generator = Self::new();
        for reply in replies {
            generator.push_reply(reply);
        }
        generator
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.script.lock().push_back(Ok(Completion {
            text: text.into(),
            confidence: 1.0,
        }));
    }

    pub fn push_error(&self, error: CollaboratorError) {
        self.script.lock().push_back(Err(error));
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Default for ScriptedTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    async fn complete(&self, prompt: &str, _context: &Content) -> Result<Completion, CollaboratorError> {
        if prompt.trim().is_empty() {
            return Err(CollaboratorError::InvalidInput("prompt is empty".to_string()));
        }
        self.prompts.lock().push(prompt.to_string());
        match self.script.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(Completion {
                text: format!("echo: {}", prompt),
                confidence: 0.5,
            }),
        }
    }
}

// ============================================================================
// Tag matching
// ============================================================================

#[derive(Debug, Clone)]
struct IndexedItem {
    id: String,
    item_type: String,
    tags: Vec<String>,
}

/// Overlap-scored tag index.
///
/// Score is the fraction of query tags the candidate carries. Candidates
/// with no overlap are omitted.
#[derive(Debug, Default)]
pub struct TagIndex {
    items: RwLock<Vec<IndexedItem>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an item.
    pub fn insert<I, S>(&self, id: impl Into<String>, item_type: impl Into<String>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let item = IndexedItem {
            id: id.into(),
            item_type: item_type.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        };
        let mut items = self.items.write();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl TagMatcher for TagIndex {
    async fn match_tags(
        &self,
        query_tags: &[String],
        item_type: Option<&str>,
    ) -> Result<Vec<TagMatch>, CollaboratorError> {
        if query_tags.is_empty() {
            return Err(CollaboratorError::InvalidInput("query has no tags".to_string()));
        }
        let items = self.items.read();
        let mut matches: Vec<TagMatch> = items
            .iter()
            .filter(|item| item_type.map_or(true, |t| item.item_type == t))
            .filter_map(|item| {
                let matched: Vec<String> = query_tags
                    .iter()
                    .filter(|tag| item.tags.contains(tag))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                Some(TagMatch {
                    id: item.id.clone(),
                    score: matched.len() as f64 / query_tags.len() as f64,
                    matched_tags: matched,
                })
            })
            .collect();
        // Stable: equal scores keep insertion order.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }
}

type MatchKey = (Vec<String>, Option<String>);

/// Memoizes an inner [`TagMatcher`] in a [`BoundedCache`].
pub struct CachedTagMatcher {
    inner: Arc<dyn TagMatcher>,
    cache: BoundedCache<MatchKey, Vec<TagMatch>>,
}

impl CachedTagMatcher {
    pub fn new(inner: Arc<dyn TagMatcher>, cache: BoundedCache<MatchKey, Vec<TagMatch>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &BoundedCache<MatchKey, Vec<TagMatch>> {
        &self.cache
    }
}

#[async_trait]
impl TagMatcher for CachedTagMatcher {
    async fn match_tags(
        &self,
        query_tags: &[String],
        item_type: Option<&str>,
    ) -> Result<Vec<TagMatch>, CollaboratorError> {
        let key = (query_tags.to_vec(), item_type.map(str::to_string));
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let matches = self.inner.match_tags(query_tags, item_type).await?;
        self.cache.set(key, matches.clone(), None);
        Ok(matches)
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Project store kept in process memory.
///
/// Archiving only flips state and reports the path an on-disk store would use.
pub struct InMemoryProjectStore {
    archive_root: PathBuf,
    projects: RwLock<BTreeMap<String, Project>>,
}

impl InMemoryProjectStore {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            projects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, project_id: &str) -> Option<Project> {
        self.projects.read().get(project_id).cloned()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn create_project(
        &self,
        name: &str,
        files: BTreeMap<String, String>,
    ) -> Result<Project, CollaboratorError> {
        if name.trim().is_empty() {
            return Err(CollaboratorError::InvalidInput("project name is empty".to_string()));
        }
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            state: ProjectState::Active,
            files,
            created_at: Utc::now(),
        };
        self.projects.write().insert(project.id.clone(), project.clone());
        debug!(project_id = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, CollaboratorError> {
        let mut projects: Vec<Project> = self.projects.read().values().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    async fn archive(&self, project_id: &str) -> ArchiveOutcome {
        let mut projects = self.projects.write();
        let result = match projects.get_mut(project_id) {
            None => Err(CollaboratorError::NotFound(project_id.to_string())),
            Some(project) if project.state == ProjectState::Archived => {
                Err(CollaboratorError::AlreadyArchived(project_id.to_string()))
            }
            Some(project) => {
                project.state = ProjectState::Archived;
                Ok(project.files.len())
            }
        };

        match result {
            Ok(files_archived) => {
                let archive_path = self.archive_root.join(format!("{}.tar", project_id));
                info!(project_id = %project_id, files = files_archived, "Project archived");
                ArchiveOutcome {
                    success: true,
                    archive_path: Some(archive_path),
                    error: None,
                    files_archived,
                }
            }
            Err(e) => ArchiveOutcome {
                success: false,
                archive_path: None,
                error: Some(e.to_string()),
                files_archived: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scripted_generator_replays_then_echoes() {
        let generator = ScriptedTextGenerator::with_replies(["first"]);
        let first = tokio_test::block_on(generator.complete("draft intro", &Content::new())).unwrap();
        assert_eq!(first.text, "first");
        let second = tokio_test::block_on(generator.complete("draft outro", &Content::new())).unwrap();
        assert_eq!(second.text, "echo: draft outro");
        assert_eq!(generator.prompts(), vec!["draft intro", "draft outro"]);
        assert!(tokio_test::block_on(generator.complete("  ", &Content::new())).is_err());
    }

    #[tokio::test]
    async fn test_tag_index_scores_and_orders() {
        let index = TagIndex::new();
        index.insert("p1", "pattern", ["rust", "async"]);
        index.insert("p2", "pattern", ["rust", "async", "bus"]);
        index.insert("p3", "pattern", ["python"]);
        index.insert("d1", "doc", ["rust", "async", "bus"]);

        let matches = index
            .match_tags(&tags(&["rust", "async", "bus"]), Some("pattern"))
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[1].matched_tags, tags(&["rust", "async"]));

        let all = index.match_tags(&tags(&["bus"]), None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "d1"]);
    }

    #[tokio::test]
    async fn test_cached_matcher_hits_cache() {
        let index = Arc::new(TagIndex::new());
        index.insert("p1", "pattern", ["rust"]);
        let matcher = CachedTagMatcher::new(index.clone(), BoundedCache::new(4));

        let first = matcher.match_tags(&tags(&["rust"]), None).await.unwrap();
        index.insert("p2", "pattern", ["rust"]);
        let second = matcher.match_tags(&tags(&["rust"]), None).await.unwrap();

        assert_eq!(first, second);
        let stats = matcher.cache().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_archive_twice_fails_explicitly() {
        let store = InMemoryProjectStore::new("/var/lib/concord/archive");
        let mut files = BTreeMap::new();
        files.insert("README.md".to_string(), "# demo".to_string());
        let project = store.create_project("demo", files).await.unwrap();

        let outcome = store.archive(&project.id).await;
        assert!(outcome.success);
        assert_eq!(outcome.files_archived, 1);
        assert!(outcome.archive_path.is_some());

        let again = store.archive(&project.id).await;
        assert!(!again.success);
        assert!(again.error.unwrap().contains("Already archived"));

        let missing = store.archive("nope").await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("Not found"));
    }
}
