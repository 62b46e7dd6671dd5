use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::model::{Priority, Task};

/// How identifiers are handed out to new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// `number of tasks + 1`. Ids of deleted tasks can come back.
    LiveCount,
    /// One more than the highest id this store has held, whether loaded
    /// from the document or handed out since. Deleting the newest task
    /// does not bring its id back.
    Monotonic,
}

impl Default for IdPolicy {
    fn default() -> Self {
        IdPolicy::LiveCount
    }
}

impl FromStr for IdPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live-count" => Ok(IdPolicy::LiveCount),
            "monotonic" => Ok(IdPolicy::Monotonic),
            other => bail!("Unknown id policy '{}' (expected live-count or monotonic).", other),
        }
    }
}

/// The task list, kept in memory and mirrored to a single JSON document.
/// Every mutation rewrites the whole document before returning.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    tasks: Vec<Task>,
    id_policy: IdPolicy,
    highest_id: u32,
}

impl Store {
    /// Open the document at `path`. A missing or unreadable document gives
    /// an empty store.
    pub fn open(path: impl Into<PathBuf>, id_policy: IdPolicy) -> Store {
        let path = path.into();
        let tasks = load(&path);
        let highest_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        Store {
            path,
            tasks,
            id_policy,
            highest_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in storage order, optionally leaving out completed ones.
    pub fn list(&self, show_completed: bool) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| show_completed || !t.completed)
            .collect()
    }

    /// Tasks whose description or notes contain `keyword`, ignoring case.
    pub fn search(&self, keyword: &str) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.matches_keyword(keyword)).collect()
    }

    /// Tasks carrying `tag`, compared without case or leading `#`.
    pub fn search_by_tag(&self, tag: &str) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.has_tag(tag)).collect()
    }

    /// Every tag in use, sorted, de-duplicated on the exact stored text.
    /// `#Work` and `#work` are listed separately here.
    pub fn all_tags(&self) -> Vec<String> {
        self.tasks
            .iter()
            .flat_map(|t| t.tags.iter().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect()
    }

    /// First task with the given id.
    pub fn get(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Create a task and persist it. The description is trimmed and must
    /// not be empty; an unknown priority becomes `medium`.
    pub fn add(&mut self, description: &str, priority: &str, tags: Vec<String>, notes: &str) -> Result<Task> {
        let description = description.trim();
        if description.is_empty() {
            bail!("Task description cannot be empty.");
        }

        let task = Task::new(
            self.next_id()?,
            description.to_string(),
            Priority::from_input(priority),
            tags,
            notes.to_string(),
        );
        let created = task.clone();
        self.commit(move |tasks| {
            tasks.push(task);
            Some(())
        })?;
        self.highest_id = self.highest_id.max(created.id);
        debug!(id = created.id, "added task");
        Ok(created)
    }

    /// Mark a task as done. Completing a completed task is fine.
    pub fn complete(&mut self, id: u32) -> Result<bool> {
        self.update(id, |task| task.completed = true)
    }

    /// Remove the first task with the given id and return it.
    pub fn delete(&mut self, id: u32) -> Result<Option<Task>> {
        let removed = self.commit(|tasks| {
            let index = tasks.iter().position(|t| t.id == id)?;
            Some(tasks.remove(index))
        })?;
        if let Some(task) = &removed {
            debug!(id = task.id, "deleted task");
        }
        Ok(removed)
    }

    /// Replace the notes of a task.
    pub fn add_note(&mut self, id: u32, text: &str) -> Result<bool> {
        self.update(id, |task| task.notes = text.to_string())
    }

    /// Append tags that the task does not already carry verbatim.
    pub fn add_tags(&mut self, id: u32, tags: &[String]) -> Result<bool> {
        self.update(id, |task| {
            task.add_tags(tags);
        })
    }

    /// Remove tags matching the stored text exactly.
    pub fn remove_tags(&mut self, id: u32, tags: &[String]) -> Result<bool> {
        self.update(id, |task| {
            task.remove_tags(tags);
        })
    }

    fn next_id(&self) -> Result<u32> {
        let next = match self.id_policy {
            IdPolicy::LiveCount => u32::try_from(self.tasks.len())
                .ok()
                .and_then(|count| count.checked_add(1)),
            IdPolicy::Monotonic => self.highest_id.checked_add(1),
        };
        match next {
            Some(id) => Ok(id),
            None => bail!("No task ids left to assign."),
        }
    }

    /// Apply `change` to the first task with `id`, persisting if it exists.
    fn update<F>(&mut self, id: u32, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Task),
    {
        let found = self.commit(|tasks| {
            let task = tasks.iter_mut().find(|t| t.id == id)?;
            change(task);
            Some(())
        })?;
        Ok(found.is_some())
    }

    /// Run `mutation` against the task list. When it reports a change
    /// (`Some`), the document is saved; if saving fails the list is put
    /// back the way it was and the error is returned.
    fn commit<T, F>(&mut self, mutation: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Vec<Task>) -> Option<T>,
    {
        let snapshot = self.tasks.clone();
        let outcome = match mutation(&mut self.tasks) {
            Some(outcome) => outcome,
            None => return Ok(None),
        };
        if let Err(e) = self.save() {
            self.tasks = snapshot;
            return Err(e);
        }
        Ok(Some(outcome))
    }

    /// Write the full task list over the document. The content goes to a
    /// temporary file next to it first, so the document is either the old
    /// one or the new one.
    pub fn save(&self) -> Result<()> {
        save(&self.path, &self.tasks)
    }
}

/// Read tasks from the document. Absence and corruption both mean "no tasks".
pub fn load(path: &Path) -> Vec<Task> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no tasks document, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Task>>(&content) {
        Ok(tasks) => {
            debug!(path = %path.display(), count = tasks.len(), "loaded tasks");
            tasks
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "tasks document is not valid, starting empty");
            Vec::new()
        }
    }
}

/// Serialize `tasks` and replace the document at `path` with them.
pub fn save(path: &Path, tasks: &[Task]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}.", parent.display()))?;
        }
    }

    let content = serde_json::to_string_pretty(tasks).context("Failed to serialize tasks.")?;
    let tmp_path = temporary_path(path);

    let written = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp_path, path));

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("Failed to save tasks to {}.", path.display()));
    }

    debug!(path = %path.display(), count = tasks.len(), "saved tasks");
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tasks.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn store_in(dir: &TempDir) -> Store {
        Store::open(dir.path().join("tasks.json"), IdPolicy::LiveCount)
    }

    fn ids(tasks: &[&Task]) -> Vec<u32> {
        tasks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn missing_document_gives_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
        assert!(!dir.path().join("tasks.json").exists());
    }

    #[test]
    fn corrupt_document_gives_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();
        let store = Store::open(&path, IdPolicy::LiveCount);
        assert!(store.is_empty());

        fs::write(&path, r#"{"id": 1}"#).unwrap();
        assert!(Store::open(&path, IdPolicy::LiveCount).is_empty());
    }

    #[test]
    fn add_complete_and_list() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let task = store.add("Buy groceries", "high", tags(&["#shopping"]), "").unwrap();
        assert_eq!(task.id, 1);
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.tags, vec!["#shopping"]);
        assert!(!task.completed);

        assert!(store.complete(1).unwrap());
        assert!(store.list(false).is_empty());
        let all = store.list(true);
        assert_eq!(all.len(), 1);
        assert!(all[0].completed);
    }

    #[test]
    fn invalid_priority_becomes_medium() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let task = store.add("Call mom", "asap", Vec::new(), "").unwrap();
        assert_eq!(task.priority, Priority::Medium);
    }

    #[test]
    fn empty_description_is_rejected_without_writing() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(store.add("   ", "high", Vec::new(), "").is_err());
        assert!(store.is_empty());
        assert!(!store.path().exists());

        let task = store.add("  padded  ", "low", Vec::new(), "").unwrap();
        assert_eq!(task.description, "padded");
    }

    #[test]
    fn list_keeps_insertion_order_and_hides_completed() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        for name in &["one", "two", "three", "four"] {
            store.add(name, "medium", Vec::new(), "").unwrap();
        }
        store.complete(2).unwrap();
        store.complete(4).unwrap();

        assert_eq!(ids(&store.list(true)), vec![1, 2, 3, 4]);
        assert_eq!(ids(&store.list(false)), vec![1, 3]);
    }

    #[test]
    fn complete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Write report", "medium", Vec::new(), "").unwrap();
        assert!(store.complete(1).unwrap());
        let before = store.get(1).cloned();
        assert!(store.complete(1).unwrap());
        assert_eq!(store.get(1).cloned(), before);
    }

    #[test]
    fn unknown_id_is_reported_and_not_written() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(!store.complete(7).unwrap());
        assert!(!store.add_note(7, "x").unwrap());
        assert!(!store.add_tags(7, &tags(&["#a"])).unwrap());
        assert!(!store.remove_tags(7, &tags(&["#a"])).unwrap());
        assert!(store.delete(7).unwrap().is_none());
        assert!(!store.path().exists());

        store.add("Only", "low", Vec::new(), "").unwrap();
        assert!(store.delete(99).unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_returns_removed_task() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Test task", "medium", Vec::new(), "").unwrap();
        let removed = store.delete(1).unwrap().unwrap();
        assert_eq!(removed.description, "Test task");
        assert!(store.is_empty());
        assert!(store_in(&dir).is_empty());
    }

    #[test]
    fn live_count_ids_collide_after_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("A", "medium", Vec::new(), "").unwrap();
        let b = store.add("B", "medium", Vec::new(), "").unwrap();
        store.delete(1).unwrap();
        // One task left, so the next id is 2 again: B still holds it.
        let c = store.add("C", "medium", Vec::new(), "").unwrap();
        assert_eq!(c.id, b.id);
        assert_eq!(c.id, 2);
        assert_eq!(store.get(2).unwrap().description, "B");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn first_match_wins_on_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("A", "medium", Vec::new(), "").unwrap();
        store.add("B", "medium", Vec::new(), "").unwrap();
        store.add("C", "medium", Vec::new(), "").unwrap();
        store.delete(1).unwrap();
        // B and C now sit at ids 2 and 3; a new task takes id 3 as well.
        store.add("D", "medium", Vec::new(), "").unwrap();
        assert_eq!(store.get(3).unwrap().description, "C");
        assert!(store.complete(3).unwrap());
        let done: Vec<&str> = store
            .list(true)
            .iter()
            .filter(|t| t.completed)
            .map(|t| t.description.as_str())
            .collect();
        assert_eq!(done, vec!["C"]);
    }

    #[test]
    fn monotonic_ids_never_repeat() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("tasks.json"), IdPolicy::Monotonic);
        store.add("A", "medium", Vec::new(), "").unwrap();
        store.add("B", "medium", Vec::new(), "").unwrap();
        store.delete(2).unwrap();
        let c = store.add("C", "medium", Vec::new(), "").unwrap();
        assert_eq!(c.id, 3);
        store.delete(3).unwrap();
        store.delete(1).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.add("D", "medium", Vec::new(), "").unwrap().id, 4);
    }

    #[test]
    fn monotonic_ids_continue_from_loaded_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let mut store = Store::open(&path, IdPolicy::LiveCount);
        for name in &["A", "B", "C"] {
            store.add(name, "medium", Vec::new(), "").unwrap();
        }
        store.delete(1).unwrap();

        let mut reopened = Store::open(&path, IdPolicy::Monotonic);
        assert_eq!(reopened.add("D", "medium", Vec::new(), "").unwrap().id, 4);
    }

    #[test]
    fn failed_add_does_not_consume_an_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let mut store = Store::open(&path, IdPolicy::Monotonic);
        store.add("A", "medium", Vec::new(), "").unwrap();

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert!(store.add("B", "medium", Vec::new(), "").is_err());

        fs::remove_dir(&path).unwrap();
        assert_eq!(store.add("B", "medium", Vec::new(), "").unwrap().id, 2);
    }

    #[test]
    fn exhausted_ids_are_an_error_not_a_wrap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(
            &path,
            format!(
                r#"[{{"id": {}, "description": "last", "created_at": "2024-03-01T10:15:30"}}]"#,
                u32::MAX
            ),
        )
        .unwrap();

        let mut store = Store::open(&path, IdPolicy::Monotonic);
        assert_eq!(store.len(), 1);
        let err = store.add("one more", "medium", Vec::new(), "").unwrap_err();
        assert!(err.to_string().contains("No task ids left"));
        assert_eq!(store.len(), 1);

        // Live counting is unaffected by large ids already in the document.
        let mut store = Store::open(&path, IdPolicy::LiveCount);
        assert_eq!(store.add("one more", "medium", Vec::new(), "").unwrap().id, 2);
    }

    #[test]
    fn id_policy_parses_from_flag_values() {
        assert_eq!("live-count".parse::<IdPolicy>().unwrap(), IdPolicy::LiveCount);
        assert_eq!("monotonic".parse::<IdPolicy>().unwrap(), IdPolicy::Monotonic);
        assert!("random".parse::<IdPolicy>().is_err());
    }

    #[test]
    fn search_is_case_insensitive_over_description_and_notes() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Buy milk", "medium", Vec::new(), "").unwrap();
        store.add("Write report", "medium", Vec::new(), "ask Bob to buy coffee").unwrap();
        store.add("Call mom", "medium", Vec::new(), "").unwrap();

        assert_eq!(ids(&store.search("BUY")), vec![1, 2]);
        assert_eq!(ids(&store.search("")), vec![1, 2, 3]);
        assert!(store.search("dentist").is_empty());
    }

    #[test]
    fn search_by_tag_normalizes_both_sides() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Task 1", "medium", tags(&["#work", "#urgent"]), "").unwrap();
        store.add("Task 2", "medium", tags(&["#personal"]), "").unwrap();
        store.add("Task 3", "medium", tags(&["#Work"]), "").unwrap();

        assert_eq!(ids(&store.search_by_tag("#Work")), vec![1, 3]);
        assert_eq!(ids(&store.search_by_tag("work")), vec![1, 3]);
        assert!(store.search_by_tag("#home").is_empty());
    }

    #[test]
    fn all_tags_dedups_on_raw_text_only() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Task 1", "medium", tags(&["#work", "#urgent"]), "").unwrap();
        store.add("Task 2", "medium", tags(&["#personal", "#work", "#Work"]), "").unwrap();

        assert_eq!(store.all_tags(), vec!["#Work", "#personal", "#urgent", "#work"]);
    }

    #[test]
    fn tagging_and_notes() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Test task", "medium", tags(&["#work", "#urgent", "#important"]), "").unwrap();

        assert!(store.add_tags(1, &tags(&["#new", "#work"])).unwrap());
        assert_eq!(store.get(1).unwrap().tags, vec!["#work", "#urgent", "#important", "#new"]);

        assert!(store.remove_tags(1, &tags(&["#urgent", "#missing"])).unwrap());
        assert_eq!(store.get(1).unwrap().tags, vec!["#work", "#important", "#new"]);

        assert!(store.add_note(1, "first").unwrap());
        assert!(store.add_note(1, "second").unwrap());
        assert_eq!(store.get(1).unwrap().notes, "second");
    }

    #[test]
    fn reload_reproduces_every_field() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Buy groceries", "high", tags(&["#shopping"]), "eggs").unwrap();
        store.add("Write report", "low", Vec::new(), "").unwrap();
        store.add_tags(2, &tags(&["#Work"])).unwrap();
        store.complete(1).unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.list(true), store.list(true));
    }

    #[test]
    fn document_is_a_plain_array_of_records() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add("Buy groceries", "high", tags(&["#shopping"]), "").unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let record = &value[0];
        assert_eq!(record["id"], 1);
        assert_eq!(record["description"], "Buy groceries");
        assert_eq!(record["priority"], "high");
        assert_eq!(record["tags"][0], "#shopping");
        assert_eq!(record["notes"], "");
        assert_eq!(record["completed"], false);
        assert!(record["created_at"].as_str().unwrap().contains('T'));
        assert!(!dir.path().join("tasks.json.tmp").exists());
    }

    #[test]
    fn reads_documents_written_by_older_versions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(
            &path,
            r##"[
  {"id": 1, "description": "Buy groceries", "priority": "high",
   "created_at": "2024-03-01T10:15:30.123456", "completed": false},
  {"id": 2, "description": "Read", "priority": "low", "tags": ["#books"],
   "notes": "chapter 3", "created_at": "2024-03-02T08:00:00", "completed": true}
]"##,
        )
        .unwrap();

        let store = Store::open(&path, IdPolicy::LiveCount);
        assert_eq!(store.len(), 2);
        assert!(store.get(1).unwrap().tags.is_empty());
        assert_eq!(ids(&store.search_by_tag("BOOKS")), vec![2]);
        assert_eq!(ids(&store.list(false)), vec![1]);
    }

    #[test]
    fn failed_save_rolls_back_and_reports() {
        let dir = TempDir::new().unwrap();
        // A directory where the document should be makes the final rename fail.
        let path = dir.path().join("tasks.json");
        fs::create_dir(&path).unwrap();
        let mut store = Store::open(&path, IdPolicy::LiveCount);

        let err = store.add("Doomed", "high", Vec::new(), "").unwrap_err();
        assert!(err.to_string().contains("Failed to save tasks"));
        assert!(store.is_empty());
        assert!(!dir.path().join("tasks.json.tmp").exists());
    }

    #[test]
    fn failed_save_keeps_previous_state_for_updates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let mut store = Store::open(&path, IdPolicy::LiveCount);
        store.add("Keep me", "low", Vec::new(), "").unwrap();

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(store.complete(1).is_err());
        assert!(!store.get(1).unwrap().completed);
        assert!(store.delete(1).is_err());
        assert_eq!(store.len(), 1);
    }
}
