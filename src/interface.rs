use anyhow::Result;
use chrono::Local;
use humantime::format_duration;
use prettytable::{Cell, Row, Table};
use std::io::{BufRead, Write};
use std::time::Duration as STDDuration;
use structopt::clap::ErrorKind;
use tracing::{debug, info};

use crate::cli::{is_exit, parse_add_words, shows_completed, tag_arguments, Command, ShellLine};
use crate::model::Task;
use crate::store::Store;
use crate::summary::Summarizer;

const DESCRIPTION_MAX_LENGTH: usize = 30;
const MAX_TAGS_DISPLAY: usize = 5;
const NOTES_WIDTH: usize = 68;
const RULE_WIDTH: usize = 60;

/// Run a single command against the store, writing what the user should
/// see to `out`. Unknown ids are reported, not returned as errors; a
/// failure to save is.
pub fn run(store: &mut Store, summarizer: &dyn Summarizer, command: Command, out: &mut dyn Write) -> Result<()> {
    debug!(?command, "running command");
    match command {
        Command::Add { words } => add_task(store, &words, out),
        Command::List { scope } => list(store, shows_completed(scope.as_deref()), out),
        Command::Search { keyword } => search(store, &keyword.join(" "), out),
        Command::Filter { tags } => filter(store, tags.first().map_or("", String::as_str), out),
        Command::Tags => tags(store, out),
        Command::Tag { id, tags } => tag_task(store, id, &tags, out),
        Command::Untag { id, tags } => untag_task(store, id, &tags, out),
        Command::Note { id, text } => note(store, id, &text.join(" "), out),
        Command::View { id } => view(store, id, out),
        Command::Complete { id } => complete(store, id, out),
        Command::Delete { id } => remove_task(store, id, out),
        Command::Summarize { id } => summarize(store, summarizer, id, out),
    }
}

/// Read commands from `input` until it ends or the user leaves.
pub fn shell(store: &mut Store, summarizer: &dyn Summarizer, input: impl BufRead, out: &mut dyn Write) -> Result<()> {
    info!(path = %store.path().display(), tasks = store.len(), "starting shell");
    writeln!(out, "Welcome to tasq!")?;
    if store.is_empty() {
        writeln!(out, "No tasks yet. Try 'add <description> [priority] [#tags]'.")?;
    }
    writeln!(out, "Type 'help' for available commands.\n")?;

    let mut lines = input.lines();
    loop {
        write!(out, "task> ")?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                writeln!(out)?;
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit(line) {
            writeln!(out, "Goodbye!")?;
            break;
        }

        let command = match ShellLine::parse(line) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                match e.kind {
                    ErrorKind::HelpDisplayed => writeln!(out, "{}", e.message)?,
                    _ => {
                        writeln!(out, "{}", e.message.trim_end())?;
                        writeln!(out, "Type 'help' for available commands.")?;
                    }
                }
                continue;
            }
        };

        if let Err(e) = run(store, summarizer, command, out) {
            print_error(out, &format!("{:#}", e))?;
        }
    }
    Ok(())
}

fn add_task(store: &mut Store, words: &[String], out: &mut dyn Write) -> Result<()> {
    let new_task = parse_add_words(words);
    if new_task.description.trim().is_empty() {
        return print_error(out, "Task description cannot be empty");
    }

    let task = store.add(&new_task.description, &new_task.priority, new_task.tags, "")?;
    let mut message = format!("Task {} added: {}", task.id, task.description);
    if !task.tags.is_empty() {
        message.push_str(&format!(" (Tags: {})", task.tags.join(" ")));
    }
    print_success(out, &message)
}

fn list(store: &Store, show_completed: bool, out: &mut dyn Write) -> Result<()> {
    let tasks = store.list(show_completed);
    if tasks.is_empty() {
        writeln!(out, "No tasks found.")?;
        return Ok(());
    }
    task_table(&tasks).print(out)?;
    Ok(())
}

fn search(store: &Store, keyword: &str, out: &mut dyn Write) -> Result<()> {
    search_results(&store.search(keyword), keyword, out)
}

fn filter(store: &Store, tag: &str, out: &mut dyn Write) -> Result<()> {
    search_results(&store.search_by_tag(tag), tag, out)
}

fn tags(store: &Store, out: &mut dyn Write) -> Result<()> {
    let tags = store.all_tags();
    if tags.is_empty() {
        writeln!(out, "No tags found.")?;
        return Ok(());
    }
    writeln!(out, "All tags ({}):", tags.len())?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    for tag in tags {
        writeln!(out, "  {}", tag)?;
    }
    Ok(())
}

fn tag_task(store: &mut Store, id: u32, args: &[String], out: &mut dyn Write) -> Result<()> {
    let tags = tag_arguments(args);
    if tags.is_empty() {
        return print_error(out, "Please provide at least one tag (starting with #)");
    }
    if store.add_tags(id, &tags)? {
        print_success(out, &format!("Added tags {} to task {}", tags.join(" "), id))
    } else {
        not_found(out, id)
    }
}

fn untag_task(store: &mut Store, id: u32, args: &[String], out: &mut dyn Write) -> Result<()> {
    let tags = tag_arguments(args);
    if tags.is_empty() {
        return print_error(out, "Please provide at least one tag (starting with #)");
    }
    if store.remove_tags(id, &tags)? {
        print_success(out, &format!("Removed tags {} from task {}", tags.join(" "), id))
    } else {
        not_found(out, id)
    }
}

fn note(store: &mut Store, id: u32, text: &str, out: &mut dyn Write) -> Result<()> {
    if store.add_note(id, text)? {
        print_success(out, &format!("Note added to task {}", id))
    } else {
        not_found(out, id)
    }
}

fn view(store: &Store, id: u32, out: &mut dyn Write) -> Result<()> {
    match store.get(id) {
        Some(task) => {
            write!(out, "{}", task_detail(task))?;
            Ok(())
        }
        None => not_found(out, id),
    }
}

fn complete(store: &mut Store, id: u32, out: &mut dyn Write) -> Result<()> {
    if store.complete(id)? {
        print_success(out, &format!("Task {} marked as completed", id))
    } else {
        not_found(out, id)
    }
}

fn remove_task(store: &mut Store, id: u32, out: &mut dyn Write) -> Result<()> {
    match store.delete(id)? {
        Some(task) => print_success(out, &format!("Deleted: {}", task.description)),
        None => not_found(out, id),
    }
}

fn summarize(store: &Store, summarizer: &dyn Summarizer, id: u32, out: &mut dyn Write) -> Result<()> {
    let task = match store.get(id) {
        Some(task) => task,
        None => return not_found(out, id),
    };
    match summarizer.summarize(&task.description) {
        Ok(summary) => {
            writeln!(out, "Task {}: {}", task.id, summary)?;
            Ok(())
        }
        Err(e) => print_error(out, &format!("{:#}", e)),
    }
}

fn search_results(tasks: &[&Task], query: &str, out: &mut dyn Write) -> Result<()> {
    if tasks.is_empty() {
        writeln!(out, "No tasks found matching '{}'", query)?;
        return Ok(());
    }
    writeln!(out, "Found {} task(s) matching '{}':", tasks.len(), query)?;

    let mut table = Table::new();
    table.set_titles(row!["ID", "Description", "Priority", "Status", "Tags", "Created"]);
    for task in tasks {
        table.add_row(Row::new(vec![
            Cell::new(&task.id.to_string()),
            Cell::new(&task.description),
            Cell::new(task.priority.as_str()),
            Cell::new(status(task)),
            Cell::new(&task.tags.join(" ")),
            Cell::new(&task.created_at.format("%Y-%m-%d").to_string()),
        ]));
    }
    table.print(out)?;
    Ok(())
}

/// The task listing: one row per task, long descriptions cut short.
pub fn task_table(tasks: &[&Task]) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["ID", "Description", "Priority", "Status", "Tags"]);
    for task in tasks {
        let shown_tags: Vec<&str> = task
            .tags
            .iter()
            .take(MAX_TAGS_DISPLAY)
            .map(String::as_str)
            .collect();
        table.add_row(row![
            task.id,
            truncate(&task.description, DESCRIPTION_MAX_LENGTH),
            task.priority,
            status(task),
            shown_tags.join(" ")
        ]);
    }
    table
}

/// Everything about one task, notes wrapped.
pub fn task_detail(task: &Task) -> String {
    let mut lines = Vec::new();
    let rule = "=".repeat(RULE_WIDTH + 10);
    lines.push(rule.clone());
    lines.push(format!("Task ID: {}", task.id));
    lines.push(format!("Description: {}", task.description));
    lines.push(format!("Priority: {}", task.priority));
    lines.push(format!("Status: {}", status(task)));
    lines.push(format!(
        "Created: {} ({} ago)",
        task.created_at.format("%Y-%m-%d"),
        age(task)
    ));
    if task.tags.is_empty() {
        lines.push("Tags: None".to_string());
    } else {
        lines.push(format!("Tags: {}", task.tags.join(" ")));
    }
    lines.push(String::new());
    lines.push("Notes:".to_string());
    if task.notes.is_empty() {
        lines.push("  (No notes)".to_string());
    } else {
        let wrapped = textwrap::fill(&task.notes, NOTES_WIDTH);
        lines.push(textwrap::indent(&wrapped, "  ").trim_end().to_string());
    }
    lines.push(rule);
    lines.join("\n") + "\n"
}

/// How long ago the task was created, to the minute.
fn age(task: &Task) -> String {
    let seconds = (Local::now().naive_local() - task.created_at).num_seconds().max(0) as u64;
    let minutes = seconds - seconds % 60;
    if minutes == 0 {
        return "moments".to_string();
    }
    format_duration(STDDuration::from_secs(minutes)).to_string()
}

fn status(task: &Task) -> &'static str {
    if task.completed {
        "✓ Done"
    } else {
        "Pending"
    }
}

fn truncate(text: &str, max_length: usize) -> String {
    text.chars().take(max_length).collect()
}

fn not_found(out: &mut dyn Write, id: u32) -> Result<()> {
    print_error(out, &format!("Task {} not found", id))
}

fn print_success(out: &mut dyn Write, message: &str) -> Result<()> {
    writeln!(out, "✓ {}", message)?;
    Ok(())
}

fn print_error(out: &mut dyn Write, message: &str) -> Result<()> {
    writeln!(out, "Error: {}", message)?;
    Ok(())
}
