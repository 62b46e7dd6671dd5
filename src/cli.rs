use std::path::PathBuf;
use structopt::clap::AppSettings;
use structopt::StructOpt;

use crate::model::Priority;
use crate::store::IdPolicy;

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Add a new task. Words starting with # become tags, a trailing
    /// low/medium/high sets the priority.
    #[structopt(setting = AppSettings::AllowLeadingHyphen)]
    Add {
        #[structopt(required = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// List pending tasks, or every task with `all`.
    List {
        scope: Option<String>,
    },
    /// Search descriptions and notes for a keyword.
    #[structopt(setting = AppSettings::AllowLeadingHyphen)]
    Search {
        #[structopt(required = true, allow_hyphen_values = true)]
        keyword: Vec<String>,
    },
    /// Show the tasks carrying a tag. Only the first tag given is used.
    Filter {
        #[structopt(required = true)]
        tags: Vec<String>,
    },
    /// List every tag in use.
    Tags,
    /// Add tags to a task.
    Tag {
        id: u32,
        #[structopt(required = true)]
        tags: Vec<String>,
    },
    /// Remove tags from a task.
    Untag {
        id: u32,
        #[structopt(required = true)]
        tags: Vec<String>,
    },
    /// Set the notes of a task, replacing previous ones.
    #[structopt(setting = AppSettings::AllowLeadingHyphen)]
    Note {
        id: u32,
        #[structopt(required = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Show a task with its notes.
    View {
        id: u32,
    },
    /// Mark a task as completed.
    Complete {
        id: u32,
    },
    /// Delete a task.
    Delete {
        id: u32,
    },
    /// Summarize a task description with the configured summarizer.
    Summarize {
        id: u32,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "tasq",
    about = "A small personal task tracker. Starts an interactive shell when no command is given."
)]
pub struct CommandLineArgs {
    #[structopt(subcommand)]
    pub action: Option<Command>,

    /// Use a different tasks file.
    #[structopt(parse(from_os_str), short = "f", long, env = "TASQ_FILE")]
    pub tasks_file: Option<PathBuf>,

    /// How ids are given to new tasks.
    #[structopt(long, default_value = "live-count", possible_values = &["live-count", "monotonic"])]
    pub id_policy: IdPolicy,

    /// Shell command used by `summarize`; it reads the text on stdin.
    #[structopt(long, env = "TASQ_SUMMARIZER")]
    pub summarizer: Option<String>,

    /// Log more (repeat for even more).
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

/// One line typed at the interactive prompt.
#[derive(Debug, StructOpt)]
#[structopt(
    name = "task>",
    settings = &[
        AppSettings::NoBinaryName,
        AppSettings::DisableVersion,
        AppSettings::VersionlessSubcommands,
    ]
)]
pub struct ShellLine {
    #[structopt(subcommand)]
    pub command: Command,
}

impl ShellLine {
    pub fn parse(line: &str) -> Result<ShellLine, structopt::clap::Error> {
        ShellLine::from_iter_safe(line.split_whitespace())
    }
}

/// The parts of an `add` command line.
#[derive(Debug, PartialEq)]
pub struct NewTask {
    pub description: String,
    pub priority: String,
    pub tags: Vec<String>,
}

/// Split `add` words into description, priority and tags. The last plain
/// word only counts as a priority when something is left for the
/// description.
pub fn parse_add_words(words: &[String]) -> NewTask {
    let (tags, mut rest): (Vec<String>, Vec<String>) =
        words.iter().cloned().partition(|w| w.starts_with('#'));

    let mut priority = Priority::default().to_string();
    if rest.len() > 1 {
        if let Some(p) = rest.last().and_then(|w| Priority::parse(w)) {
            priority = p.to_string();
            rest.pop();
        }
    }

    NewTask {
        description: rest.join(" "),
        priority,
        tags,
    }
}

/// `list all` (any case) shows completed tasks too; anything else is the
/// pending list.
pub fn shows_completed(scope: Option<&str>) -> bool {
    scope.map_or(false, |s| s.eq_ignore_ascii_case("all"))
}

/// Whether a prompt line asks to leave. Only the first word counts.
pub fn is_exit(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map_or(false, |w| w.eq_ignore_ascii_case("exit") || w.eq_ignore_ascii_case("quit"))
}

/// Keep only the arguments that look like tags.
pub fn tag_arguments(args: &[String]) -> Vec<String> {
    args.iter().filter(|a| a.starts_with('#')).cloned().collect()
}
