mod init;
pub use init::cmd_init;

use std::io::{self, BufReader};
use std::path::PathBuf;

use chrono::Local;

use crate::app::{App, run_panel};
use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::config_io;
use crate::io::store::TaskStore;
use crate::model::config::Config;
use crate::model::task::Task;
use crate::model::view::ViewMode;
use crate::ops::hierarchy::{self, Outcome};
use crate::ops::reminder::{fire_due, parse_when};
use crate::ops::view::{commit_placeholder, project};
use crate::sync::{SyncSettings, run_sync};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let dir = config_io::config_dir(cli.config_dir.as_deref());

    let command = match cli.command {
        Commands::Init(args) => return cmd_init(&dir, args),
        command => command,
    };

    let (config, created) = config_io::load_or_init(&dir)?;
    if created {
        log::info!("first run: wrote default config in {}", dir.display());
    }
    let ctx = Context { dir, config };

    match command {
        Commands::Init(_) => unreachable!("init runs before the config is loaded"),
        Commands::List(args) => cmd_list(&ctx, args),
        Commands::Add(args) => cmd_add(&ctx, args),
        Commands::Insert(args) => cmd_insert(&ctx, args),
        Commands::Edit(args) => cmd_edit(&ctx, args),
        Commands::Done(args) => cmd_done(&ctx, args),
        Commands::Star(args) => cmd_star(&ctx, args),
        Commands::Indent(args) => cmd_structure(&ctx, args, "indent", hierarchy::indent),
        Commands::Unindent(args) => cmd_structure(&ctx, args, "unindent", hierarchy::unindent),
        Commands::Up(args) => cmd_structure(&ctx, args, "up", hierarchy::move_group_up),
        Commands::Down(args) => cmd_structure(&ctx, args, "down", hierarchy::move_group_down),
        Commands::Rm(args) => cmd_rm(&ctx, args),
        Commands::Remind(args) => cmd_remind(&ctx, args),
        Commands::Due => cmd_due(&ctx),
        Commands::Sync(args) => cmd_sync(&ctx, args),
        Commands::Config(cmd) => cmd_config(&ctx, cmd),
        Commands::Panel => cmd_panel(ctx),
    }
}

/// Resolved config directory plus the config read from it.
struct Context {
    dir: PathBuf,
    config: Config,
}

impl Context {
    fn data_file(&self) -> PathBuf {
        self.config.data_file_path(&self.dir)
    }

    /// Lock the task file, load it, run `op`, and save if it changed.
    /// A file that exists but does not decode is never overwritten.
    /// `op` returns the edit outcome and the message to print.
    fn modify<F>(&self, op: F) -> CmdResult
    where
        F: FnOnce(&mut Vec<Task>) -> Result<(Outcome, String), Box<dyn std::error::Error>>,
    {
        let mut store = TaskStore::open_locked(self.data_file())?;
        let mut tasks = store
            .try_load()
            .map_err(|e| format!("{} (left unchanged)", e))?;
        let (outcome, message) = op(&mut tasks)?;
        if outcome.changed && !store.save(&tasks) {
            return Err(format!("could not save {}", store.path().display()).into());
        }
        println!("{}", message);
        Ok(())
    }
}

fn view_for(completed: bool) -> ViewMode {
    if completed {
        ViewMode::Completed
    } else {
        ViewMode::Active
    }
}

/// Turn a 1-based display number into a storage index.
fn resolve(tasks: &[Task], args: &TaskArgs) -> Result<usize, String> {
    let view = view_for(args.completed);
    let projection = project(tasks, view);
    args.number
        .checked_sub(1)
        .and_then(|pos| projection.storage_index(pos))
        .ok_or_else(|| {
            format!(
                "no task {} in the {} view ({} tasks)",
                args.number,
                view.name(),
                projection.len()
            )
        })
}

fn text_of(tasks: &[Task], index: Option<usize>) -> &str {
    index.and_then(|i| tasks.get(i)).map_or("", |t| t.text.as_str())
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_list(ctx: &Context, args: ListArgs) -> CmdResult {
    let tasks = TaskStore::open(ctx.data_file()).load();
    let projection = project(&tasks, view_for(args.completed));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&list_to_json(&tasks, &projection))?);
        return Ok(());
    }
    if projection.is_empty() {
        println!("No {} tasks.", projection.mode.name());
        return Ok(());
    }
    for line in format_list(&tasks, &projection, args.width) {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_config(ctx: &Context, cmd: ConfigCmd) -> CmdResult {
    match cmd.action {
        ConfigAction::Show => {
            let path = config_io::config_path(&ctx.dir);
            println!("# {}", path.display());
            if let Some((_, doc)) = config_io::read_config(&ctx.dir)? {
                print!("{}", doc);
            }
            println!("# data file: {}", ctx.data_file().display());
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            let mut doc = match config_io::read_config(&ctx.dir)? {
                Some((_, doc)) => doc,
                None => config_io::default_config_doc(&ctx.data_file()),
            };
            config_io::set_value(&mut doc, &key, &value)?;
            config_io::write_config(&ctx.dir, &doc)?;
            println!("Set {} = {}", key, value.trim());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_add(ctx: &Context, args: AddArgs) -> CmdResult {
    ctx.modify(|tasks| {
        let outcome = commit_placeholder(tasks, &args.text);
        if !outcome.changed {
            return Err("task text is empty".into());
        }
        let number = project(tasks, ViewMode::Active).len();
        Ok((outcome, format!("Added {}. {}", number, text_of(tasks, outcome.selected))))
    })
}

fn cmd_insert(ctx: &Context, args: InsertArgs) -> CmdResult {
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args.task)?;
        let outcome = hierarchy::insert_after(tasks, index);
        if let (Some(text), Some(new)) = (args.text.as_deref(), outcome.selected) {
            hierarchy::set_text(tasks, new, text.trim());
        }
        let number = outcome
            .selected
            .and_then(|i| project(tasks, ViewMode::Active).display_position(i))
            .map_or(0, |pos| pos + 1);
        Ok((outcome, format!("Inserted {}. {}", number, text_of(tasks, outcome.selected))))
    })
}

fn cmd_edit(ctx: &Context, args: EditArgs) -> CmdResult {
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args.task)?;
        if tasks[index].done {
            return Err(format!("task {} is completed and cannot be edited", args.task.number).into());
        }
        let outcome = hierarchy::set_text(tasks, index, &args.text);
        Ok((outcome, format!("Updated: {}", tasks[index].text)))
    })
}

fn cmd_done(ctx: &Context, args: TaskArgs) -> CmdResult {
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args)?;
        let outcome = hierarchy::toggle_done(tasks, index);
        let verb = if tasks[index].done { "Completed" } else { "Reopened" };
        Ok((outcome, format!("{}: {}", verb, tasks[index].text)))
    })
}

fn cmd_star(ctx: &Context, args: TaskArgs) -> CmdResult {
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args)?;
        let outcome = hierarchy::toggle_star(tasks, index);
        let task = &tasks[index];
        let message = if task.is_starred() {
            format!("Starred ({}): {}", task.star_color(), task.text)
        } else {
            format!("Unstarred: {}", task.text)
        };
        Ok((outcome, message))
    })
}

/// Indent, unindent and group moves: only meaningful in the active view.
fn cmd_structure(
    ctx: &Context,
    args: TaskArgs,
    name: &str,
    op: fn(&mut [Task], usize) -> Outcome,
) -> CmdResult {
    if !view_for(args.completed).allows_structure_edits() {
        return Err(format!("{} is only available in the active view", name).into());
    }
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args)?;
        let outcome = op(tasks, index);
        let message = if outcome.changed {
            let number = outcome
                .selected
                .and_then(|i| project(tasks, ViewMode::Active).display_position(i))
                .map_or(0, |pos| pos + 1);
            format!("Moved to {}. {}", number, text_of(tasks, outcome.selected))
        } else {
            format!("Unchanged: {}", tasks[index].text)
        };
        Ok((outcome, message))
    })
}

fn cmd_rm(ctx: &Context, args: TaskArgs) -> CmdResult {
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args)?;
        let text = tasks[index].text.clone();
        let outcome = hierarchy::delete(tasks, index);
        Ok((outcome, format!("Deleted: {}", text)))
    })
}

fn cmd_remind(ctx: &Context, args: RemindArgs) -> CmdResult {
    let now = Local::now().naive_local();
    ctx.modify(|tasks| {
        let index = resolve(tasks, &args.task)?;
        if args.clear {
            let outcome = hierarchy::clear_reminder(tasks, index);
            return Ok((outcome, format!("Reminder cleared: {}", tasks[index].text)));
        }
        let at = parse_when(args.when.as_deref().unwrap_or(""), now)?;
        let outcome = hierarchy::set_reminder(tasks, index, at);
        Ok((
            outcome,
            format!("Reminder at {}: {}", at.format("%Y-%m-%d %H:%M"), tasks[index].text),
        ))
    })
}

fn cmd_due(ctx: &Context) -> CmdResult {
    let now = Local::now().naive_local();
    ctx.modify(|tasks| match fire_due(tasks, now) {
        Some(fired) => {
            let outcome = Outcome {
                changed: true,
                selected: Some(fired.index),
            };
            Ok((outcome, format!("\u{23f0} {}", fired.text)))
        }
        None => Ok((
            Outcome {
                changed: false,
                selected: None,
            },
            "No reminders due.".to_string(),
        )),
    })
}

// ---------------------------------------------------------------------------
// Sync and panel
// ---------------------------------------------------------------------------

fn cmd_sync(ctx: &Context, args: SyncArgs) -> CmdResult {
    let settings = SyncSettings::from_config(&ctx.config, &ctx.dir, args.interactive)?;
    // The push replaces the remote list, so an unreadable file must not count as empty
    let tasks = TaskStore::open(ctx.data_file()).try_load()?;
    let outcome = run_sync(&tasks, &settings)?;
    if settings.account_id.as_deref() != Some(outcome.account_id.as_str()) {
        config_io::save_account_id(&ctx.dir, &outcome.account_id)?;
    }
    println!(
        "Synced {} tasks to '{}' (replaced {})",
        outcome.report.created,
        settings.list_name.trim(),
        outcome.report.deleted
    );
    Ok(())
}

fn cmd_panel(ctx: Context) -> CmdResult {
    let store = TaskStore::open(ctx.data_file());
    let mut app = App::new(ctx.dir, ctx.config, store);
    app.start_watching();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_panel(&mut app, BufReader::new(io::stdin()), &mut out)?;
    Ok(())
}
