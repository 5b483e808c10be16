mod csv;
mod domain;
mod format;
mod persistence;
mod reconcile;
mod service;
mod summary;
mod ticker;
mod tracker;
mod webhook;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use csv::{import_csv, merge_tasks, MergeMode};
use domain::{RateTable, Settings, Task, TaskId, TaskSlot, TaskSpec};
use format::{format_currency, format_hms, parse_hms};
use persistence::{Snapshot, Store};
use reconcile::{reconcile, EditedField, TimeFields};
use service::{Request, Response, RetryPolicy, Service};
use std::fs;
use std::path::PathBuf;
use summary::{summarize, Period};
use tracing_subscriber::EnvFilter;
use webhook::HttpWebhook;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "A task time tracker with pause/resume, CSV export, and billing rates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new task, archiving any active one
    Start {
        title: String,
        #[arg(short, long)]
        customer: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        billable: bool,
    },
    /// Archive the active task and start a new one
    Restart {
        title: String,
        #[arg(short, long)]
        customer: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        #[arg(short, long)]
        billable: bool,
    },
    /// Pause the running task
    Pause,
    /// Stop the running task and archive it
    Stop,
    /// Resume the paused task
    Resume,
    /// Stop the paused task without resuming it
    StopPaused,
    /// Show the current tracking state
    Status,
    /// List the completed task history
    List {
        /// Restrict to a period and print totals: today, week, or month
        #[arg(short, long)]
        period: Option<String>,
    },
    /// Edit a task's fields
    Edit {
        id: i64,
        /// Which slot holds the task: current, paused, or completed
        #[arg(short, long, default_value = "completed")]
        slot: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        billable: Option<bool>,
        /// New start time (RFC 3339, or HH:MM on the task's start date)
        #[arg(long)]
        start: Option<String>,
        /// New end time (RFC 3339, or HH:MM on the task's start date)
        #[arg(long)]
        end: Option<String>,
        /// New duration as HH:MM:SS; re-anchors the start time
        #[arg(long)]
        duration: Option<String>,
    },
    /// Delete a task
    Delete {
        id: i64,
        #[arg(short, long, default_value = "completed")]
        slot: String,
    },
    /// Export the task history as CSV
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import tasks from a CSV file
    Import {
        file: PathBuf,
        #[arg(short, long, value_enum, default_value = "append")]
        mode: ImportMode,
    },
    /// Update settings and catalogs
    Set {
        #[arg(long)]
        default_customer: Option<String>,
        #[arg(long)]
        default_project: Option<String>,
        #[arg(long)]
        default_billable: Option<bool>,
        #[arg(long)]
        webhook_url: Option<String>,
        #[arg(long)]
        webhook_enabled: Option<bool>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        currency_format: Option<String>,
        /// Add a customer entry, optionally with a rate: "Acme" or "Acme,50"
        #[arg(long = "add-customer")]
        add_customers: Vec<String>,
        /// Add a project entry, optionally with a rate
        #[arg(long = "add-project")]
        add_projects: Vec<String>,
    },
    /// Follow the running task, printing a timer line every second
    Watch,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImportMode {
    Replace,
    Append,
    Update,
}

impl From<ImportMode> for MergeMode {
    fn from(mode: ImportMode) -> Self {
        match mode {
            ImportMode::Replace => MergeMode::Replace,
            ImportMode::Append => MergeMode::Append,
            ImportMode::Update => MergeMode::Update,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = Store::open_default()?;
    let mut service = Service::new(store.clone(), Box::new(HttpWebhook::new()));
    let policy = RetryPolicy::default();
    send(&mut service, &policy, Request::GetInitialState)?;

    match cli.command {
        Commands::Start {
            title,
            customer,
            project,
            billable,
        } => {
            let spec = fill_spec(&mut service, &policy, title, customer, project, billable)?;
            match send(&mut service, &policy, Request::StartTask(spec))? {
                Response::Task(task) => println!("Started \"{}\" ({})", task.title, task.id),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        Commands::Restart {
            title,
            customer,
            project,
            billable,
        } => {
            let spec = fill_spec(&mut service, &policy, title, customer, project, billable)?;
            match send(&mut service, &policy, Request::RestartTask(spec))? {
                Response::Task(task) => println!("Started \"{}\" ({})", task.title, task.id),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        Commands::Pause => {
            if let Response::Task(task) = send(&mut service, &policy, Request::PauseTask)? {
                println!(
                    "Paused \"{}\" at {}",
                    task.title,
                    format_hms(task.duration_ms)
                );
            }
        }
        Commands::Stop => {
            if let Response::Task(task) = send(&mut service, &policy, Request::StopTask)? {
                println!(
                    "Stopped \"{}\" after {}",
                    task.title,
                    format_hms(task.duration_ms)
                );
            }
        }
        Commands::Resume => {
            if let Response::Task(task) = send(&mut service, &policy, Request::ResumeTask)? {
                println!(
                    "Resumed \"{}\" with {} accrued",
                    task.title,
                    format_hms(task.duration_ms)
                );
            }
        }
        Commands::StopPaused => {
            if let Response::Task(task) = send(&mut service, &policy, Request::StopPausedTask)? {
                println!(
                    "Stopped \"{}\" after {}",
                    task.title,
                    format_hms(task.duration_ms)
                );
            }
        }
        Commands::Status => {
            let snapshot = current_state(&mut service, &policy)?;
            print_status(&snapshot);
        }
        Commands::List { period } => {
            let period = period
                .map(|p| {
                    Period::from_name(&p).ok_or_else(|| {
                        anyhow!("unknown period \"{p}\"; expected today, week, or month")
                    })
                })
                .transpose()?;
            let snapshot = current_state(&mut service, &policy)?;
            print_history(&snapshot, period);
        }
        Commands::Edit {
            id,
            slot,
            title,
            customer,
            project,
            billable,
            start,
            end,
            duration,
        } => {
            let slot = parse_slot(&slot)?;
            let snapshot = current_state(&mut service, &policy)?;
            let task = find_task(&snapshot, TaskId(id), slot)
                .ok_or_else(|| anyhow!("no {} task with id {id}", slot.name()))?;

            let edited = apply_edits(
                task, title, customer, project, billable, start, end, duration,
            )?;
            send(
                &mut service,
                &policy,
                Request::UpdateTask { task: edited, slot },
            )?;
            println!("Updated task {id}");
        }
        Commands::Delete { id, slot } => {
            let slot = parse_slot(&slot)?;
            send(
                &mut service,
                &policy,
                Request::DeleteTask {
                    id: TaskId(id),
                    slot,
                },
            )?;
            println!("Deleted task {id}");
        }
        Commands::Export { output } => {
            match send(&mut service, &policy, Request::ExportTasks)? {
                Response::Csv(body) => match output {
                    Some(path) => {
                        fs::write(&path, &body)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!(
                            "Exported {} tasks to {}",
                            body.lines().count() - 1,
                            path.display()
                        );
                    }
                    None => println!("{body}"),
                },
                other => bail!("unexpected response: {other:?}"),
            }
        }
        Commands::Import { file, mode } => {
            run_import(&mut service, &policy, &store, &file, mode.into())?;
        }
        Commands::Set {
            default_customer,
            default_project,
            default_billable,
            webhook_url,
            webhook_enabled,
            currency,
            currency_format,
            add_customers,
            add_projects,
        } => {
            let snapshot = current_state(&mut service, &policy)?;
            let mut settings = snapshot.settings.clone();
            apply_opt(&mut settings.default_customer, default_customer);
            apply_opt(&mut settings.default_project, default_project);
            apply_opt(&mut settings.default_billable, default_billable);
            apply_opt(&mut settings.webhook_url, webhook_url);
            apply_opt(&mut settings.webhook_enabled, webhook_enabled);
            apply_opt(&mut settings.currency, currency);
            apply_opt(&mut settings.currency_format, currency_format);

            let mut customers = snapshot.customers;
            customers.extend(add_customers);
            let mut projects = snapshot.projects;
            projects.extend(add_projects);

            send(
                &mut service,
                &policy,
                Request::UpdateSettings {
                    settings,
                    customers,
                    projects,
                },
            )?;
            println!("Settings updated");
        }
        Commands::Watch => run_watch(&mut service)?,
    }

    Ok(())
}

/// Send a request, retrying transient failures per the policy.
fn send(service: &mut Service, policy: &RetryPolicy, request: Request) -> Result<Response> {
    Ok(policy.run(|| service.handle(request.clone()))?)
}

/// Fill omitted start flags from the persisted defaults.
fn fill_spec(
    service: &mut Service,
    policy: &RetryPolicy,
    title: String,
    customer: Option<String>,
    project: Option<String>,
    billable: bool,
) -> Result<TaskSpec> {
    let settings = current_state(service, policy)?.settings;
    Ok(TaskSpec {
        title,
        customer: customer.unwrap_or(settings.default_customer),
        project: project.unwrap_or(settings.default_project),
        billable: billable || settings.default_billable,
    })
}

fn current_state(service: &mut Service, policy: &RetryPolicy) -> Result<Snapshot> {
    match send(service, policy, Request::GetInitialState)? {
        Response::State(snapshot) => Ok(snapshot),
        other => bail!("unexpected response: {other:?}"),
    }
}

fn parse_slot(name: &str) -> Result<TaskSlot> {
    TaskSlot::from_name(name)
        .ok_or_else(|| anyhow!("unknown slot \"{name}\"; expected current, paused, or completed"))
}

fn find_task(snapshot: &Snapshot, id: TaskId, slot: TaskSlot) -> Option<Task> {
    match slot {
        TaskSlot::Current => snapshot.current_task.clone().filter(|t| t.id == id),
        TaskSlot::Paused => snapshot.paused_task.clone().filter(|t| t.id == id),
        TaskSlot::Completed => snapshot.tasks.iter().find(|t| t.id == id).cloned(),
    }
}

/// Merge command-line edits into a task, reconciling the time fields.
#[allow(clippy::too_many_arguments)]
fn apply_edits(
    mut task: Task,
    title: Option<String>,
    customer: Option<String>,
    project: Option<String>,
    billable: Option<bool>,
    start: Option<String>,
    end: Option<String>,
    duration: Option<String>,
) -> Result<Task> {
    apply_opt(&mut task.title, title);
    apply_opt(&mut task.customer, customer);
    apply_opt(&mut task.project, project);
    apply_opt(&mut task.billable, billable);

    if start.is_none() && end.is_none() && duration.is_none() {
        return Ok(task);
    }

    let mut fields = TimeFields {
        start: task.start_time,
        end: task
            .end_time
            .unwrap_or(task.start_time + chrono::Duration::milliseconds(task.duration_ms)),
        duration_ms: task.duration_ms,
    };

    // The last-named field wins: duration over end over start
    let mut edited = EditedField::Start;
    if let Some(raw) = start {
        fields.start = parse_edit_time(&raw, task.start_time)?;
    }
    if let Some(raw) = end {
        fields.end = parse_edit_time(&raw, task.start_time)?;
        edited = EditedField::End;
    }
    if let Some(raw) = duration {
        fields.duration_ms =
            parse_hms(&raw).ok_or_else(|| anyhow!("invalid duration \"{raw}\"; use HH:MM:SS"))?;
        edited = EditedField::Duration;
    }

    let out = reconcile(fields, edited);
    task.start_time = out.start;
    task.duration_ms = out.duration_ms;
    if task.end_time.is_some() {
        task.end_time = Some(out.end);
    }
    Ok(task)
}

/// Accept a full RFC 3339 timestamp, or a bare time of day placed on the
/// same date as `anchor`.
fn parse_edit_time(raw: &str, anchor: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| anyhow!("invalid time \"{raw}\"; use RFC 3339 or HH:MM"))?;
    Utc.from_local_datetime(&anchor.date_naive().and_time(time))
        .single()
        .ok_or_else(|| anyhow!("ambiguous time \"{raw}\""))
}

fn apply_opt<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn print_status(snapshot: &Snapshot) {
    let now = Utc::now();
    let rates = RateTable::new(&snapshot.customers, &snapshot.projects);

    if let Some(task) = &snapshot.current_task {
        let total = task.live_duration_ms(now);
        println!("Running: \"{}\" ({})", task.title, task.id);
        println!("  elapsed  {}", format_hms(total));
        print_task_labels(task, &rates, total, &snapshot.settings);
    } else if let Some(task) = &snapshot.paused_task {
        println!("Paused: \"{}\" ({})", task.title, task.id);
        println!("  elapsed  {}", format_hms(task.duration_ms));
        print_task_labels(task, &rates, task.duration_ms, &snapshot.settings);
    } else {
        println!("Idle ({} completed tasks)", snapshot.tasks.len());
    }
}

fn print_task_labels(task: &Task, rates: &RateTable, duration_ms: i64, settings: &Settings) {
    if !task.customer.is_empty() {
        println!("  customer {}", task.customer);
    }
    if !task.project.is_empty() {
        println!("  project  {}", task.project);
    }
    let revenue =
        rates.projected_revenue(&task.customer, &task.project, task.billable, duration_ms);
    if revenue > 0.0 {
        println!(
            "  revenue  {}",
            format_currency(revenue, &settings.currency, &settings.currency_format)
        );
    }
}

fn print_history(snapshot: &Snapshot, period: Option<Period>) {
    let now = Utc::now();
    let rates = RateTable::new(&snapshot.customers, &snapshot.projects);
    let tasks: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|t| period.map_or(true, |p| p.contains(t.start_time, now)))
        .collect();

    if tasks.is_empty() && period.is_none() {
        println!("No completed tasks");
        return;
    }
    for task in tasks {
        let revenue = rates.projected_revenue(
            &task.customer,
            &task.project,
            task.billable,
            task.duration_ms,
        );
        let revenue = if revenue > 0.0 {
            format!(
                "  {}",
                format_currency(
                    revenue,
                    &snapshot.settings.currency,
                    &snapshot.settings.currency_format
                )
            )
        } else {
            String::new()
        };
        println!(
            "{}  {}  [{}] {} / {} {}{}",
            task.id,
            format_hms(task.duration_ms),
            if task.billable { "Y" } else { "N" },
            if task.customer.is_empty() { "-" } else { task.customer.as_str() },
            if task.project.is_empty() { "-" } else { task.project.as_str() },
            task.title,
            revenue,
        );
    }

    if let Some(period) = period {
        let totals = summarize(
            &snapshot.tasks,
            snapshot.current_task.as_ref(),
            &rates,
            period,
            now,
        );
        let revenue = if totals.revenue > 0.0 {
            format!(
                ", {} projected",
                format_currency(
                    totals.revenue,
                    &snapshot.settings.currency,
                    &snapshot.settings.currency_format
                )
            )
        } else {
            String::new()
        };
        println!(
            "{}: {} tasks, {} tracked, {} billable{}",
            period.name(),
            totals.task_count,
            format_hms(totals.total_ms),
            format_hms(totals.billable_ms),
            revenue,
        );
    }
}

fn run_import(
    service: &mut Service,
    policy: &RetryPolicy,
    store: &Store,
    file: &PathBuf,
    mode: MergeMode,
) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let report = import_csv(&text, Utc::now())?;

    for err in &report.errors {
        eprintln!("skipped: {err}");
    }

    let mut snapshot = current_state(service, policy)?;
    let outcome = merge_tasks(snapshot.tasks, report.tasks, mode);
    snapshot.tasks = outcome.tasks;
    store.save(&snapshot)?;
    send(service, policy, Request::ReloadData)?;

    println!(
        "Imported {} tasks ({} added, {} updated, {} skipped)",
        outcome.added + outcome.updated,
        outcome.added,
        outcome.updated,
        report.errors.len()
    );
    Ok(())
}

fn run_watch(service: &mut Service) -> Result<()> {
    let rx = service.subscribe();
    println!("Watching (Ctrl-C to quit)");
    loop {
        service.tick();
        for note in rx.try_iter() {
            if let service::Notification::TimerUpdate {
                formatted_time,
                session_duration_ms,
                ..
            } = note
            {
                println!(
                    "{}  (session {})",
                    formatted_time,
                    format_hms(session_duration_ms)
                );
            }
        }
        std::thread::sleep(ticker::tick_duration());
    }
}
