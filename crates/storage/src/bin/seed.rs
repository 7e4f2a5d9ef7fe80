use std::fmt;

use chrono::{DateTime, Duration, Utc};
use classroom_core::model::{
    AnswerValue, Answers, FieldDefinition, FieldKind, Role, StudentId, SubmissionKey, TaskDraft,
    TaskId, TaskSubmission, TeacherId, validate_message,
};
use storage::repository::{Storage, StudentRecord};

const MESSAGE_MAX: usize = 2000;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    teacher_id: TeacherId,
    task_id: TaskId,
    students: u32,
    help_requests: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidCount { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidCount { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_u64(flag: &'static str, value: String) -> Result<u64, ArgsError> {
    value
        .trim()
        .parse()
        .map_err(|_| ArgsError::InvalidId { flag, raw: value })
}

fn parse_count(flag: &'static str, value: String) -> Result<u32, ArgsError> {
    value
        .trim()
        .parse()
        .map_err(|_| ArgsError::InvalidCount { flag, raw: value })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("CLASSROOM_DB_URL").unwrap_or_else(|_| "sqlite://classroom.sqlite3".into());
        let mut teacher_id = TeacherId::new(1);
        let mut task_id = TaskId::new(1);
        let mut students = std::env::var("CLASSROOM_SEED_STUDENTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(6);
        let mut help_requests = 2;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--teacher-id" => {
                    let value = require_value(&mut args, "--teacher-id")?;
                    teacher_id = TeacherId::new(parse_u64("--teacher-id", value)?);
                }
                "--task-id" => {
                    let value = require_value(&mut args, "--task-id")?;
                    task_id = TaskId::new(parse_u64("--task-id", value)?);
                }
                "--students" => {
                    let value = require_value(&mut args, "--students")?;
                    students = parse_count("--students", value)?;
                }
                "--help-requests" => {
                    let value = require_value(&mut args, "--help-requests")?;
                    help_requests = parse_count("--help-requests", value)?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            teacher_id,
            task_id,
            students,
            help_requests: help_requests.min(students),
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://classroom.sqlite3)");
    eprintln!("  --teacher-id <id>         Owner of the seeded task (default: 1)");
    eprintln!("  --task-id <id>            Task id to upsert (default: 1)");
    eprintln!("  --students <n>            Roster size (default: 6)");
    eprintln!("  --help-requests <n>       Students that raise help (default: 2)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CLASSROOM_DB_URL, CLASSROOM_SEED_STUDENTS");
}

const NAMES: [&str; 6] = ["Ada", "Grace", "Alan", "Barbara", "Edsger", "Frances"];

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let mut draft = TaskDraft::new(args.teacher_id, "Fractions worksheet");
    draft.description = "Show your working for each question.".into();
    draft.subject = "Maths".into();
    let task = draft
        .with_field(FieldDefinition::new("q1", FieldKind::ShortText, "1/2 + 1/4 = ?").required())
        .with_field(FieldDefinition::new("q2", FieldKind::Number, "How many quarters in 3?").required())
        .with_field(FieldDefinition::new("q3", FieldKind::LongText, "Explain your method").required())
        .with_field(FieldDefinition::new("notes", FieldKind::LongText, "Notes"))
        .validate(args.task_id)?;
    storage.tasks.upsert_task(&task).await?;

    for i in 0..args.students {
        let student_id = StudentId::new(u64::from(i + 1));
        let name = NAMES[(i as usize) % NAMES.len()];
        storage
            .students
            .upsert_student(&StudentRecord::new(student_id, name))
            .await?;

        let key = SubmissionKey::new(task.id(), student_id);
        let saved_at = now - Duration::minutes(i64::from(args.students - i));
        let mut submission = TaskSubmission::new(key);
        let mut edits = Answers::new();
        edits.insert("q1".into(), AnswerValue::text("3/4"));
        if i % 2 == 0 {
            edits.insert("q2".into(), AnswerValue::Number(12.0));
        }
        submission.record_answers(&task, edits, saved_at)?;
        storage.submissions.save_answers(&submission).await?;

        if i < args.help_requests {
            storage
                .submissions
                .set_needs_help(key, true, saved_at)
                .await?;
            let message = validate_message(
                Role::Student,
                "I am stuck on question 3.",
                saved_at,
                MESSAGE_MAX,
            )?;
            storage.submissions.append_help_message(key, &message).await?;
        }
    }

    println!(
        "Seeded task {} for teacher {} with {} students ({} asking for help) into {}",
        task.id(),
        args.teacher_id,
        args.students,
        args.help_requests,
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
