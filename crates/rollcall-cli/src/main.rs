use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use rollcall_core::capture::CancelFlag;
use rollcall_core::gallery::Exclusion;
use rollcall_core::{AttendanceRecord, FinalizedSession, ReportEmitter, RosterSource};
use rollcall_hw::Camera;
use rollcall_store::{CsvFileReport, NewStudent, SqliteStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod snapshot;

use config::Config;
use engine::{Models, SessionPlan};

#[derive(Parser)]
#[command(name = "rollcall", about = "Take attendance from a live camera session")]
struct Cli {
    /// TOML config file (overrides ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an attendance session and record the result
    Run {
        #[command(flatten)]
        class: ClassArgs,
        /// Course the attendance is recorded under
        #[arg(long)]
        course: Option<String>,
        /// Session length in seconds
        #[arg(long)]
        secs: Option<u64>,
        /// Print the session summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build the reference gallery and list who can be recognized
    Gallery {
        #[command(flatten)]
        class: ClassArgs,
        #[arg(long)]
        json: bool,
    },
    /// Register a class for an academic year
    AddClass {
        #[arg(long)]
        class: String,
        #[arg(long)]
        year: String,
    },
    /// Add a student to a class, with an optional reference photo
    Enroll {
        /// Student identity code
        #[arg(long)]
        id: String,
        #[arg(long)]
        first: String,
        #[arg(long)]
        last: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        class: String,
        /// Reference photo used to build the gallery
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show recorded attendance for a course or a student
    #[command(group(ArgGroup::new("scope").required(true).args(["course", "student"])))]
    History {
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// Create the database tables
    InitDb,
}

#[derive(Args)]
struct ClassArgs {
    /// Class name
    #[arg(long)]
    class: Option<String>,
    /// Academic year of the class
    #[arg(long)]
    year: Option<String>,
}

impl ClassArgs {
    fn apply(self, config: &mut Config) {
        if let Some(class) = self.class {
            config.class_name = Some(class);
        }
        if let Some(year) = self.year {
            config.class_year = Some(year);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Run {
            class,
            course,
            secs,
            json,
        } => {
            class.apply(&mut config);
            if let Some(course) = course {
                config.course = Some(course);
            }
            if let Some(secs) = secs {
                config.session_secs = secs;
            }
            run(config, json).await
        }
        Commands::Gallery { class, json } => {
            class.apply(&mut config);
            gallery(config, json)
        }
        Commands::AddClass { class, year } => {
            open_store(&config.db_path)?.add_class(&class, &year)?;
            println!("Class {class} ({year}) registered");
            Ok(())
        }
        Commands::Enroll {
            id,
            first,
            last,
            email,
            class,
            image,
        } => {
            if let Some(image) = &image {
                if !image.is_file() {
                    bail!("reference photo {} does not exist", image.display());
                }
            }
            open_store(&config.db_path)?
                .add_student(&NewStudent {
                    student_id: &id,
                    first_name: &first,
                    last_name: &last,
                    email: &email,
                    class: &class,
                    image_recog: image.as_deref(),
                })
                .with_context(|| format!("failed to enroll {id}"))?;
            if image.is_none() {
                tracing::warn!(student = %id, "enrolled without a reference photo; will always be reported absent");
            }
            println!("Enrolled {id} ({first} {last}) in {class}");
            Ok(())
        }
        Commands::History {
            course,
            student,
            json,
        } => history(&config, course.as_deref(), student.as_deref(), json),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::InitDb => {
            open_store(&config.db_path)?;
            println!("Database ready at {}", config.db_path.display());
            Ok(())
        }
    }
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    let store = SqliteStore::open(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    store.init_schema().context("failed to create database schema")?;
    Ok(store)
}

#[derive(Serialize)]
struct RunSummary<'a> {
    course: &'a str,
    session: &'a FinalizedSession,
    excluded: &'a [Exclusion],
    records: &'a [AttendanceRecord],
    store_failures: Vec<&'a str>,
    report: &'a Path,
    export_error: Option<String>,
}

async fn run(config: Config, json: bool) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let selector = config.selector()?;
    let course = config.course()?.to_string();

    let mut store = open_store(&config.db_path)?;
    let roster = store.members(&selector)?;
    if roster.is_empty() {
        tracing::warn!(class = %selector.class_name, year = %selector.year, "class has no students");
    }

    let mut models = Models::load(&config).context("failed to load face models")?;
    let build = models.build_gallery(&roster);
    let excluded = build.excluded.clone();
    let plan = SessionPlan::new(&config, build)?;

    let cancel = CancelFlag::new();
    let session = engine::run_session(plan, models, cancel.clone());
    tokio::pin!(session);

    let finalized = tokio::select! {
        result = &mut session => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; ending session early");
            cancel.cancel();
            session.await
        }
    }
    .context("attendance session failed")?;

    let mut report = CsvFileReport::in_dir(&config.report_dir, &course);
    let outcome = ReportEmitter::new(course.as_str()).emit(&finalized, &roster, &mut store, &mut report);

    let summary = RunSummary {
        course: &course,
        session: &finalized,
        excluded: &excluded,
        records: &outcome.records,
        store_failures: outcome.store_failures.iter().map(|f| f.code.as_str()).collect(),
        report: report.path(),
        export_error: outcome.export_error.as_ref().map(ToString::to_string),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &roster);
    }

    if !outcome.is_complete() {
        bail!(
            "attendance not fully recorded: {} store failure(s){}",
            outcome.store_failures.len(),
            if outcome.export_error.is_some() { ", report export failed" } else { "" }
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary<'_>, roster: &[rollcall_core::RosterMember]) {
    let session = summary.session;
    println!(
        "{}: {} ({:.1}s{})",
        summary.course,
        session.started_at.format("%Y-%m-%d %H:%M"),
        session.elapsed.as_secs_f32(),
        if session.was_cancelled() { ", cancelled" } else { "" }
    );
    for (record, member) in summary.records.iter().zip(roster) {
        println!("  {:<12} {:<28} {}", record.code, member.name, record.status);
    }
    println!(
        "{} present, {} absent; {} frames processed, {} missed",
        session.present.len(),
        session.absent.len(),
        session.stats.frames_processed,
        session.stats.frames_missed
    );
    for exclusion in summary.excluded {
        println!("  not in gallery: {} ({:?})", exclusion.code, exclusion.reason);
    }
    match &summary.export_error {
        Some(e) => println!("Report not written: {e}"),
        None => println!("Report: {}", summary.report.display()),
    }
    for code in &summary.store_failures {
        println!("  not stored: {code}");
    }
}

#[derive(Serialize)]
struct GalleryListing<'a> {
    enrolled: Vec<&'a str>,
    excluded: &'a [Exclusion],
}

fn gallery(config: Config, json: bool) -> Result<()> {
    let selector = config.selector()?;
    let store = open_store(&config.db_path)?;
    let roster = store.members(&selector)?;

    let mut models = Models::load(&config).context("failed to load face models")?;
    let build = models.build_gallery(&roster);

    let listing = GalleryListing {
        enrolled: build
            .gallery
            .entries()
            .iter()
            .map(|e| e.code.as_str())
            .collect(),
        excluded: &build.excluded,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!(
        "{} of {} members enrolled",
        listing.enrolled.len(),
        build.gallery.roster_codes().len()
    );
    for code in &listing.enrolled {
        println!("  ok        {code}");
    }
    for exclusion in listing.excluded {
        println!("  excluded  {} ({:?})", exclusion.code, exclusion.reason);
    }
    Ok(())
}

fn history(config: &Config, course: Option<&str>, student: Option<&str>, json: bool) -> Result<()> {
    let store = open_store(&config.db_path)?;
    let records = match (course, student) {
        (Some(course), _) => store.attendance(course)?,
        (None, Some(code)) => store.student_history(code)?,
        (None, None) => bail!("either --course or --student is required"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No attendance recorded");
    }
    for r in &records {
        println!(
            "{}  {}  {:<12} {:<20} {}",
            r.date.format("%Y-%m-%d"),
            r.time.format("%H:%M:%S"),
            r.code,
            r.course,
            r.status
        );
    }
    Ok(())
}
