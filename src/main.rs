use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use playbook::config::Config;
use playbook::engine::{IncidentEngine, StepSubmission};
use playbook::logging;
use playbook::progress::{NextStep, ProgressReport};
use playbook::records::IncidentRecord;
use playbook::rest;

#[derive(Parser)]
#[command(name = "playbook")]
#[command(about = "Incident-response playbook engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default project config to .playbook/config.toml
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show incident classes and types, or the plan of one class
    Catalog {
        /// Only show this class, with step plans
        class: Option<String>,
    },

    /// Search classes, types, steps and sub-steps
    Search {
        /// Case-insensitive text to look for
        query: String,
    },

    /// Start a new incident
    Start {
        /// Incident class (e.g. "Fraud")
        class: String,

        /// Incident type within the class (e.g. "Phishing")
        #[arg(value_name = "TYPE")]
        incident_type: String,
    },

    /// Record evidence for one step
    Step {
        /// Incident id
        id: u64,

        /// 1-based step index
        index: String,

        /// Evidence text
        #[arg(short, long)]
        evidence: String,

        /// Checked sub-step label (repeatable)
        #[arg(short, long = "sub-step")]
        sub_steps: Vec<String>,

        /// Reference of an already stored attachment
        #[arg(long)]
        attachment_ref: Option<String>,
    },

    /// Store a file as the attachment of one step
    Attach {
        /// Incident id
        id: u64,

        /// 1-based step index
        index: String,

        /// File to upload
        file: PathBuf,
    },

    /// Record lessons learned
    Lessons {
        /// Incident id
        id: u64,

        /// What should be improved
        #[arg(short, long)]
        improvements: Option<String>,

        /// What was observed
        #[arg(short, long)]
        observations: Option<String>,
    },

    /// Show progress and step records of an incident
    Status {
        /// Incident id
        id: u64,
    },

    /// Show where to continue an incident
    Resume {
        /// Incident id
        id: u64,
    },

    /// List incidents split by completion
    List,

    /// Delete an incident with its attachments and report
    Delete {
        /// Incident id
        id: u64,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Generate the incident report
    Report {
        /// Incident id
        id: u64,
    },

    /// Start the REST API server
    Serve {
        /// Address to bind (default from config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;

    let is_server_mode = matches!(cli.command, Commands::Serve { .. });
    let logging_handle = logging::init_logging(&config, is_server_mode, cli.debug)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&config, force)?,
        Commands::Catalog { class } => cmd_catalog(&config, class.as_deref())?,
        Commands::Search { query } => cmd_search(&config, &query)?,
        Commands::Start {
            class,
            incident_type,
        } => cmd_start(&config, &class, &incident_type)?,
        Commands::Step {
            id,
            index,
            evidence,
            sub_steps,
            attachment_ref,
        } => cmd_step(&config, id, &index, &evidence, sub_steps, attachment_ref)?,
        Commands::Attach { id, index, file } => cmd_attach(&config, id, &index, &file)?,
        Commands::Lessons {
            id,
            improvements,
            observations,
        } => cmd_lessons(&config, id, improvements, observations)?,
        Commands::Status { id } => cmd_status(&config, id)?,
        Commands::Resume { id } => cmd_resume(&config, id)?,
        Commands::List => cmd_list(&config)?,
        Commands::Delete { id, yes } => cmd_delete(&config, id, yes)?,
        Commands::Report { id } => cmd_report(&config, id)?,
        Commands::Serve { host, port } => {
            cmd_serve(config, host, port).await?;
            if let Some(log_path) = logging_handle.log_file_path {
                eprintln!("Server log: {}", log_path.display());
            }
        }
    }

    Ok(())
}

fn open_engine(config: &Config) -> Result<IncidentEngine> {
    IncidentEngine::from_config(config)
}

fn describe_next(next: NextStep, incident: &IncidentRecord) -> String {
    match next {
        NextStep::Step(index) => format!("step {index}: {}", incident.step_title(index)),
        NextStep::LessonsLearned => "lessons learned".to_string(),
        NextStep::Done => "done".to_string(),
    }
}

fn print_progress(report: &ProgressReport, incident: &IncidentRecord) {
    println!(
        "Progress: {}% ({}/{} steps done)",
        report.percentage, report.done_steps, report.total_steps
    );
    println!("Next:     {}", describe_next(report.next_step, incident));
}

fn cmd_init(config: &Config, force: bool) -> Result<()> {
    let path = Config::project_config_path();
    if path.exists() && !force {
        println!("Config already exists: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    config.save()?;
    println!("Wrote config: {}", path.display());
    Ok(())
}

fn cmd_catalog(config: &Config, class: Option<&str>) -> Result<()> {
    let engine = open_engine(config)?;
    let classes = engine.catalog().classes();

    match class {
        None => {
            println!("Incident Classes ({})", classes.len());
            println!("{}", "─".repeat(60));
            for class in classes {
                let types: Vec<&str> = class.types.iter().map(|t| t.name.as_str()).collect();
                println!("{}: {}", class.class, types.join(", "));
            }
        }
        Some(wanted) => {
            let Some(class) = classes
                .iter()
                .find(|c| c.class.trim().eq_ignore_ascii_case(wanted.trim()))
            else {
                println!("Unknown class: {wanted}");
                return Ok(());
            };

            println!("{}", class.class);
            println!("{}", "─".repeat(60));
            for ty in &class.types {
                println!("{}", ty.name);
                for (i, step) in ty.steps.iter().enumerate() {
                    println!("  {}. {}", i + 1, step.title);
                    for sub_step in &step.sub_steps {
                        println!("       - {sub_step}");
                    }
                }
                println!();
            }
        }
    }

    Ok(())
}

fn cmd_search(config: &Config, query: &str) -> Result<()> {
    let engine = open_engine(config)?;
    let hits = engine.search(query);

    if hits.is_empty() {
        println!("No matches for {query:?}");
        return Ok(());
    }

    println!("Matches ({})", hits.len());
    println!("{}", "─".repeat(60));
    for hit in &hits {
        println!("{}", serde_json::to_string(hit)?);
    }

    Ok(())
}

fn cmd_start(config: &Config, class: &str, incident_type: &str) -> Result<()> {
    let mut engine = open_engine(config)?;
    let incident = engine.start_incident(class, incident_type)?;

    println!(
        "Started incident {} ({} / {})",
        incident.id, incident.class, incident.incident_type
    );
    if incident.step_plan.is_empty() {
        println!("No step plan in the catalog; only lessons learned will be tracked");
    }
    for (i, step) in incident.step_plan.iter().enumerate() {
        println!("  {}. {}", i + 1, step.title);
    }

    Ok(())
}

fn cmd_step(
    config: &Config,
    id: u64,
    index: &str,
    evidence: &str,
    sub_steps: Vec<String>,
    attachment_ref: Option<String>,
) -> Result<()> {
    let submission = StepSubmission::parse(
        index,
        evidence,
        &serde_json::Value::from(sub_steps),
        attachment_ref.as_deref(),
    )?;

    let mut engine = open_engine(config)?;
    let step_index = submission.step_index;
    let report = engine.apply_step_submission(id, submission)?;
    let incident = engine.get_incident(id)?;

    println!("Recorded step {step_index} of incident {id}");
    print_progress(&report, &incident);
    Ok(())
}

fn cmd_attach(config: &Config, id: u64, index: &str, file: &Path) -> Result<()> {
    let step_index = playbook::engine::parse_step_index(index)?;
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut engine = open_engine(config)?;
    let report = engine.attach_file(id, step_index, &file_name, &bytes)?;
    let step = engine.get_step(id, step_index)?;
    let incident = engine.get_incident(id)?;

    println!(
        "Stored attachment {} for step {step_index}",
        step.attachment_ref.unwrap_or_default()
    );
    print_progress(&report, &incident);
    Ok(())
}

fn cmd_lessons(
    config: &Config,
    id: u64,
    improvements: Option<String>,
    observations: Option<String>,
) -> Result<()> {
    let mut engine = open_engine(config)?;
    let report = engine.submit_lessons(id, improvements.as_deref(), observations.as_deref())?;
    let incident = engine.get_incident(id)?;

    println!("Recorded lessons learned for incident {id}");
    print_progress(&report, &incident);
    if incident.is_completed() {
        println!("Incident {id} is completed");
    }
    Ok(())
}

fn cmd_status(config: &Config, id: u64) -> Result<()> {
    let engine = open_engine(config)?;
    let (incident, steps) = engine.load(id)?;
    let report = engine.progress(id)?;

    println!(
        "Incident {} ({} / {}) [{}]",
        incident.id, incident.class, incident.incident_type, incident.status
    );
    println!("{}", "─".repeat(60));
    for index in 1..=incident.total_steps() {
        let record = steps.iter().find(|s| s.step_index == index);
        let icon = match record {
            Some(r) if r.is_done() => "✓",
            Some(_) => "…",
            None => " ",
        };
        println!("[{icon}] {index}. {}", incident.step_title(index));
        if let Some(record) = record {
            if record.has_evidence() {
                println!("      Evidence: {}", record.evidence);
            }
            if let Some(reference) = &record.attachment_ref {
                println!("      Attachment: {reference}");
            }
        }
    }
    println!(
        "[{}] Lessons learned",
        if incident.lessons_complete() { "✓" } else { " " }
    );
    println!();
    print_progress(&report, &incident);

    Ok(())
}

fn cmd_resume(config: &Config, id: u64) -> Result<()> {
    let mut engine = open_engine(config)?;
    let point = engine.resume(id)?;
    let incident = engine.get_incident(id)?;

    println!(
        "Incident {} is {}% complete [{}]",
        point.incident_id, point.percentage, point.status
    );
    println!("Continue with {}", describe_next(point.next_step, &incident));
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    let engine = open_engine(config)?;
    let dashboard = engine.dashboard()?;

    if dashboard.in_progress.is_empty() && dashboard.completed.is_empty() {
        println!("No incidents");
        return Ok(());
    }

    for (title, rows) in [
        ("In Progress", &dashboard.in_progress),
        ("Completed", &dashboard.completed),
    ] {
        println!("{title} ({})", rows.len());
        println!("{}", "─".repeat(60));
        for row in rows {
            println!(
                "{:>5}  {:>3}%  {} / {}  started {}",
                row.id,
                row.percentage,
                row.class,
                row.incident_type,
                row.started_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!();
    }

    Ok(())
}

fn cmd_delete(config: &Config, id: u64, skip_confirm: bool) -> Result<()> {
    let mut engine = open_engine(config)?;
    let incident = engine.get_incident(id)?;

    if !skip_confirm {
        println!(
            "Delete incident {} ({} / {}) with all evidence and attachments?",
            incident.id, incident.class, incident.incident_type
        );
        print!("Confirm? [y/N] ");

        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled");
            return Ok(());
        }
    }

    engine.delete_incident(id)?;
    println!("Deleted incident {id}");
    Ok(())
}

fn cmd_report(config: &Config, id: u64) -> Result<()> {
    let engine = open_engine(config)?;
    let path = engine.generate_report(id)?;
    println!("Report written: {}", path.display());
    Ok(())
}

async fn cmd_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.api.host = host;
    }
    if let Some(port) = port {
        config.api.port = port;
    }
    let addr = config.api_addr();

    println!("Starting REST API server...");
    println!("  Address: {addr}");
    println!("  Endpoints:");
    println!("    GET    /api/v1/health                          Health check");
    println!("    GET    /api/v1/catalog/search?q=               Search the catalog");
    println!("    GET    /api/v1/incidents                       Incident dashboard");
    println!("    POST   /api/v1/incidents                       Start an incident");
    println!("    POST   /api/v1/incidents/:id/steps/:index      Record step evidence");
    println!("    POST   /api/v1/incidents/:id/lessons           Record lessons learned");
    println!("    POST   /api/v1/incidents/:id/report            Generate report");
    println!("    GET    /api/v1/openapi.json                    OpenAPI document");
    println!();

    let state = rest::ApiState::from_config(config)?;
    rest::serve(state, &addr).await?;

    Ok(())
}
