use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    Acceptance, Descriptor, LengthPolicy, LivenessScore, MatchEngine, MatchError,
    ReferenceDescriptor, Thresholds,
};
use std::io::Read;
use std::path::{Path, PathBuf};

mod client;

use client::AttendanceProxy;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new employee with a reference descriptor
    Enroll {
        #[arg(short, long)]
        email: String,
        #[arg(short = 'n', long)]
        full_name: String,
        /// JSON array of descriptor values ("-" for stdin)
        descriptor: PathBuf,
    },
    /// Replace an employee's reference descriptor
    Photo {
        employee: String,
        descriptor: PathBuf,
    },
    /// Check in (or out) with a freshly captured descriptor
    Mark {
        employee: String,
        descriptor: PathBuf,
        /// Liveness score of the capture, 0.0–1.0
        #[arg(short, long)]
        liveness: f64,
        /// Record a check-out instead of a check-in
        #[arg(long)]
        check_out: bool,
    },
    /// Show an employee's recent attendance
    History {
        employee: String,
        /// Number of records (0 = daemon default)
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
    },
    /// Show attendance statistics for an employee
    Stats { employee: String },
    /// Show the organisation-wide attendance log
    Log {
        /// UTC day, YYYY-MM-DD
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
    },
    /// List enrolled employees
    List,
    /// Remove an employee and all their data
    Remove { employee: String },
    /// Show daemon status
    Status,
    /// Compare two descriptor files offline (no daemon), treating `b` as
    /// the enrolled reference
    Distance {
        a: PathBuf,
        b: PathBuf,
        #[arg(
            long,
            env = "FACE_DISTANCE_THRESHOLD",
            default_value_t = facegate_core::thresholds::DEFAULT_FACE_DISTANCE_THRESHOLD
        )]
        face_threshold: f32,
        #[arg(
            long,
            env = "DUPLICATE_FACE_THRESHOLD",
            default_value_t = facegate_core::thresholds::DEFAULT_DUPLICATE_FACE_THRESHOLD
        )]
        duplicate_threshold: f32,
        /// Compare over the common prefix when lengths differ
        #[arg(long)]
        truncate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Distance {
        a,
        b,
        face_threshold,
        duplicate_threshold,
        truncate,
    } = &cli.command
    {
        let thresholds = Thresholds {
            face_distance: *face_threshold,
            duplicate_distance: *duplicate_threshold,
            length_policy: if *truncate {
                LengthPolicy::Truncate
            } else {
                LengthPolicy::Strict
            },
            ..Thresholds::default()
        };
        let report = distance(&read_descriptor(a)?, &read_descriptor(b)?, thresholds)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    tracing::debug!(session = cli.session, "connected to D-Bus");
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("facegated is not reachable")?;

    match cli.command {
        Commands::Enroll {
            email,
            full_name,
            descriptor,
        } => {
            let values = wire(&read_descriptor(&descriptor)?);
            print_json(&proxy.enroll(&email, &full_name, values).await?)?;
        }
        Commands::Photo {
            employee,
            descriptor,
        } => {
            let values = wire(&read_descriptor(&descriptor)?);
            print_json(&proxy.replace_photo(&employee, values).await?)?;
        }
        Commands::Mark {
            employee,
            descriptor,
            liveness,
            check_out,
        } => {
            let values = wire(&read_descriptor(&descriptor)?);
            let kind = if check_out { "CHECK_OUT" } else { "CHECK_IN" };
            print_json(&proxy.mark(&employee, values, liveness, kind).await?)?;
        }
        Commands::History { employee, limit } => {
            print_json(&proxy.history(&employee, limit).await?)?;
        }
        Commands::Stats { employee } => {
            print_json(&proxy.stats(&employee).await?)?;
        }
        Commands::Log { date, limit } => {
            let date = date.unwrap_or_default();
            print_json(&proxy.attendance_log(&date, limit).await?)?;
        }
        Commands::List => {
            print_json(&proxy.list_employees().await?)?;
        }
        Commands::Remove { employee } => {
            proxy.remove_employee(&employee).await?;
            println!("Removed employee {employee}");
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
        Commands::Distance { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}

/// Run the daemon's own accept and duplicate decisions on one pair.
/// Liveness is pinned to 1.0 so only the distance decides `match`.
fn distance(a: &Descriptor, b: &Descriptor, thresholds: Thresholds) -> Result<serde_json::Value> {
    thresholds.validate()?;
    let engine = MatchEngine::new(thresholds);

    let references = std::slice::from_ref(b);
    let matched = match engine.evaluate_attendance(a, LivenessScore(1.0), references) {
        Ok(_) => true,
        Err(MatchError::FaceNotRecognized { .. }) => false,
        Err(MatchError::InvalidDescriptor(msg)) => {
            bail!("{msg}; pass --truncate to compare over the common prefix")
        }
        Err(e) => return Err(e.into()),
    };

    let reference = ReferenceDescriptor {
        owner: "b".into(),
        descriptor: b.clone(),
    };
    let duplicate = match engine.check_for_duplicate_identity(a, std::slice::from_ref(&reference)) {
        Ok(()) => false,
        Err(MatchError::DuplicateFace { .. }) => true,
        Err(e) => return Err(e.into()),
    };

    let d = a.euclidean_distance(b);
    Ok(serde_json::json!({
        "distance": d,
        "confidence": Acceptance::confidence_for(d),
        "match": matched,
        "duplicate": duplicate,
    }))
}

/// Read a descriptor as a JSON array of numbers. `-` reads stdin.
fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    parse_descriptor(&raw).with_context(|| format!("invalid descriptor in {}", path.display()))
}

fn parse_descriptor(raw: &str) -> Result<Descriptor> {
    Ok(serde_json::from_str(raw)?)
}

fn wire(descriptor: &Descriptor) -> Vec<f64> {
    descriptor.values().iter().map(|&v| v as f64).collect()
}

/// Pretty-print a JSON payload returned by the daemon.
fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        let d = parse_descriptor("[0.1, -0.2, 0.3]").unwrap();
        assert_eq!(d.len(), 3);
        assert!(parse_descriptor("[]").is_err());
        assert!(parse_descriptor("{\"descriptor\": [1]}").is_err());
    }

    #[test]
    fn test_wire_preserves_values() {
        let d = parse_descriptor("[0.5, 0.25]").unwrap();
        assert_eq!(wire(&d), vec![0.5, 0.25]);
    }

    #[test]
    fn test_distance_rejects_length_mismatch_when_strict() {
        let a = parse_descriptor("[0.0, 0.0]").unwrap();
        let b = parse_descriptor("[0.0, 0.0, 1.0]").unwrap();
        assert!(distance(&a, &b, Thresholds::default()).is_err());
        let loose = Thresholds {
            length_policy: LengthPolicy::Truncate,
            ..Thresholds::default()
        };
        assert!(distance(&a, &b, loose).is_ok());
    }

    fn pair(a: &str, b: &str) -> (Descriptor, Descriptor) {
        (parse_descriptor(a).unwrap(), parse_descriptor(b).unwrap())
    }

    #[test]
    fn test_distance_reports_match_and_duplicate() {
        // distance 0.5: inside both default thresholds
        let (a, b) = pair("[0.0, 0.0]", "[0.3, 0.4]");
        let report = distance(&a, &b, Thresholds::default()).unwrap();
        assert!((report["distance"].as_f64().unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(report["match"], true);
        assert_eq!(report["duplicate"], true);
    }

    #[test]
    fn test_distance_reports_no_match_beyond_threshold() {
        // distance 1.0
        let (a, b) = pair("[0.0, 0.0]", "[0.6, 0.8]");
        let report = distance(&a, &b, Thresholds::default()).unwrap();
        assert_eq!(report["match"], false);
        assert_eq!(report["duplicate"], false);
        assert!(report["confidence"].as_f64().unwrap() < 1e-6);
    }

    #[test]
    fn test_distance_thresholds_are_independent() {
        let (a, b) = pair("[0.0, 0.0]", "[0.3, 0.4]");
        let strict_duplicates = Thresholds {
            duplicate_distance: 0.4,
            ..Thresholds::default()
        };
        let report = distance(&a, &b, strict_duplicates).unwrap();
        assert_eq!(report["match"], true);
        assert_eq!(report["duplicate"], false);

        let strict_match = Thresholds {
            face_distance: 0.4,
            ..Thresholds::default()
        };
        let report = distance(&a, &b, strict_match).unwrap();
        assert_eq!(report["match"], false);
        assert_eq!(report["duplicate"], true);
    }

    #[test]
    fn test_distance_match_boundary_is_inclusive() {
        let (a, b) = pair("[0.0, 0.0]", "[0.3, 0.4]");
        let at_boundary = Thresholds {
            face_distance: a.euclidean_distance(&b),
            ..Thresholds::default()
        };
        let report = distance(&a, &b, at_boundary).unwrap();
        assert_eq!(report["match"], true);
    }

    #[test]
    fn test_cli_distance_thresholds_from_flags() {
        let cli = Cli::try_parse_from([
            "facegate",
            "distance",
            "a.json",
            "b.json",
            "--face-threshold",
            "0.45",
            "--duplicate-threshold",
            "0.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Distance {
                face_threshold,
                duplicate_threshold,
                ..
            } => {
                assert_eq!(face_threshold, 0.45);
                assert_eq!(duplicate_threshold, 0.5);
            }
            _ => panic!("expected distance"),
        }
    }

    #[test]
    fn test_cli_parses_mark() {
        let cli = Cli::try_parse_from([
            "facegate", "mark", "emp-1", "face.json", "--liveness", "0.95", "--check-out",
        ])
        .unwrap();
        match cli.command {
            Commands::Mark {
                employee,
                liveness,
                check_out,
                ..
            } => {
                assert_eq!(employee, "emp-1");
                assert_eq!(liveness, 0.95);
                assert!(check_out);
            }
            _ => panic!("expected mark"),
        }
    }
}
