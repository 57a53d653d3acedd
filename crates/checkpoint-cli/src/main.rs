use anyhow::{Context, Result};
use checkpoint_core::{
    assess_image, check_geofence, verify_checkpoint, CheckpointRequest, GeoPoint,
    HeuristicVerifier, ImagePayload, Location, LocationList, PolicyTable, PolicyTier,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zbus::proxy;

#[derive(Parser)]
#[command(name = "checkpoint", about = "Checkpoint face and location verification CLI")]
struct Cli {
    /// Policy table to use instead of the built-in one
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a registered face photo with a captured one
    Verify {
        registered: PathBuf,
        captured: PathBuf,
        #[arg(short, long, default_value = "standard")]
        tier: PolicyTier,
    },
    /// Judge whether a photo is good enough to register
    Assess {
        image: PathBuf,
        #[arg(short, long, default_value = "strict")]
        tier: PolicyTier,
    },
    /// Check a position and/or postcode against a locations file
    Geofence {
        #[command(flatten)]
        claim: ClaimArgs,
    },
    /// Face verification and geofence in one decision
    Checkpoint {
        registered: PathBuf,
        captured: PathBuf,
        #[arg(short, long, default_value = "standard")]
        tier: PolicyTier,
        #[command(flatten)]
        claim: ClaimArgs,
    },
    /// Show daemon status
    Status {
        /// Talk to the daemon on the system bus
        #[arg(long)]
        system: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Verify { .. } => "verify",
            Commands::Assess { .. } => "assess",
            Commands::Geofence { .. } => "geofence",
            Commands::Checkpoint { .. } => "checkpoint",
            Commands::Status { .. } => "status",
        }
    }
}

#[derive(Args)]
struct ClaimArgs {
    /// TOML file of `[[location]]` entries
    #[arg(short, long)]
    locations: PathBuf,
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,
    #[arg(long)]
    postcode: Option<String>,
}

impl ClaimArgs {
    fn point(&self) -> Option<GeoPoint> {
        Some(GeoPoint {
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }

    fn load_locations(&self) -> Result<Vec<Location>> {
        let src = std::fs::read_to_string(&self.locations)
            .with_context(|| format!("reading {}", self.locations.display()))?;
        Ok(LocationList::from_toml_str(&src)?.locations)
    }
}

#[proxy(
    interface = "org.checkpoint.Checkpoint1",
    default_service = "org.checkpoint.Checkpoint1",
    default_path = "/org/checkpoint/Checkpoint1"
)]
trait Checkpoint1 {
    fn status(&self) -> zbus::Result<String>;
}

fn read_image(path: &Path) -> Result<ImagePayload> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(ImagePayload::Encoded(bytes))
}

fn load_policy(path: Option<&Path>) -> Result<PolicyTable> {
    let Some(path) = path else {
        return Ok(PolicyTable::default());
    };
    let src = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(PolicyTable::from_toml_str(&src)?)
}

fn print(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let policy = load_policy(cli.policy.as_deref())?;
    tracing::debug!(policy_version = policy.version, "policy loaded");

    let command = cli.command.name();
    // Exit status mirrors the decision.
    let accepted = match cli.command {
        Commands::Verify {
            registered,
            captured,
            tier,
        } => {
            let verifier = HeuristicVerifier::new(policy);
            match verifier.verify_face(&read_image(&registered)?, &read_image(&captured)?, tier) {
                Ok(result) => {
                    let accepted = result.is_match;
                    print(json!({ "result": result }))?;
                    accepted
                }
                Err(err) => {
                    print(json!({
                        "error": { "kind": err.kind().as_str(), "message": err.to_string() }
                    }))?;
                    false
                }
            }
        }
        Commands::Assess { image, tier } => {
            let report = assess_image(&read_image(&image)?, tier, &policy)?;
            let accepted = report.is_valid;
            print(json!({ "result": report }))?;
            accepted
        }
        Commands::Geofence { claim } => {
            let locations = claim.load_locations()?;
            let result = check_geofence(claim.point(), claim.postcode.as_deref(), &locations);
            let accepted = result.allowed;
            print(json!({ "result": result }))?;
            accepted
        }
        Commands::Checkpoint {
            registered,
            captured,
            tier,
            claim,
        } => {
            let locations = claim.load_locations()?;
            let request = CheckpointRequest {
                registered: read_image(&registered)?,
                captured: read_image(&captured)?,
                tier,
                point: claim.point(),
                postcode: claim.postcode.clone(),
            };
            let report = verify_checkpoint(&HeuristicVerifier::new(policy), &request, &locations);
            let accepted = report.accepted();
            print(json!({ "result": report }))?;
            accepted
        }
        Commands::Status { system } => {
            let conn = if system {
                zbus::Connection::system().await
            } else {
                zbus::Connection::session().await
            }
            .context("connecting to D-Bus")?;
            let proxy = Checkpoint1Proxy::new(&conn).await?;
            match proxy.status().await {
                Ok(status) => {
                    let status: serde_json::Value = serde_json::from_str(&status)?;
                    print(status)?;
                    true
                }
                Err(err) => {
                    eprintln!("checkpointd: not reachable ({err})");
                    false
                }
            }
        }
    };

    tracing::info!(command, accepted, "decision");
    Ok(if accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
