use anyhow::Result;
use clap::{Parser, Subcommand};

use fleetmedic::config::FleetConfig;

#[derive(Parser)]
#[command(
    name = "fleetmedic",
    about = "Appliance-grade fleet triage: anomaly detection, root-cause investigation, playbook automation",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + analysis loop + ledger)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },

    /// Run a one-shot fleet analysis against the configured metrics source
    Analyze {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run a one-shot root-cause investigation for a service
    Investigate {
        /// Service (job label) to investigate
        #[arg(long)]
        service: String,

        /// Cluster the service runs in
        #[arg(long)]
        cluster: Option<String>,

        /// Alert name that triggered the investigation
        #[arg(long)]
        alertname: Option<String>,

        /// Alert severity (low|medium|high|critical)
        #[arg(long)]
        severity: Option<String>,

        /// Metric family the alert fired on (cpu|memory|latency|error_rate|up)
        #[arg(long)]
        metric: Option<String>,

        /// Observed metric value
        #[arg(long)]
        value: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List registered playbooks
    Playbooks,

    /// List recent playbook runs from the ledger
    Runs {
        /// Maximum rows to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = FleetConfig::load_or_default();

    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!(%bind, "Starting FleetMedic daemon");
            fleetmedic::serve(&bind, config).await?;
        }

        Commands::Analyze { json } => {
            let pipeline = fleetmedic::build_pipeline(&config, None);
            let snapshot = pipeline.metrics.scrape_fleet().await?;
            let result = pipeline.detector.analyze(&snapshot).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\nFleetMedic Fleet Analysis");
                println!(
                    "Engine: {}   Health: {:.0}/100   Data points: {}",
                    result.engine, result.overall_health_score, result.data_points
                );
                if result.anomalies.is_empty() {
                    println!("\nNo anomalies detected.");
                } else {
                    println!(
                        "\n{:<10} | {:<20} | {:<20} | {:>10} | Reasoning",
                        "Severity", "Service", "Cluster", "Value"
                    );
                    println!("{:-<10}-|-{:-<20}-|-{:-<20}-|-{:-<10}-|-{:-<40}", "", "", "", "", "");
                    for a in &result.anomalies {
                        println!(
                            "{:<10} | {:<20} | {:<20} | {:>10.1} | {}",
                            a.severity.to_string(),
                            a.service,
                            a.cluster,
                            a.value,
                            a.reasoning
                        );
                    }
                }
                println!("\nInsights:");
                for insight in &result.insights {
                    println!(" - {insight}");
                }
                println!();
            }
        }

        Commands::Investigate {
            service,
            cluster,
            alertname,
            severity,
            metric,
            value,
            json,
        } => {
            let pipeline = fleetmedic::build_pipeline(&config, None);
            let event = fleetmedic::event_from_args(
                &service,
                cluster.as_deref(),
                alertname.as_deref(),
                severity.as_deref(),
                metric.as_deref(),
                value,
            );
            let inv = pipeline.investigator.investigate(event).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&inv)?);
            } else {
                println!("\n=== FleetMedic Investigation {} ===", inv.id);
                println!("Status:     {:?}", inv.status);
                println!("Confidence: {}", inv.confidence);
                println!("\nEvidence steps:");
                for step in &inv.steps {
                    println!(" [{}] {} -> {}", step.tool, step.query, step.result);
                }
                println!("\nRoot cause:\n  {}", inv.root_cause);
                if !inv.findings.is_empty() {
                    println!("\nFindings:");
                    for f in &inv.findings {
                        println!(" - {f}");
                    }
                }
                if !inv.recommendations.is_empty() {
                    println!("\nRecommendations:");
                    for r in &inv.recommendations {
                        println!(" - {r}");
                    }
                }
                println!("==========================================\n");
            }
        }

        Commands::Playbooks => {
            let playbooks = fleetmedic::playbook::builtin::defaults();
            println!(
                "{:<22} | {:<7} | {:<28} | {:<5} | Tags",
                "Name", "Actions", "Triggers", "Auto"
            );
            println!("{:-<22}-|-{:-<7}-|-{:-<28}-|-{:-<5}-|-{:-<20}", "", "", "", "", "");
            for pb in playbooks {
                let triggers = pb
                    .triggers
                    .iter()
                    .map(|t| t.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "{:<22} | {:<7} | {:<28} | {:<5} | {}",
                    pb.name,
                    pb.actions.len(),
                    triggers,
                    pb.auto_remediate,
                    pb.tags.join(", ")
                );
            }
        }

        Commands::Runs { limit } => {
            let pool = fleetmedic::storage::open_pool(&config.pipeline.db_path)?;
            let runs = fleetmedic::storage::list_runs(&pool, limit)?;
            if runs.is_empty() {
                println!("No playbook runs recorded.");
            } else {
                println!(
                    "{:<14} | {:<22} | {:<8} | {:<8} | Investigation",
                    "Run", "Playbook", "Status", "Actions"
                );
                println!("{:-<14}-|-{:-<22}-|-{:-<8}-|-{:-<8}-|-{:-<20}", "", "", "", "", "");
                for run in runs {
                    println!(
                        "{:<14} | {:<22} | {:<8} | {:<8} | {}",
                        run.id,
                        run.playbook_name,
                        format!("{:?}", run.status).to_lowercase(),
                        run.actions_taken.len(),
                        run.investigation_id.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    Ok(())
}
