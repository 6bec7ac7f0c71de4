// Proctoring service CLI
// Checks a running server and drives a complete exam session over the session channel

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use proctor_session::api::{ProctorMessage, TrackDescriptor};
use proctor_session::proctoring::{
    CompatibilityReport, FeatureSupport, Severity, TerminationResult, TrackKind, ViolationType,
};

const VIOLATION_CYCLE: [(ViolationType, Severity, &str); 4] = [
    (ViolationType::TabSwitch, Severity::Medium, "Switched to another tab"),
    (ViolationType::WindowBlur, Severity::Low, "Exam window lost focus"),
    (ViolationType::FullscreenExit, Severity::High, "Left full-screen mode"),
    (ViolationType::RightClick, Severity::Low, "Context menu requested"),
];

#[derive(Parser)]
#[command(name = "proctor-cli")]
#[command(about = "Proctoring session service CLI", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Ask the server whether a client with the given features can host an exam
    Compatibility {
        /// Feature the client lacks (mediaDevices, fullscreen, localStorage,
        /// sessionStorage, indexedDB, webSocket, notifications); repeatable
        #[arg(short, long)]
        missing: Vec<String>,
    },

    /// Run a full exam session over the WebSocket channel
    Simulate {
        #[arg(long, default_value = "student-1")]
        student_id: String,

        #[arg(long, default_value = "quiz-1")]
        quiz_id: String,

        /// Session id (generated when omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Number of violations to report before terminating
        #[arg(short, long, default_value_t = 2)]
        violations: usize,

        /// Skip registering a camera stream
        #[arg(long)]
        no_media: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Compatibility { missing } => {
            check_compatibility(&cli.server, missing).await;
        }
        Commands::Simulate {
            student_id,
            quiz_id,
            session_id,
            violations,
            no_media,
        } => {
            let session_id = session_id
                .clone()
                .unwrap_or_else(|| format!("session_{}", chrono::Utc::now().timestamp_millis()));
            simulate(
                &cli.server,
                student_id,
                quiz_id,
                &session_id,
                *violations,
                !*no_media,
            )
            .await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/proctoring/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Active sessions: {}", body["activeSessions"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

fn feature_support(missing: &[String]) -> FeatureSupport {
    let lacks = |name: &str| missing.iter().any(|m| m.eq_ignore_ascii_case(name));
    FeatureSupport {
        media_devices: !lacks("mediaDevices"),
        fullscreen: !lacks("fullscreen"),
        local_storage: !lacks("localStorage"),
        session_storage: !lacks("sessionStorage"),
        indexed_db: !lacks("indexedDB"),
        web_socket: !lacks("webSocket"),
        notifications: !lacks("notifications"),
    }
}

async fn check_compatibility(server: &str, missing: &[String]) {
    println!("{}", "Checking client compatibility...".cyan());

    let url = format!("http://{}/proctoring/compatibility", server);
    let client = reqwest::Client::new();

    let resp = match client.post(&url).json(&feature_support(missing)).send().await {
        Ok(resp) => resp,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };

    match resp.json::<CompatibilityReport>().await {
        Ok(report) => {
            if report.compatible {
                println!("{} Client can host a proctored exam", "✓".green());
            } else {
                println!("{} Client cannot host a proctored exam", "✗".red());
            }
            for (feature, supported) in &report.features {
                let mark = if *supported { "✓".green() } else { "✗".red() };
                println!("  {} {}", mark, feature);
            }
            for warning in &report.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }
        Err(e) => println!("{} Unexpected response: {}", "✗".red(), e),
    }
}

async fn simulate(
    server: &str,
    student_id: &str,
    quiz_id: &str,
    session_id: &str,
    violations: usize,
    with_media: bool,
) {
    println!("{}", "Simulating proctored exam session...".cyan());
    println!("  Session ID: {}", session_id);

    let url = format!("ws://{}/proctoring/ws", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(connection) => connection,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let mut outgoing = vec![ProctorMessage::Initialize {
        student_id: student_id.to_string(),
        quiz_id: quiz_id.to_string(),
        session_id: session_id.to_string(),
        report: None,
    }];
    if with_media {
        outgoing.push(ProctorMessage::MediaReady {
            stream_id: format!("{}_camera", session_id),
            tracks: vec![
                TrackDescriptor {
                    id: "video-0".to_string(),
                    kind: TrackKind::Video,
                },
                TrackDescriptor {
                    id: "audio-0".to_string(),
                    kind: TrackKind::Audio,
                },
            ],
        });
    }
    for (violation_type, severity, description) in VIOLATION_CYCLE.iter().cycle().take(violations) {
        outgoing.push(ProctorMessage::Violation {
            violation_type: *violation_type,
            severity: *severity,
            description: description.to_string(),
            metadata: None,
        });
    }
    outgoing.push(ProctorMessage::Terminate {
        termination_type: None,
    });

    for message in &outgoing {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                println!("{} Failed to encode message: {}", "✗".red(), e);
                return;
            }
        };
        if write.send(Message::Text(text)).await.is_err() {
            println!("{} Connection lost while sending", "✗".red());
            return;
        }
    }
    println!("{} Sent {} messages", "✓".green(), outgoing.len());

    loop {
        match timeout(Duration::from_secs(10), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ProctorMessage>(&text) {
                Ok(ProctorMessage::Terminated { result }) => {
                    print_result(&result);
                    break;
                }
                Ok(ProctorMessage::Error { message }) => {
                    println!("{} {}", "✗".red(), message);
                }
                Ok(other) => println!("{} {:?}", "◀".green(), other),
                Err(_) => println!("{} {}", "◀".yellow(), text),
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Err(_) => {
                println!("{} Timeout waiting for termination result", "✗".red());
                break;
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
}

fn print_result(result: &TerminationResult) {
    println!("\n{}", "═".repeat(60).green());
    if result.success {
        println!("{} Session {} terminated cleanly", "✓".green(), result.session_id.bold());
    } else {
        println!("{} Session {} terminated with errors", "✗".red(), result.session_id.bold());
    }
    println!("{}", "═".repeat(60).green());

    let summary = &result.summary;
    println!("  Duration: {} ms", summary.total_duration);
    println!("  Violations: {}", summary.violation_count);
    for (violation_type, count) in &summary.violations_by_type {
        println!("    {:?}: {}", violation_type, count);
    }
    println!("  Overall score: {}", summary.system_performance.overall_score);
    println!("  Backup: {:?}", result.metadata.data_backup_status);
    println!("  Cleanup: {:?}", result.metadata.cleanup_status);

    for error in &result.errors {
        println!("  {} {}", "✗".red(), error);
    }
    for warning in &result.warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }
    for action in &result.metadata.recovery_actions {
        println!("  {} {}", "↺".cyan(), action);
    }
}
