//! speechout-control - CLI for the speechout daemon over D-Bus.

use clap::{Parser, Subcommand};
use serde_json::Value;
use speechout::service::{OBJECT_PATH, SERVICE_NAME};
use std::time::Duration;
use zbus::blocking::Connection;

/// Control utility for the speechout daemon
#[derive(Parser)]
#[command(name = "speechout-control")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(about = "Control utility for the speechout speech output daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Speak text
    Speak {
        /// Text to speak
        text: String,
        /// Locale to use when the text has no recognizable script (e.g. "de-DE")
        #[arg(short, long)]
        locale: Option<String>,
    },

    /// Stop current speech
    Stop,

    /// Check speech recognition and synthesis capability
    Diagnose {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// List embedded voice models and their state
    Models,

    /// Show install state of the model for a locale
    Status {
        locale: String,
    },

    /// Download the embedded voice model for a locale
    Download {
        locale: String,
        /// Return immediately instead of following progress
        #[arg(long)]
        detach: bool,
    },

    /// Cancel a model download
    Cancel {
        locale: String,
    },

    /// Check service health
    Ping,

    /// Get daemon version
    Version,
}

fn call<B, R>(conn: &Connection, method: &str, body: &B) -> Result<R, Box<dyn std::error::Error>>
where
    B: serde::Serialize + zbus::zvariant::DynamicType,
    R: for<'d> zbus::zvariant::DynamicDeserialize<'d>,
{
    Ok(conn
        .call_method(Some(SERVICE_NAME), OBJECT_PATH, Some(SERVICE_NAME), method, body)?
        .body()
        .deserialize()?)
}

fn describe_state(state: &Value) -> String {
    match state["state"].as_str() {
        Some("downloading") => format!(
            "downloading ({:.0}%)",
            state["progress"].as_f64().unwrap_or(0.0) * 100.0
        ),
        Some("failed") => format!("failed: {}", state["reason"].as_str().unwrap_or("unknown")),
        Some(other) => other.replace('_', " "),
        None => "unknown".to_string(),
    }
}

fn print_diagnostic(diag: &Value) {
    let engine = |v: &Value| v.as_str().unwrap_or("-").to_string();
    println!("Voice Diagnostic");
    println!("────────────────");
    println!(
        "Recognition:  {} ({})",
        diag["stt_status"].as_str().unwrap_or("?"),
        engine(&diag["stt_engine_name"])
    );
    println!(
        "Synthesis:    {} ({})",
        diag["tts_status"].as_str().unwrap_or("?"),
        engine(&diag["tts_engine_name"])
    );
    println!("Output:       {}", engine(&diag["output_device"]));
    if let Some(missing) = diag["missing_languages"].as_array() {
        if !missing.is_empty() {
            let langs: Vec<_> = missing.iter().filter_map(Value::as_str).collect();
            println!("Missing:      {}", langs.join(", "));
        }
    }
    if let Some(suggestions) = diag["suggestions"].as_array() {
        for s in suggestions {
            let action = s["action_label"].as_str().map(|a| format!(" [{}]", a)).unwrap_or_default();
            println!("  - {}{}", s["message"].as_str().unwrap_or(""), action);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let conn = Connection::session()?;

    match cli.command {
        Commands::Speak { text, locale } => {
            let _: () = call(&conn, "Speak", &(text.clone(), locale.unwrap_or_default()))?;
            println!("Speaking: {}", text);
        }

        Commands::Stop => {
            let _: () = call(&conn, "Stop", &())?;
            println!("Stopped");
        }

        Commands::Diagnose { json } => {
            let raw: String = call(&conn, "GetDiagnostic", &())?;
            if json {
                println!("{}", raw);
            } else {
                print_diagnostic(&serde_json::from_str(&raw)?);
            }
        }

        Commands::Models => {
            let models: Vec<(String, String, String)> = call(&conn, "ListModels", &())?;
            println!("Embedded Voice Models");
            println!("─────────────────────");
            for (locale, folder, state) in models {
                println!("  {:<6} {:<24} {}", locale, folder, state);
            }
        }

        Commands::Status { locale } => {
            let raw: String = call(&conn, "ModelState", &locale)?;
            println!("{}: {}", locale, describe_state(&serde_json::from_str(&raw)?));
        }

        Commands::Download { locale, detach } => {
            let status: String = call(&conn, "DownloadModel", &locale)?;
            println!("Download {} for {}", status, locale);
            if detach {
                return Ok(());
            }
            loop {
                std::thread::sleep(Duration::from_millis(500));
                let raw: String = call(&conn, "ModelState", &locale)?;
                let state: Value = serde_json::from_str(&raw)?;
                println!("  {}", describe_state(&state));
                if state["state"].as_str() != Some("downloading") {
                    break;
                }
            }
        }

        Commands::Cancel { locale } => {
            let cancelled: bool = call(&conn, "CancelDownload", &locale)?;
            if cancelled {
                println!("Cancelled download for {}", locale);
            } else {
                println!("No download running for {}", locale);
            }
        }

        Commands::Ping => {
            let result: String = call(&conn, "Ping", &())?;
            println!("{}", result);
        }

        Commands::Version => {
            let result: String = call(&conn, "GetVersion", &())?;
            println!("speechout {}", result);
        }
    }

    Ok(())
}
