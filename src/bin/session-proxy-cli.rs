use clap::{Parser, Subcommand};
use reqwest::{Method, Response};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "session-proxy-cli")]
#[command(about = "Command-line client for a running session proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:5003")]
    url: String,

    /// Session id for session-scoped commands.
    #[arg(short, long, env = "SESSION_PROXY_SESSION")]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session and print its id
    Subscribe,
    /// Close the session
    Unsubscribe,
    /// Replace the session headers, given as NAME=VALUE pairs
    SetHeaders {
        #[arg(value_parser = parse_pair)]
        headers: Vec<(String, String)>,
    },
    /// Show the session headers
    Headers,
    /// Show the session cookies
    Cookies,
    /// Show session details
    Info,
    /// Forward a request through the session
    Forward {
        target: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Per-call header, NAME=VALUE
        #[arg(short = 'H', long = "header", value_parser = parse_pair)]
        headers: Vec<(String, String)>,
        /// JSON request body
        #[arg(short, long)]
        json: Option<String>,
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// POST form credentials to a login URL through the session
    Login {
        target: String,
        /// Form field, NAME=VALUE
        #[arg(short = 'd', long = "data", value_parser = parse_pair)]
        data: Vec<(String, String)>,
    },
    /// Clear the session's cookies and headers
    Logout,
    /// Check the proxy's outbound connectivity
    Health,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let session = || -> Result<String, Box<dyn std::error::Error>> {
        cli.session
            .clone()
            .ok_or_else(|| "this command needs --session (or SESSION_PROXY_SESSION)".into())
    };

    let call = |method: Method, path: &str, session: Option<String>, body: Option<Value>| {
        let mut req = client.request(method, format!("{base}{path}"));
        if let Some(id) = session {
            req = req.header("X-Session-Id", id);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send()
    };

    let res = match cli.command {
        Commands::Subscribe => call(Method::POST, "/subscribe", None, None).await?,
        Commands::Unsubscribe => call(Method::POST, "/unsubscribe", Some(session()?), None).await?,
        Commands::SetHeaders { headers } => {
            let body: Map<String, Value> = headers.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            call(Method::POST, "/set-headers", Some(session()?), Some(Value::Object(body))).await?
        }
        Commands::Headers => call(Method::POST, "/get-headers", Some(session()?), None).await?,
        Commands::Cookies => call(Method::POST, "/get-cookies", Some(session()?), None).await?,
        Commands::Info => call(Method::POST, "/get-session-info", Some(session()?), None).await?,
        Commands::Forward {
            target,
            method,
            headers,
            json: body,
            timeout,
        } => {
            let mut payload = json!({ "url": target, "method": method });
            if !headers.is_empty() {
                let headers: Map<String, Value> = headers.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
                payload["headers"] = Value::Object(headers);
            }
            if let Some(body) = body {
                payload["json_data"] = serde_json::from_str(&body)?;
            }
            if let Some(timeout) = timeout {
                payload["timeout"] = json!(timeout);
            }
            call(Method::POST, "/forward", Some(session()?), Some(payload)).await?
        }
        Commands::Login { target, data } => {
            let form: Map<String, Value> = data.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            let payload = json!({ "url": target, "data": form });
            call(Method::POST, "/login", Some(session()?), Some(payload)).await?
        }
        Commands::Logout => call(Method::POST, "/logout", Some(session()?), None).await?,
        Commands::Health => call(Method::GET, "/health-check", None, None).await?,
    };

    print_response(res).await
}

async fn print_response(res: Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if status.is_success() {
        println!("{rendered}");
    } else {
        eprintln!("Error: proxy returned status {status}");
        eprintln!("{rendered}");
        std::process::exit(1);
    }
    Ok(())
}
