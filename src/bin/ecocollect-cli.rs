use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::fs;

const TOKEN_FILE: &str = ".ecocollect_token";

#[derive(Parser)]
#[command(name = "ecocollect-cli")]
#[command(about = "CLI for the EcoCollect API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:11111")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        /// user, picker or admin
        #[arg(short, long, default_value = "user")]
        role: String,
        #[arg(long)]
        no_newsletter: bool,
    },
    Login {
        /// Email address or username
        #[arg(short, long)]
        identifier: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    /// List accounts (admin)
    Accounts {
        #[arg(short, long)]
        role: Option<String>,
        #[arg(short, long)]
        search: Option<String>,
    },
    CreateAccount {
        #[arg(short, long)]
        role: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
    },
    ToggleStatus {
        #[arg(short, long)]
        id: String,
    },
    DeleteAccount {
        #[arg(short, long)]
        id: String,
    },
    Routes,
    CreateRoute,
    OptimizeRoute {
        #[arg(short, long)]
        id: String,
    },
    Alerts,
    ResolveAlert {
        #[arg(short, long)]
        id: String,
    },
    /// List own assignments (picker)
    Assignments {
        #[arg(short, long)]
        status: Option<String>,
    },
    Start {
        #[arg(short, long)]
        id: String,
    },
    Complete {
        #[arg(short, long)]
        id: String,
    },
    /// Picker daily stats, or system stats with --system
    Stats {
        #[arg(long)]
        system: bool,
    },
    /// Download a CSV report: financial, collection or system
    Export {
        #[arg(short, long)]
        kind: String,
    },
}

#[derive(Deserialize)]
struct Session {
    token: String,
    redirect: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    data: Session,
}

fn authed(builder: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    builder.header("Authorization", format!("Bearer {}", token.trim()))
}

async fn print_response(builder: RequestBuilder) -> Result<(), Box<dyn std::error::Error>> {
    let res = authed(builder).send().await?;
    println!("Response: {}", res.text().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Register { first_name, last_name, username, email, password, role, no_newsletter } => {
            let res = client
                .post(format!("{url}/register"))
                .json(&json!({
                    "firstName": first_name,
                    "lastName": last_name,
                    "username": username,
                    "email": email,
                    "password": password,
                    "confirmPassword": password,
                    "role": role,
                    "agreeToTerms": true,
                    "subscribeNewsletter": !no_newsletter,
                }))
                .send()
                .await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::Login { identifier, password } => {
            let res = client
                .post(format!("{url}/login"))
                .json(&json!({ "emailOrUsername": identifier, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.data.token)?;
                println!("Logged in. Token saved to {TOKEN_FILE}. Dashboard: {}", body.data.redirect);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
        Commands::Accounts { role, search } => {
            let mut query = vec![];
            if let Some(role) = role {
                query.push(("role", role));
            }
            if let Some(search) = search {
                query.push(("search", search));
            }
            print_response(client.get(format!("{url}/admin/accounts")).query(&query)).await?;
        }
        Commands::CreateAccount { role, name, email } => {
            print_response(
                client
                    .post(format!("{url}/admin/accounts"))
                    .json(&json!({ "role": role, "name": name, "email": email })),
            )
            .await?;
        }
        Commands::ToggleStatus { id } => {
            print_response(client.post(format!("{url}/admin/accounts/{id}/toggle-status"))).await?;
        }
        Commands::DeleteAccount { id } => {
            print_response(client.delete(format!("{url}/admin/accounts/{id}"))).await?;
        }
        Commands::Routes => {
            print_response(client.get(format!("{url}/admin/routes"))).await?;
        }
        Commands::CreateRoute => {
            print_response(client.post(format!("{url}/admin/routes"))).await?;
        }
        Commands::OptimizeRoute { id } => {
            print_response(client.post(format!("{url}/admin/routes/{id}/optimize"))).await?;
        }
        Commands::Alerts => {
            print_response(client.get(format!("{url}/admin/alerts"))).await?;
        }
        Commands::ResolveAlert { id } => {
            print_response(client.post(format!("{url}/admin/alerts/{id}/resolve"))).await?;
        }
        Commands::Assignments { status } => {
            let query: Vec<(&str, String)> = status.map(|s| ("status", s)).into_iter().collect();
            print_response(client.get(format!("{url}/picker/assignments")).query(&query)).await?;
        }
        Commands::Start { id } => {
            print_response(client.post(format!("{url}/picker/assignments/{id}/start"))).await?;
        }
        Commands::Complete { id } => {
            print_response(client.post(format!("{url}/picker/assignments/{id}/complete"))).await?;
        }
        Commands::Stats { system } => {
            let path = if system { "admin/stats" } else { "picker/stats" };
            print_response(client.get(format!("{url}/{path}"))).await?;
        }
        Commands::Export { kind } => {
            let res = authed(client.get(format!("{url}/admin/reports/{kind}"))).send().await?;
            if !res.status().is_success() {
                println!("Export failed: {}", res.text().await?);
                return Ok(());
            }
            let filename = res
                .headers()
                .get(reqwest::header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split("filename=").nth(1))
                .map(|name| name.trim_matches('"').to_string())
                .unwrap_or_else(|| format!("{kind}-report.csv"));
            fs::write(&filename, res.text().await?)?;
            println!("{kind} report exported as {filename}");
        }
    }

    Ok(())
}
