use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::{Client, Method};
use serde::Serialize;

/// hookmirror: manage push mirrors and CI bridges on a running server
#[derive(Parser, Debug)]
#[command(name = "hookmirror")]
#[command(about = "Admin client for the hookmirror server", long_about = None)]
#[command(version)]
struct Cli {
    /// Base URL of the hookmirror server
    #[arg(long, env = "HOOKMIRROR_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Admin secret configured on the server
    #[arg(long, env = "HOOKMIRROR_ADMIN_SECRET", hide_env_values = true)]
    admin_secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage push mirrors
    #[command(subcommand)]
    Mirror(MirrorCommand),
    /// Manage GitLab CI to GitHub Checks bridges
    #[command(subcommand)]
    Ci(CiCommand),
    /// Show registered mirrors, bridges and cache statistics
    Status,
}

#[derive(Subcommand, Debug)]
enum MirrorCommand {
    /// Register or replace a push mirror
    Add(MirrorAddArgs),
    /// Remove a push mirror
    Remove {
        /// Source repository as owner/name
        name: String,
    },
}

#[derive(Args, Debug, Serialize)]
struct MirrorAddArgs {
    /// Source repository as owner/name
    name: String,

    /// Push URL of the mirror
    target: String,

    /// Clone URL overriding the one in push events
    #[arg(long, default_value = "")]
    source: String,

    /// Webhook secret (generated by the server if omitted)
    #[arg(long, default_value = "")]
    secret: String,

    /// Path of the SSH key used to push to the mirror
    #[arg(long, default_value = "")]
    push_key: String,

    /// Path of the SSH key used to fetch the source
    #[arg(long, default_value = "")]
    pull_key: String,
}

#[derive(Subcommand, Debug)]
enum CiCommand {
    /// Bridge a GitLab project's CI to a GitHub repository
    Add(CiAddArgs),
    /// Remove a bridge
    Remove {
        /// GitLab project ID
        project_id: u64,
    },
}

#[derive(Args, Debug, Serialize)]
struct CiAddArgs {
    /// GitLab project ID
    project_id: u64,

    /// GitHub repository owner
    owner: String,

    /// GitHub repository name
    name: String,

    /// Token GitLab sends in X-Gitlab-Token (generated by the server if omitted)
    #[arg(long, default_value = "")]
    secret: String,
}

struct AdminClient {
    client: Client,
    server: String,
    admin_secret: String,
}

impl AdminClient {
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.server.trim_end_matches('/'), path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.admin_secret);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            return Err(anyhow!("{} {} failed: {} - {}", method, path, status, text));
        }

        if text.trim().is_empty() {
            return Ok(serde_json::json!({ "status": status.as_u16() }));
        }
        serde_json::from_str(&text).context("Server returned invalid JSON")
    }
}

fn mirror_path(name: &str) -> Result<String> {
    match name.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok(format!("/admin/mirrors/{}/{}", owner, repo))
        }
        _ => Err(anyhow!("mirror name must be owner/name, got {:?}", name)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let admin = AdminClient {
        client: Client::builder()
            .user_agent(format!("hookmirror-cli/{}", hookmirror_core::version()))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?,
        server: cli.server,
        admin_secret: cli.admin_secret,
    };

    let response = match cli.command {
        Commands::Mirror(MirrorCommand::Add(args)) => {
            admin
                .send(Method::POST, "/admin/mirrors", Some(&args))
                .await?
        }
        Commands::Mirror(MirrorCommand::Remove { name }) => {
            admin
                .send::<()>(Method::DELETE, &mirror_path(&name)?, None)
                .await?
        }
        Commands::Ci(CiCommand::Add(args)) => {
            admin.send(Method::POST, "/admin/ci", Some(&args)).await?
        }
        Commands::Ci(CiCommand::Remove { project_id }) => {
            admin
                .send::<()>(Method::DELETE, &format!("/admin/ci/{}", project_id), None)
                .await?
        }
        Commands::Status => admin.send::<()>(Method::GET, "/status", None).await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
