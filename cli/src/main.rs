use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::runtime::Builder;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone, Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, env, default_value = "http://localhost:3000")]
    pub service_url: String,

    #[arg(long, env = "ADMIN_AUTH_TOKEN")]
    pub admin_token: Option<String>,

    #[arg(short, long, env = "LOTTERY_INSTANCE", default_value = "main")]
    pub instance: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Clone)]
pub enum Commands {
    /// Show the current round
    Round {},
    /// Buy a ticket for a wallet
    Buy {
        #[arg(long, help = "Buyer wallet address, base-58 encoded")]
        wallet: String,

        #[arg(long, help = "Ticket amount in SOL (server default when omitted)")]
        amount: Option<f64>,

        #[arg(long, help = "On-chain purchase signature to record")]
        signature: Option<String>,
    },
    /// Open a new round (admin)
    SetRound {
        #[arg(long, help = "Round number to open")]
        round_number: u64,

        #[arg(long, help = "Round window in hours (server default when omitted)")]
        duration_hours: Option<i64>,
    },
    /// End the current round: draw a winner and pay out (admin)
    EndRound {},
    /// List winners still awaiting payout (admin)
    Pending {},
    /// Retry one pending payout (admin)
    Retry {
        #[arg(long, help = "Round id of the pending winner")]
        round_id: String,

        #[arg(long, help = "Winner wallet address")]
        wallet: String,
    },
    /// Show service stats (admin)
    Stats {},
}

impl Cli {
    fn admin_token(&self) -> Result<&str> {
        self.admin_token.as_deref().ok_or_else(|| {
            anyhow!("--admin-token (or ADMIN_AUTH_TOKEN) is required for admin commands")
        })
    }
}

fn main() -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(false)
        .try_init();

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let cli = Cli::parse();
    let client = Client::new();
    let base = cli.service_url.trim_end_matches('/').to_string();

    let request = match &cli.command {
        Commands::Round {} => client
            .get(format!("{}/round", base))
            .query(&[("instance", cli.instance.as_str())]),
        Commands::Buy {
            wallet,
            amount,
            signature,
        } => {
            let mut body = json!({
                "walletAddress": wallet,
                "instance": cli.instance,
            });
            if let Some(amount) = amount {
                body["amount"] = json!(amount);
            }
            if let Some(signature) = signature {
                body["purchaseSignature"] = json!(signature);
            }
            client.post(format!("{}/tickets", base)).json(&body)
        }
        Commands::SetRound {
            round_number,
            duration_hours,
        } => {
            let mut body = json!({
                "roundNumber": round_number,
                "instance": cli.instance,
            });
            if let Some(hours) = duration_hours {
                body["durationHours"] = json!(hours);
            }
            admin(client.put(format!("{}/admin/round", base)), &cli)?.json(&body)
        }
        Commands::EndRound {} => admin(client.post(format!("{}/admin/round/end", base)), &cli)?
            .query(&[("instance", cli.instance.as_str())]),
        Commands::Pending {} => admin(client.get(format!("{}/admin/payouts/pending", base)), &cli)?
            .query(&[("instance", cli.instance.as_str())]),
        Commands::Retry { round_id, wallet } => {
            admin(client.post(format!("{}/admin/payouts/retry", base)), &cli)?.json(&json!({
                "roundId": round_id,
                "walletAddress": wallet,
                "instance": cli.instance,
            }))
        }
        Commands::Stats {} => admin(client.get(format!("{}/admin/stats", base)), &cli)?,
    };

    runtime.block_on(run(request))
}

fn admin(request: RequestBuilder, cli: &Cli) -> Result<RequestBuilder> {
    Ok(request.header(ADMIN_TOKEN_HEADER, cli.admin_token()?))
}

async fn run(request: RequestBuilder) -> Result<()> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status.is_success() {
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(_) => println!("{}", body),
        }
        return Ok(());
    }

    if !body.is_empty() {
        eprintln!("{}", body);
    }
    if status == StatusCode::UNAUTHORIZED {
        info!("hint: admin endpoints need the token configured on the server");
    }
    Err(anyhow!("request failed with status {}", status))
}
