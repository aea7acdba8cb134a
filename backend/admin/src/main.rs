use anyhow::Result;
use clap::{Parser, Subcommand};
use server::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an approved administrator account
    CreateAdmin {
        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Approve a pending account
    Approve { id: u64 },

    /// Print the risk score for a set of values, without touching any store
    Score {
        #[arg(long)]
        age: f64,

        /// 0 or 1
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
        hypertension: u8,

        #[arg(long)]
        glucose: f64,

        #[arg(long)]
        bmi: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::CreateAdmin { username, password } => {
            let config = Config::load()?;
            let account = admin::create_admin(&config, &username, &password).await?;
            println!("Created administrator {} with id {}", account.username, account.id);
        }
        Command::Approve { id } => {
            let config = Config::load()?;
            let account = admin::approve(&config, id).await?;
            println!("Approved {} account {} ({})", account.role, account.id, account.username);
        }
        Command::Score {
            age,
            hypertension,
            glucose,
            bmi,
        } => {
            let risk = admin::score(age, hypertension == 1, glucose, bmi)?;
            println!("{risk}");
            if risk.exceeds_scale {
                println!("Score is above the 0-100 display scale");
            }
        }
    }

    Ok(())
}
