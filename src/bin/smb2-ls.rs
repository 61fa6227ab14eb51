//! Directory-listing demo for the SMB2 client engine

use clap::Parser;
use smb2_client::auth::AuthIdentity;
use smb2_client::client::ClientConfig;
use smb2_client::Connection;

#[derive(Parser, Debug)]
#[command(name = "smb2-ls")]
#[command(about = "List a share's root directory over SMB2/3", long_about = None)]
struct Args {
    /// SMB server address or hostname
    #[arg(short = 'H', long)]
    host: String,

    /// Port to connect to
    #[arg(short = 'p', long, default_value = "445")]
    port: u16,

    /// Username for authentication; omit for an anonymous session
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password for authentication
    #[arg(short = 'P', long, default_value = "")]
    password: String,

    /// Domain/workgroup
    #[arg(short = 'd', long, default_value = "WORKGROUP")]
    domain: String,

    /// Share name to list
    #[arg(short = 's', long)]
    share: String,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = ClientConfig::default();
    let workstation = config.workstation.clone();

    tracing::info!("Connecting to {}:{}", args.host, args.port);
    let mut conn = Connection::connect(&args.host, args.port, config).await?;
    tracing::info!(dialect = ?conn.dialect(), signing = conn.signing_required(), "negotiated");

    let identity = match &args.username {
        Some(username) => {
            tracing::info!("Authenticating as {}\\{}", args.domain, username);
            AuthIdentity::password(username, &args.domain, &workstation, &args.password)
        }
        None => {
            tracing::info!("Using an anonymous session");
            AuthIdentity::Anonymous
        }
    };

    let session = conn.session_setup(identity).await?;
    let tree = conn.tree_connect(session, &args.share).await?;

    let count = conn.count_entries(tree).await?;
    println!("{} entries in \\\\{}\\{}", count, args.host, args.share);
    for index in 1..=count as i64 {
        let entry = conn.fetch_entry(tree, index).await?;
        let kind = if entry.is_directory() { "<DIR>" } else { "     " };
        println!("{:>6}  {}  {}", entry.end_of_file, kind, entry.name);
    }

    conn.tree_disconnect(tree).await?;
    conn.logoff(session).await?;
    conn.disconnect().await?;
    Ok(())
}
