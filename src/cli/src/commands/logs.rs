//! Log viewing commands.

use anyhow::Result;
use clap::Args;
use uuid::Uuid;

use crate::client::ApiClient;

#[derive(Args)]
pub struct LogsArgs {
    /// Job ID
    pub job_id: Uuid,

    /// Which stream to read (app or mirror)
    #[arg(short, long, default_value = "app")]
    pub stream: String,

    /// Show only the last N lines
    #[arg(short = 'n', long)]
    pub lines: Option<usize>,

    /// Follow the stream live (like tail -f)
    #[arg(short, long)]
    pub follow: bool,
}

pub async fn execute(args: LogsArgs, client: &ApiClient) -> Result<()> {
    if args.follow {
        let path = format!(
            "/api/v1/jobs/{}/logs/stream?stream={}&from_start=true",
            args.job_id, args.stream
        );
        client
            .follow_events(&path, |line| println!("{}", line))
            .await
    } else {
        let mut path = format!("/api/v1/jobs/{}/logs?stream={}", args.job_id, args.stream);
        if let Some(lines) = args.lines {
            path.push_str(&format!("&lines={}", lines));
        }
        let content = client.get_text(&path).await?;
        println!("{}", content);
        Ok(())
    }
}
