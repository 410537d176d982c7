use clap::Parser;
use cms_monit_match::utils::logger;
use cms_monit_match::{CliArgs, RunOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    let guard = logger::init_cli_logger(&args.log_level, args.verbose, args.log_file.as_deref())?;

    tracing::info!("Starting cms-monit-match");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let options = RunOptions::from(&args);
    match cms_monit_match::run(&options, |name| std::env::var(name).ok()).await {
        Ok(Some(summary)) => {
            tracing::info!(
                "✅ Matching completed: {} merged, {} without a match",
                summary.matched,
                summary.unmatched
            );
        }
        Ok(None) => tracing::info!("✅ Dry run completed"),
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!("❌ Run failed: {} (Category: {:?})", e, e.category());
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

            // process::exit 不會執行解構子，先把檔案日誌寫完
            drop(guard);
            std::process::exit(e.exit_code());
        }
    }

    Ok(())
}
