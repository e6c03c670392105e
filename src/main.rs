//! Scout 命令行入口
//!
//! 目标取自命令行参数；未提供时从标准输入读取一行。按配置装配会话并在迭代上限内运行，最后打印结果。

use std::io::BufRead;

use anyhow::Context;
use scout::agent::create_session_from_config;
use scout::config::load_config;

fn read_objective() -> anyhow::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args.join(" "));
    }
    eprintln!("What is my objective?");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read objective from stdin")?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    scout::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config ({}), using defaults", e);
        Default::default()
    });

    let objective = read_objective()?;
    anyhow::ensure!(!objective.is_empty(), "No objective given");

    let mut session = create_session_from_config(&cfg);
    let token = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the current iteration");
            token.cancel();
        }
    });

    if let Err(e) = session.initialize(objective).await {
        tracing::error!("Initialization failed: {}", e);
    }
    let max_iterations = (cfg.app.max_iterations > 0).then_some(cfg.app.max_iterations);
    let report = session.run(max_iterations).await.context("Session run failed")?;

    let (prompt_tokens, completion_tokens, total_tokens) = session.token_usage();
    tracing::info!(
        iterations = report.iterations,
        prompt_tokens,
        completion_tokens,
        total_tokens,
        "session finished"
    );
    println!("{}", report.render());
    if !report.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}
