//! Cowork - 自主任务执行内核
//!
//! 无头入口：初始化日志、加载配置、构建内核，提交命令行给出的目标，打印事件与最终摘要。
//!
//! 用法：`cowork [--config <path>] <goal...>`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use cowork::autonomous::{AutonomousTask, SubmitOptions, TaskStatus};
use cowork::config::load_config;
use cowork::core::{AgentError, Core, CoreBuilder, EventSink};
use cowork::observability;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn parse_args() -> (Option<PathBuf>, String) {
    let mut config = None;
    let mut goal = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = args.next().map(PathBuf::from);
        } else {
            goal.push(arg);
        }
    }
    (config, goal.join(" "))
}

/// 从标准输入逐个读取问题的回答
async fn ask(questions: &[String]) -> anyhow::Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut answers = Vec::new();
    for q in questions {
        println!("? {}", q);
        let line = lines.next_line().await?.unwrap_or_default();
        answers.push(line.trim().to_string());
    }
    Ok(answers)
}

/// 等待任务进入暂停或结束状态
async fn wait_until_settled(core: &Core, id: &str) -> anyhow::Result<AutonomousTask> {
    loop {
        let task = core.controller.get_task(id).context("Task disappeared")?;
        if task.status == TaskStatus::Paused || task.status.is_terminal() {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn print_result(task: &AutonomousTask) {
    println!("\n== {} ({:?}) ==", task.id, task.status);
    for s in &task.subtasks {
        println!("- [{:?}] {}", s.status, s.description);
    }
    if let Some(v) = &task.verification_result {
        println!("goal met: {} (confidence {:.2})", v.goal_met, v.confidence);
    }
    if let Some(summary) = &task.summary {
        println!("\n{}", summary);
    }
    if let Some(err) = &task.error {
        println!("error: {}", err);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let (config_path, goal) = parse_args();
    if goal.trim().is_empty() {
        anyhow::bail!("usage: cowork [--config <path>] <goal>");
    }
    let cfg = load_config(config_path).context("Failed to load config")?;

    let (events, mut event_rx) = EventSink::channel();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let core = CoreBuilder::new(cfg)
        .with_events(events)
        .with_suspend_notices(notice_tx)
        .build()
        .await
        .context("Failed to build core")?;
    let forwarder = core.forward_suspend_notices(notice_rx);

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            }
        }
    });

    let id = core.controller.submit(goal, SubmitOptions::default());
    let mut task = core.controller.execute_task(&id).await.context("Task could not start")?;

    // 分解阶段需要用户回答；执行中的挂起（如登录墙）回车后直接恢复
    while task.status == TaskStatus::Paused {
        let answers = if task.subtasks.iter().any(|s| s.started_at.is_some()) {
            if let Some(s) = core.coordinator.get(&task.id) {
                println!("paused: {}", s.user_message);
            }
            ask(&["Press enter once done".to_string()]).await?;
            Vec::new()
        } else {
            ask(&task.required_user_input).await?
        };
        task = match core.controller.resume_task(&id, answers).await {
            Ok(task) => task,
            // 心跳已自动恢复：由通知转发方继续执行，这里等它停下
            Err(AgentError::InvalidState(_)) => wait_until_settled(&core, &id).await?,
            Err(e) => return Err(e).context("Resume failed"),
        };
    }

    print_result(&task);

    core.coordinator.shutdown();
    forwarder.abort();
    drop(core);
    let _ = tokio::time::timeout(Duration::from_millis(200), printer).await;
    Ok(())
}
