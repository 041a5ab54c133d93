//! echo-memory —— 记忆子系统命令行
//!
//! ```bash
//! # 交互式对话：每条消息经过重要性判定写入长期记忆，回复时附带分层记忆上下文
//! echo-memory chat --session alice
//!
//! # 查看某个会话与查询相关的长期记忆
//! echo-memory context --session alice "喝点什么"
//!
//! # 熔断器状态（JSON）
//! echo-memory health
//! ```

use clap::{Parser, Subcommand};
use echo_memory::config::MemoryConfig;
use echo_memory::context::MemoryContext;
use echo_memory::error::{MemoryError, Result};
use echo_memory::llm::config::Config;
use echo_memory::llm::types::Message;
use echo_memory::memory::MemoryManager;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const SYSTEM_PROMPT: &str = "你是一个友好、贴心的聊天伙伴。回答简洁自然，\
在合适的时候结合你对用户的了解，但不要生硬地复述记忆内容。";

#[derive(Parser)]
#[command(name = "echo-memory")]
#[command(about = "Conversational memory: importance judging, vector recall, hierarchical context")]
#[command(version)]
struct Cli {
    /// YAML 配置文件，缺省时使用默认配置 + 环境变量
    #[arg(short, long, env = "ECHO_MEMORY_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 交互式对话（/context /topic /emotion /fact /flush /clear /exit）
    Chat {
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// 打印与查询相关的长期记忆
    Context {
        #[arg(short, long)]
        session: String,
        query: String,
    },
    /// 以 JSON 打印各外部服务的熔断器状态
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("echo_memory=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MemoryConfig::load(path)?,
        None => MemoryConfig::default(),
    }
    .apply_env_overrides()?
    .validate()?;
    let models = Config::from_env()?;
    let ctx = MemoryContext::from_config(config, &models)?;

    match cli.command {
        Commands::Chat { session } => run_chat(&ctx, &session).await,
        Commands::Context { session, query } => {
            let memories = ctx.manager().get_relevant_memories(&query, Some(session.as_str())).await;
            if memories.is_empty() {
                println!("（没有相关记忆）");
            } else {
                println!("{}", MemoryManager::format_memories_for_prompt(&memories));
            }
            Ok(())
        }
        Commands::Health => {
            if let Err(e) = ctx.store().init_collection().await {
                warn!(error = %e, "⚠️ 向量库探测失败");
            }
            println!("{}", serde_json::to_string_pretty(&ctx.breaker_snapshots())?);
            Ok(())
        }
    }
}

async fn run_chat(ctx: &MemoryContext, session_id: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let reaper = ctx
        .sessions()
        .spawn_reaper(ctx.config().sessions.reap_interval(), cancel.clone());

    let mut editor = DefaultEditor::new().map_err(readline_error)?;
    println!("💬 会话 {}，输入 /exit 退出", session_id);

    loop {
        let line = match editor.readline("👤 > ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                error!(error = %e, "读取输入失败");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);
        if line == "/exit" {
            break;
        }

        match handle_line(ctx, session_id, line).await {
            Ok(output) => println!("{}", output),
            Err(e) => error!(error = %e, "处理输入失败"),
        }
    }

    if let Some(handle) = ctx.sessions().get(session_id) {
        let conflicts = handle.lock().await.flush_pending_facts().await;
        for conflict in conflicts {
            println!("⚠️ 可能的冲突：「{}」 vs 「{}」", conflict.new_fact, conflict.existing_fact);
        }
    }
    ctx.sessions().end_session(session_id);
    cancel.cancel();
    let _ = reaper.await;
    Ok(())
}

async fn handle_line(ctx: &MemoryContext, session_id: &str, line: &str) -> Result<String> {
    let handle = ctx.sessions().get_or_create(session_id)?;
    let mut session = handle.lock().await;

    if let Some(command) = line.strip_prefix('/') {
        let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
        let arg = arg.trim();
        return Ok(match name {
            "context" => {
                let context = session.format_for_prompt().await;
                if context.is_empty() {
                    "（暂无上下文）".to_string()
                } else {
                    context
                }
            }
            "topic" if !arg.is_empty() => {
                session.add_topic(arg);
                format!("🏷️ 已添加话题：{}", arg)
            }
            "emotion" if !arg.is_empty() => {
                session.update_emotion(arg);
                format!("🙂 当前情绪：{}", arg)
            }
            "fact" if !arg.is_empty() => {
                session.add_pending_fact(arg);
                format!("📌 待确认事实：{}", arg)
            }
            "flush" => {
                let conflicts = session.flush_pending_facts().await;
                if conflicts.is_empty() {
                    "✅ 待确认事实已写入".to_string()
                } else {
                    conflicts
                        .iter()
                        .map(|c| format!("⚠️ 可能的冲突：「{}」 vs 「{}」", c.new_fact, c.existing_fact))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            "clear" => {
                session.clear_session();
                "🧹 会话已清空（长期记忆保留）".to_string()
            }
            _ => "可用命令：/context /topic <话题> /emotion <情绪> /fact <事实> /flush /clear /exit"
                .to_string(),
        });
    }

    let message = Message::user(line);
    ctx.manager()
        .extract_and_store_memories(&message, Some(session_id))
        .await;
    session.add_message(&message);

    let memory_context = session.format_for_prompt().await;
    let mut messages = vec![Message::system(SYSTEM_PROMPT)];
    if !memory_context.is_empty() {
        messages.push(Message::system(format!("关于用户的记忆：\n{}", memory_context)));
    }
    messages.extend(session.working().turns().map(|t| Message {
        role: t.role.clone(),
        content: Some(t.content.clone()),
    }));

    let reply = match ctx.llm().chat_simple(messages).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(session_id, error = %e, "⚠️ 对话模型不可用");
            return Ok(format!("🤖 （暂时无法回复：{}）", e));
        }
    };
    session.add_message(&Message::assistant(reply.clone()));

    if session.needs_summarization() {
        session.summarize(&**ctx.summarizer()).await;
    }
    Ok(format!("🤖 {}", reply))
}

fn readline_error(e: ReadlineError) -> MemoryError {
    MemoryError::Other(format!("Failed to start line editor: {}", e))
}
