use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use media_chunk_uploader::{config::AppConfig, logging, FileMeta, UploadManager};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "大文件分片上传工具", version)]
struct Cli {
    /// 配置文件路径
    #[arg(env = "MEDIA_UPLOADER_CONFIG", short, long, default_value = "config/app.toml")]
    config: String,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 上传文件（小文件直传，大文件分片上传）
    Upload {
        file: PathBuf,
        /// 目标目录
        #[arg(long, default_value = "")]
        folder: String,
        /// 内容类型（缺省时按扩展名识别）
        #[arg(long)]
        content_type: Option<String>,
    },
    /// 续传已有会话中缺失的分片
    Resume {
        session_id: String,
        file: PathBuf,
        /// 覆盖会话的并发数
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// 查询会话进度
    Progress { session_id: String },
    /// 生成清单
    Complete { session_id: String },
    /// 清理会话的分片
    Cleanup {
        session_id: String,
        /// 同时删除会话记录（已完成的会话也会被清理）
        #[arg(long)]
        force: bool,
    },
    /// 写出默认配置文件
    InitConfig,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_source(file: &Path) -> anyhow::Result<Bytes> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("读取文件失败: {:?}", file))?;
    Ok(Bytes::from(data))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    if let Command::InitConfig = args.cmd {
        AppConfig::default().save_to_file(&args.config).await?;
        println!("已写入默认配置: {}", args.config);
        return Ok(());
    }

    let config = AppConfig::load_or_default(&args.config).await;
    let _log_guard = logging::init_logging(&config.log);
    info!("Media Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let manager = UploadManager::from_config(&config)?;

    match args.cmd {
        Command::Upload {
            file,
            folder,
            content_type,
        } => {
            let data = read_source(&file).await?;
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("文件名无效")?;
            let meta = FileMeta::new(name, content_type.as_deref(), data.len() as u64);
            let outcome = manager.upload_file(&meta, &folder, data).await?;
            print_json(&outcome)?;
        }
        Command::Resume {
            session_id,
            file,
            concurrency,
        } => {
            let data = read_source(&file).await?;
            manager.upload_all(&session_id, data, concurrency).await?;
            let result = manager.complete(&session_id).await?;
            print_json(&result)?;
        }
        Command::Progress { session_id } => {
            print_json(&manager.get_progress(&session_id).await?)?;
        }
        Command::Complete { session_id } => {
            print_json(&manager.complete(&session_id).await?)?;
        }
        Command::Cleanup { session_id, force } => {
            print_json(&manager.cleanup(&session_id, force).await?)?;
        }
        Command::InitConfig => {}
    }

    Ok(())
}
