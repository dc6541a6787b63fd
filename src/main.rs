use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;

use skill_engine::app_config::db::{init_db, init_schema};
use skill_engine::app_config::log::setup_logging;
use skill_engine::trading::market::http_provider::HttpMarketProvider;
use skill_engine::trading::model::execution::execution_log::ExecutionLogModel;
use skill_engine::trading::model::skill::skill_definition::SkillDefinitionModel;
use skill_engine::trading::services::skill_instance_service::SkillInstanceService;
use skill_engine::trading::skill::definition::seed_skill_definitions;
use skill_engine::trading::skill::registry::SkillRegistry;
use skill_engine::trading::task;

#[derive(Parser)]
#[command(name = "skill_engine", about = "自动交易技能引擎")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 把内置技能定义写入库，已存在的只刷新文案
    Seed,
    /// 扫描全部active技能实例并评估触发条件
    SweepInstances,
    /// 扫描全部active止损监控单，跌破止损价时市价卖出
    SweepStopWatches,
    /// 评估单个实例的触发条件
    Check { id: String },
    /// 评估单个实例，条件满足就下单
    Execute { id: String },
    /// 列出全部技能定义
    Definitions,
    /// 启用技能
    EnableSkill { code: String },
    /// 停用技能，已创建的实例不受影响
    DisableSkill { code: String },
    /// 查看实例的执行流水，新的在前
    Logs {
        instance_id: String,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    // 设置日志
    setup_logging().await?;
    init_db().await;
    init_schema().await?;

    let cli = Cli::parse();
    match cli.command {
        Command::Seed => {
            let inserted = seed_skill_definitions().await?;
            println!("新写入技能定义{}个", inserted);
        }
        Command::SweepInstances => {
            let provider = HttpMarketProvider::from_env();
            let registry = Arc::new(SkillRegistry::load().await?);
            let report = task::skill_sweep::check_all_instances(&provider, registry).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SweepStopWatches => {
            let provider = HttpMarketProvider::from_env();
            let report = task::stop_watch_sweep::check_all_watches(&provider).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check { id } => {
            let provider = HttpMarketProvider::from_env();
            let registry = Arc::new(SkillRegistry::load().await?);
            let service = SkillInstanceService::new(registry)?;
            let outcome = service.check(&provider, &id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Execute { id } => {
            let provider = HttpMarketProvider::from_env();
            let registry = Arc::new(SkillRegistry::load().await?);
            let service = SkillInstanceService::new(registry)?;
            let outcome = service.execute(&provider, &id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Definitions => {
            let model = SkillDefinitionModel::new().await;
            let defs = model.list_all().await?;
            println!("{}", serde_json::to_string_pretty(&defs)?);
        }
        Command::EnableSkill { code } => {
            let model = SkillDefinitionModel::new().await;
            model.set_enabled(&code, true).await?;
            println!("技能{}已启用", code);
        }
        Command::DisableSkill { code } => {
            let model = SkillDefinitionModel::new().await;
            model.set_enabled(&code, false).await?;
            println!("技能{}已停用", code);
        }
        Command::Logs { instance_id, limit } => {
            let model = ExecutionLogModel::new().await;
            let rows = model.list_by_instance(&instance_id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
