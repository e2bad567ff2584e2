// ==========================================
// 校务管理后端 - 命令行入口
// ==========================================
// 用法:
//   school-backend dashboard <admin_id>
//   school-backend series <admin_id> <salary|fee|grade> <week|month> [teacher|course|student]
//   school-backend export-grades <teacher_id> <assignment_id>
//   school-backend config
// 数据库路径: SCHOOL_BACKEND_DB_PATH 或用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use school_backend::app::{get_default_db_path, AppState};
use school_backend::domain::{BucketQuery, BucketSeries, Granularity, GroupField};
use school_backend::logging;

const USAGE: &str = "用法: school-backend <dashboard|series|export-grades|config> [参数...]";

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let db_path = get_default_db_path();
    tracing::info!("{} v{}，数据库: {}", school_backend::APP_NAME, school_backend::VERSION, db_path);
    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;

    match command.as_str() {
        "dashboard" => {
            let principal = state.authenticate(parse_id(&args, 1, "admin_id")?)?;
            let dashboard = state.admin_api.dashboard(&principal)?;
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        }
        "series" => {
            let principal = state.authenticate(parse_id(&args, 1, "admin_id")?)?;
            let series = arg(&args, 2, "series")?;
            let series = BucketSeries::from_str(series)
                .ok_or_else(|| anyhow!("未知序列: {}", series))?;
            let granularity = arg(&args, 3, "granularity")?;
            let granularity = Granularity::from_str(granularity)
                .ok_or_else(|| anyhow!("未知粒度: {}", granularity))?;
            let mut query = BucketQuery::new(series, granularity);
            if let Some(group) = args.get(4) {
                let group =
                    GroupField::from_str(group).ok_or_else(|| anyhow!("未知分组: {}", group))?;
                query = query.grouped_by(group);
            }
            let buckets = state.admin_api.series(&principal, &query)?;
            println!("{}", serde_json::to_string_pretty(&buckets)?);
        }
        "export-grades" => {
            let principal = state.authenticate(parse_id(&args, 1, "teacher_id")?)?;
            let assignment_id = parse_id(&args, 2, "assignment_id")?;
            print!(
                "{}",
                state.teacher_api.export_grades_csv(&principal, assignment_id)?
            );
        }
        "config" => {
            let snapshot = state
                .config_manager
                .get_config_snapshot()
                .map_err(|e| anyhow!("读取配置失败: {}", e))?;
            println!("{}", snapshot);
            println!("{}", serde_json::to_string_pretty(&state.config)?);
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("缺少参数 <{}>\n{}", name, USAGE))
}

fn parse_id(args: &[String], index: usize, name: &str) -> Result<i64> {
    let raw = arg(args, index, name)?;
    raw.parse::<i64>()
        .with_context(|| format!("参数 <{}> 不是整数: {}", name, raw))
}
