// ==========================================
// 校务管理后端 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接、配置和 API 实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{AccessPolicy, AdminApi, ApiResult, Principal, StudentApi, TeacherApi};
use crate::config::{ConfigManager, GradingConfig};
use crate::db::{open_sqlite_connection, read_schema_version, CURRENT_SCHEMA_VERSION};
use crate::repository::{SchoolRepository, SqliteSchoolRepository};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "SCHOOL_BACKEND_DB_PATH";

/// 应用状态
///
/// 所有 API 共享同一个仓储实例（同一连接）
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 启动时加载的评分配置
    pub config: GradingConfig,

    /// 仓储
    pub repo: Arc<dyn SchoolRepository>,

    /// 配置管理
    pub config_manager: Arc<ConfigManager>,

    pub student_api: Arc<StudentApi>,
    pub teacher_api: Arc<TeacherApi>,
    pub admin_api: Arc<AdminApi>,
}

impl AppState {
    /// 创建应用状态
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Err(String): 数据库无法打开
    ///
    /// 配置读取失败时告警并使用默认配置
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        match read_schema_version(&conn) {
            Ok(Some(v)) if v >= CURRENT_SCHEMA_VERSION => {}
            Ok(Some(v)) => tracing::warn!(
                "schema_version={} 低于期望版本 {}，部分功能可能不可用",
                v,
                CURRENT_SCHEMA_VERSION
            ),
            Ok(None) => tracing::warn!("数据库缺少 schema_version 表，请先初始化 schema"),
            Err(e) => tracing::warn!("读取 schema_version 失败: {}", e),
        }
        let conn = Arc::new(Mutex::new(conn));

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager.load_grading_config().unwrap_or_else(|e| {
            tracing::warn!("加载评分配置失败，使用默认配置: {}", e);
            GradingConfig::default()
        });
        tracing::info!(?config, "评分配置已加载");

        let repo: Arc<dyn SchoolRepository> =
            Arc::new(SqliteSchoolRepository::from_connection(conn));

        Ok(Self::with_repository(db_path, repo, config_manager, config))
    }

    /// 以给定仓储组装各 API
    pub fn with_repository(
        db_path: String,
        repo: Arc<dyn SchoolRepository>,
        config_manager: Arc<ConfigManager>,
        config: GradingConfig,
    ) -> Self {
        Self {
            db_path,
            student_api: Arc::new(StudentApi::new(repo.clone(), config)),
            teacher_api: Arc::new(TeacherApi::new(repo.clone(), config)),
            admin_api: Arc::new(AdminApi::new(repo.clone(), config)),
            config,
            repo,
            config_manager,
        }
    }

    /// 按用户 id 解析调用方
    pub fn authenticate(&self, user_id: i64) -> ApiResult<Principal> {
        AccessPolicy::authenticate(&*self.repo, user_id)
    }
}

/// 默认数据库路径
///
/// 优先级: 环境变量 SCHOOL_BACKEND_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./school_backend.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("school-backend");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("school_backend.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_new_with_empty_database_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("empty.db").to_string_lossy().to_string();

        // 空库：config_kv 不存在，回退默认配置
        let state = AppState::new(db_path).unwrap();
        assert_eq!(state.config, GradingConfig::default());
    }
}
