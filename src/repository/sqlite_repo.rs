// ==========================================
// 校务管理后端 - SQLite 仓储实现
// ==========================================
// 依据: tests/fixtures/schema.sql
// 红线: Repository 不做业务逻辑,只做数据映射
// ==========================================
// 子模块:
// - coursework: 用户/课程/作业/题目/作答
// - gradebook: 进度/总评
// - ledger: 工资/学费流水
// ==========================================

mod coursework;
mod gradebook;
mod ledger;


use crate::domain::GroupField;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

// ==========================================
// SqliteSchoolRepository
// ==========================================
pub struct SqliteSchoolRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSchoolRepository {
    /// 打开数据库文件并应用统一 PRAGMA
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

// ==========================================
// 行映射辅助
// ==========================================

/// 文本列解析失败时构造 FromSqlConversionFailure
pub(crate) fn conversion_error(
    idx: usize,
    message: impl Into<String>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into().into())
}

pub(crate) fn count_from_row(value: i64) -> u64 {
    value.max(0) as u64
}

/// 分组字段 → 列名；不支持的分组返回 ValidationError
pub(crate) fn group_column(
    group_by: Option<GroupField>,
    allowed: &[(GroupField, &'static str)],
) -> RepositoryResult<&'static str> {
    match group_by {
        None => Ok("NULL"),
        Some(group) => allowed
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, column)| *column)
            .ok_or_else(|| {
                RepositoryError::ValidationError(format!("不支持的分组字段: {:?}", group))
            }),
    }
}
