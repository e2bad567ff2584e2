// ==========================================
// 校务管理后端 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (scope_id + key → value)
// 约束: 配置值非法时记录 warn 并回退默认值，不阻断业务
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::ProgressStatus;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// GradingConfig - 计算相关配置快照
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradingConfig {
    /// 0% 进度对应的状态（默认 not_started，旧版行为为 in_progress）
    pub zero_progress_status: ProgressStatus,
    /// 重算遇到瞬时故障/唯一约束冲突时的重试次数
    pub recompute_max_retries: u32,
    /// 看板展示保留的小数位
    pub analytics_round_decimals: u32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            zero_progress_status: ProgressStatus::NotStarted,
            recompute_max_retries: 1,
            analytics_round_decimals: 2,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self
            .get_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有 global 配置的快照（JSON）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let config_map = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BTreeMap<String, String>, _>>()?;

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 计算配置 =====

    /// 0% 进度对应的状态
    ///
    /// 取值: NOT_STARTED（默认）/ IN_PROGRESS
    pub fn get_zero_progress_status(&self) -> Result<ProgressStatus, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::ZERO_PROGRESS_STATUS, "NOT_STARTED")?;
        match value.trim().to_uppercase().as_str() {
            "NOT_STARTED" => Ok(ProgressStatus::NotStarted),
            "IN_PROGRESS" => Ok(ProgressStatus::InProgress),
            _ => {
                tracing::warn!(
                    config_key = config_keys::ZERO_PROGRESS_STATUS,
                    raw_value = %value,
                    "零进度状态配置非法，使用 NOT_STARTED"
                );
                Ok(ProgressStatus::NotStarted)
            }
        }
    }

    pub fn get_recompute_max_retries(&self) -> Result<u32, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::RECOMPUTE_MAX_RETRIES, "1")?;
        Ok(value.trim().parse::<u32>().unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::RECOMPUTE_MAX_RETRIES,
                raw_value = %value,
                "重试次数配置非法，使用默认值 1"
            );
            1
        }))
    }

    pub fn get_analytics_round_decimals(&self) -> Result<u32, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::ANALYTICS_ROUND_DECIMALS, "2")?;
        match value.trim().parse::<u32>() {
            Ok(n) if n <= 6 => Ok(n),
            _ => {
                tracing::warn!(
                    config_key = config_keys::ANALYTICS_ROUND_DECIMALS,
                    raw_value = %value,
                    "小数位配置非法，使用默认值 2"
                );
                Ok(2)
            }
        }
    }

    /// 加载计算配置快照
    pub fn load_grading_config(&self) -> Result<GradingConfig, Box<dyn Error>> {
        Ok(GradingConfig {
            zero_progress_status: self.get_zero_progress_status()?,
            recompute_max_retries: self.get_recompute_max_retries()?,
            analytics_round_decimals: self.get_analytics_round_decimals()?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const ZERO_PROGRESS_STATUS: &str = "zero_progress_status";
    pub const RECOMPUTE_MAX_RETRIES: &str = "recompute_max_retries";
    pub const ANALYTICS_ROUND_DECIMALS: &str = "analytics_round_decimals";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../../tests/fixtures/schema.sql"))
            .unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_without_rows() {
        let cfg = manager().load_grading_config().unwrap();
        assert_eq!(cfg, GradingConfig::default());
    }

    #[test]
    fn test_legacy_zero_status_override() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::ZERO_PROGRESS_STATUS, "in_progress")
            .unwrap();
        assert_eq!(
            mgr.get_zero_progress_status().unwrap(),
            ProgressStatus::InProgress
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::RECOMPUTE_MAX_RETRIES, "many")
            .unwrap();
        mgr.set_global_config_value(config_keys::ANALYTICS_ROUND_DECIMALS, "99")
            .unwrap();
        mgr.set_global_config_value(config_keys::ZERO_PROGRESS_STATUS, "DONE")
            .unwrap();
        assert_eq!(mgr.load_grading_config().unwrap(), GradingConfig::default());
    }

    #[test]
    fn test_snapshot_is_sorted_json() {
        let mgr = manager();
        mgr.set_global_config_value("b_key", "2").unwrap();
        mgr.set_global_config_value("a_key", "1").unwrap();
        assert_eq!(
            mgr.get_config_snapshot().unwrap(),
            r#"{"a_key":"1","b_key":"2"}"#
        );
    }
}
