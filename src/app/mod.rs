// ==========================================
// 校务管理后端 - 应用层
// ==========================================
// 职责: 组装仓储、配置与各角色 API
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
