// ==========================================
// 校务管理后端 - 核心库
// ==========================================
// 范围: 作答进度、课程总评、管理统计
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 进度/成绩/统计计算
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 按角色的业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{Granularity, ProgressStatus, Role, SalaryStatus};

// 领域实体
pub use domain::{
    Assignment, BucketQuery, BucketSeries, Course, DashboardSnapshot, OverallGrade, Question,
    StudentAnswer, StudentProgress, TimeBucket, User,
};

// 仓储
pub use repository::{
    InMemorySchoolRepository, RepositoryError, SchoolRepository, SqliteSchoolRepository,
};

// 引擎
pub use engine::{AnalyticsAggregator, GradeAggregator, ProgressCalculator};

// API
pub use api::{AdminApi, ApiError, Principal, StudentApi, TeacherApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "校务管理后端";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
