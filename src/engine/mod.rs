// ==========================================
// 校务管理后端 - 引擎层
// ==========================================
// 职责: 进度计算、成绩汇总、统计分析
// 红线: Engine 不拼 SQL, 不判断角色; 只经由仓储 trait 读写
// ==========================================

pub mod analytics;
pub mod grade_aggregator;
pub mod progress_calculator;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_fixtures;

// 重导出核心引擎
pub use analytics::{bucket_key, bucketize, AnalyticsAggregator};
pub use grade_aggregator::{grade_percentage, GradeAggregator};
pub use progress_calculator::{derive_progress, ProgressCalculator};
pub use retry::{is_retryable, retry_once, retry_with_limit, DEFAULT_MAX_RETRIES};
