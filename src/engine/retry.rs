// ==========================================
// 校务管理后端 - 重算重试策略
// ==========================================
// 规则:
// - 瞬时故障（busy/锁/连接/事务）与唯一约束冲突: 重试
// - NotFound 及其他错误: 立即返回
// - 重试次数用尽: 返回最后一次错误
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};

/// 默认重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// 该错误是否值得重试
pub fn is_retryable(err: &RepositoryError) -> bool {
    err.is_transient() || err.is_conflict()
}

/// 执行操作，瞬时故障或唯一约束冲突时最多重试 `max_retries` 次
///
/// # 参数
/// - `operation`: 操作名（仅用于日志）
/// - `max_retries`: 最大重试次数（0 表示不重试）
/// - `f`: 待执行的闭包，每次重试都会完整重跑
pub fn retry_with_limit<T, F>(operation: &str, max_retries: u32, mut f: F) -> RepositoryResult<T>
where
    F: FnMut() -> RepositoryResult<T>,
{
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && is_retryable(&err) => {
                attempt += 1;
                tracing::warn!(
                    operation = operation,
                    attempt = attempt,
                    error = %err,
                    "仓储操作失败，重试"
                );
            }
            Err(err) => return Err(err),
        }
    }
}

/// 按默认策略重试一次
pub fn retry_once<T, F>(operation: &str, f: F) -> RepositoryResult<T>
where
    F: FnMut() -> RepositoryResult<T>,
{
    retry_with_limit(operation, DEFAULT_MAX_RETRIES, f)
}
