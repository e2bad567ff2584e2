// ==========================================
// 校务管理后端 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，把仓储错误转换为带分类的业务错误
// 外壳按 ErrorOutcome 映射到 HTTP 状态码
// ==========================================

use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误分类（供外壳映射状态码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOutcome {
    NotFound,
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    Internal,
}

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 访问控制错误
    // ==========================================
    #[error("未认证: {0}")]
    Unauthorized(String),

    #[error("无权限: {0}")]
    Forbidden(String),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据冲突: {0}")]
    Conflict(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 错误分类
    pub fn outcome(&self) -> ErrorOutcome {
        match self {
            ApiError::Unauthorized(_) => ErrorOutcome::Unauthorized,
            ApiError::Forbidden(_) => ErrorOutcome::Forbidden,
            ApiError::InvalidInput(_) | ApiError::ValidationError(_) => ErrorOutcome::Validation,
            ApiError::NotFound(_) => ErrorOutcome::NotFound,
            ApiError::Conflict(_) | ApiError::BusinessRuleViolation(_) => ErrorOutcome::Conflict,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) | ApiError::Other(_) => {
                ErrorOutcome::Internal
            }
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
// 到达此处的瞬时故障已经用尽重试，统一归为内部错误
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseBusy(msg)
            | RepositoryError::DatabaseConnectionError(msg)
            | RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::InternalError(format!("数据库暂不可用: {}", msg))
            }
            RepositoryError::LockError(msg) => {
                ApiError::InternalError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }

            // 数据质量错误
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }

            // 通用错误
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
