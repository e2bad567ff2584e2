// ==========================================
// 校务管理后端 - 访问控制
// ==========================================
// 职责: 在进入计算核心之前判定角色权限
// 红线: 引擎层从不判断角色；所有角色判断只在这里
// 资源归属（教师是否拥有作业、学生是否选课）由各 API 在取到资源后校验
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::Role;
use crate::repository::school_repo::CourseworkRepository;
use serde::{Deserialize, Serialize};

/// 已认证的调用方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// 受控操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    // 学生
    BrowseCourses,
    SubmitAnswers,
    ViewOwnProgress,
    ViewOwnGrades,
    PayCourseFee,
    // 教师
    ManageAssignments,
    ScoreAnswers,
    RecalculateGrades,
    ExportGrades,
    ViewOwnSalary,
    // 教师与管理员
    ViewAssignmentAnalytics,
    // 管理员
    ViewDashboard,
    ManageUsers,
    ManageCourses,
    ManageEnrollments,
    RecordSalary,
    ViewSchoolAnalytics,
}

impl Operation {
    /// 允许执行该操作的角色
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Operation::BrowseCourses
            | Operation::SubmitAnswers
            | Operation::ViewOwnProgress
            | Operation::ViewOwnGrades
            | Operation::PayCourseFee => &[Role::Student],
            Operation::ManageAssignments
            | Operation::ScoreAnswers
            | Operation::RecalculateGrades
            | Operation::ExportGrades
            | Operation::ViewOwnSalary => &[Role::Teacher],
            Operation::ViewAssignmentAnalytics => &[Role::Teacher, Role::Admin],
            Operation::ViewDashboard
            | Operation::ManageUsers
            | Operation::ManageCourses
            | Operation::ManageEnrollments
            | Operation::RecordSalary
            | Operation::ViewSchoolAnalytics => &[Role::Admin],
        }
    }
}

// ==========================================
// AccessPolicy
// ==========================================
pub struct AccessPolicy;

impl AccessPolicy {
    /// 判定调用方能否执行操作
    ///
    /// # 返回
    /// - Err(Forbidden): 角色不在允许列表中
    pub fn authorize(principal: &Principal, operation: Operation) -> ApiResult<()> {
        if operation.allowed_roles().contains(&principal.role) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = principal.user_id,
                role = %principal.role,
                operation = ?operation,
                "越权访问被拒绝"
            );
            Err(ApiError::Forbidden(format!(
                "角色 {} 不能执行 {:?}",
                principal.role, operation
            )))
        }
    }

    /// 按用户 id 解析调用方
    ///
    /// # 返回
    /// - Err(Unauthorized): 用户不存在
    pub fn authenticate<R>(repo: &R, user_id: i64) -> ApiResult<Principal>
    where
        R: CourseworkRepository + ?Sized,
    {
        let user = repo
            .find_user(user_id)?
            .ok_or_else(|| ApiError::Unauthorized(format!("用户 {} 不存在", user_id)))?;
        Ok(Principal::new(user.id, user.role))
    }
}
