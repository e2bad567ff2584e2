// ==========================================
// 校务管理后端 - API 层
// ==========================================
// 职责: 按角色提供业务接口，访问控制先于任何计算
// 调用方: 外部外壳（HTTP / 命令行）
// ==========================================

pub mod access;
pub mod admin_api;
pub mod dto;
pub mod error;
pub mod student_api;
pub mod teacher_api;

// 重导出核心类型
pub use access::{AccessPolicy, Operation, Principal};
pub use admin_api::AdminApi;
pub use dto::{
    AssignmentDetail, AssignmentPatch, CoursePatch, DashboardResponse, FeePaymentRequest,
    GradeExportRow, OverallStats, QuestionView, SubmissionResult, UserPatch,
};
pub use error::{ApiError, ApiResult, ErrorOutcome};
pub use student_api::StudentApi;
pub use teacher_api::TeacherApi;
