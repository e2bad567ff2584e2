// ==========================================
// 校务管理后端 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、统计视图
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod analytics;
pub mod coursework;
pub mod directory;
pub mod gradebook;
pub mod ledger;
pub mod types;

// 重导出核心类型
pub use analytics::{
    AggregateFn, AggregateStat, AssignmentProgress, AssignmentSummary, BucketQuery, BucketSeries,
    CourseAverage, CourseTotal, DashboardSnapshot, GroupField, MetricSample, SalarySummary,
    TimeBucket,
};
pub use coursework::{
    AnswerFeedback, AnswerSubmission, Assignment, NewAssignment, NewQuestion, Question,
    StudentAnswer,
};
pub use directory::{Classroom, Course, NewCourse, NewUser, User};
pub use gradebook::{OverallGrade, StudentProgress};
pub use ledger::{CourseFeePayment, NewCourseFeePayment, NewTeacherSalary, TeacherSalary};
pub use types::{Granularity, ProgressStatus, Role, SalaryStatus};
